pub mod auth;
pub mod chats;
pub mod db;
pub mod error;

mod appresult;

use std::sync::Arc;

use axum::extract::FromRef;

pub use appresult::{AppError, AppResult};
use auth::IdentityVerifier;
use chats::{ChatStore, Rooms};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: ChatStore,
    pub rooms: Rooms,
    pub verifier: Arc<dyn IdentityVerifier>,
}
