pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod models;
pub mod state;
pub mod syncer;

pub use api::error::ApiError;
pub use api::route::create_router;
pub use config::Config;
pub use models::Transaction;
pub use state::AppState;
pub use syncer::Syncer;
