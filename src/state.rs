use crate::config::Config;
use sqlx::PgPool;

pub struct AppState {
    pub config: Config,
    pub db_pool: PgPool,
}
