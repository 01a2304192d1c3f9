use std::sync::Arc;

use crate::{
    config::{AppConfig, ProviderRegistry},
    db::{DbPool, OrmConn},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub providers: Arc<ProviderRegistry>,
}
