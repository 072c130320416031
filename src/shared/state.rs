use crate::billing::stripe::StripeClient;
use crate::config::AppConfig;

use super::utils::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub stripe: StripeClient,
}
