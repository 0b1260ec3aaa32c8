mod from_row;
pub mod migrations;
pub mod queries;
mod schema;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::contracts::ContractClient;
use crate::email::EmailService;
use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub stripe: StripeClient,
    /// Contract-generation collaborator; `None` disables the notifier.
    pub contracts: Option<ContractClient>,
    pub email: EmailService,
    pub base_url: String,
    /// Bearer token expected on the contract-completion callback.
    pub contract_callback_token: Option<String>,
    pub event_lease_timeout_secs: i64,
    pub email_lease_timeout_secs: i64,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
