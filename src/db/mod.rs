mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::engine::Engine;
use crate::workflow::InFlightRefunds;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ledger database pool (refund attempts + local payment records)
    pub db: DbPool,
    /// Reconciliation engine (gateway adapters + ledger writes)
    pub engine: Arc<Engine>,
    /// Session-level guard against duplicate concurrent refund attempts
    pub in_flight: InFlightRefunds,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
