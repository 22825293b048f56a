//! `SQLite`-backed [`NotificationStore`] used by the poll scheduler.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::NotificationStore;
use crate::models::entity::Candidate;
use crate::models::ledger::LedgerEntry;
use crate::Result;

use super::db::{self, Database};
use super::entity_repo::EntityRepo;
use super::ledger_repo::LedgerRepo;

/// Combines the entity and ledger repositories behind the engine's store
/// contract.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    entities: EntityRepo,
    ledger: LedgerRepo,
}

impl SqliteStore {
    /// Build a store over a shared pool.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            entities: EntityRepo::new(Arc::clone(&db)),
            ledger: LedgerRepo::new(Arc::clone(&db)),
            db,
        }
    }

    /// Entity repository sharing this store's pool.
    #[must_use]
    pub fn entities(&self) -> &EntityRepo {
        &self.entities
    }

    /// Ledger repository sharing this store's pool.
    #[must_use]
    pub fn ledger(&self) -> &LedgerRepo {
        &self.ledger
    }
}

impl NotificationStore for SqliteStore {
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(db::ping(self.db.as_ref()))
    }

    fn find_eligible_candidates(
        &self,
        threshold: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + '_>> {
        Box::pin(self.entities.find_eligible_candidates(threshold))
    }

    fn find_ledger_keys(&self) -> Pin<Box<dyn Future<Output = Result<HashSet<String>>> + Send + '_>> {
        Box::pin(self.ledger.recorded_recipients())
    }

    fn insert_ledger_entry<'a>(
        &'a self,
        entry: &'a LedgerEntry,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(self.ledger.insert(entry))
    }
}
