//! Primary lead store over an embedded sled tree.

use async_trait::async_trait;
use sled::Db;
use std::path::Path;

use super::LeadBackend;
use crate::error::StoreError;
use crate::lead::LeadRecord;

const LEADS_TREE: &str = "leads";

/// Embedded document store: one named tree, keyed by `session_id`, JSON
/// values. Saves are upserts, so a session's partial record is replaced by
/// its final one.
pub struct SledLeadStore {
    tree: sled::Tree,
}

impl SledLeadStore {
    pub fn new(db: &Db) -> Result<Self, StoreError> {
        Ok(Self { tree: db.open_tree(LEADS_TREE)? })
    }

    /// Opens (or creates) a database at `path` and the leads tree inside it.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::new(&db)
    }
}

#[async_trait]
impl LeadBackend for SledLeadStore {
    fn name(&self) -> &'static str {
        "sled"
    }

    async fn save(&self, record: &LeadRecord) -> Result<String, StoreError> {
        let bytes = serde_json::to_vec(record)?;
        let previous = self.tree.insert(record.session_id.as_bytes(), bytes)?;
        self.tree.flush_async().await?;
        let action = if previous.is_some() { "UPDATE" } else { "INSERT" };
        tracing::info!(
            target: "leadchat::store",
            session_id = %record.session_id,
            action,
            status = ?record.status,
            "lead persisted"
        );
        Ok(format!("lead_{}", record.session_id))
    }

    async fn load_all(&self) -> Result<Vec<LeadRecord>, StoreError> {
        let mut leads = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            match serde_json::from_slice::<LeadRecord>(&value) {
                Ok(record) => leads.push(record),
                Err(e) => {
                    // Skip undecodable rows rather than failing the listing.
                    tracing::warn!(
                        target: "leadchat::store",
                        error = %e,
                        "skipping undecodable lead record"
                    );
                }
            }
        }
        Ok(leads)
    }
}
