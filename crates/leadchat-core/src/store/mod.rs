//! Lead persistence: an ordered fallback chain over pluggable backends.
//!
//! Save order: primary document store, then the spreadsheet mirror, then the
//! in-process fallback store. When the primary succeeds the mirror is still
//! attempted best-effort; a mirror failure never fails the save. Only when
//! every tier fails does the caller see an error, and it lists each
//! backend's failure.

mod fallback;
mod sheets;
mod sled_store;

pub use fallback::MemoryFallbackStore;
pub use sheets::SheetsMirror;
pub use sled_store::SledLeadStore;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::error::StoreError;
use crate::lead::LeadRecord;

/// One persistence tier. Saves upsert by `session_id` and return the stored id.
#[async_trait]
pub trait LeadBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn save(&self, record: &LeadRecord) -> Result<String, StoreError>;
    async fn load_all(&self) -> Result<Vec<LeadRecord>, StoreError>;
}

/// Which tier accepted the record, and whether the mirror also got a copy.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub id: String,
    pub backend: &'static str,
    pub mirrored: bool,
}

/// The ordered fallback chain. At most one tier is authoritative per save;
/// no cross-backend deduplication is attempted.
pub struct PersistenceGateway {
    primary: Arc<dyn LeadBackend>,
    mirror: Option<Arc<dyn LeadBackend>>,
    fallback: Arc<dyn LeadBackend>,
}

impl PersistenceGateway {
    pub fn new(
        primary: Arc<dyn LeadBackend>,
        mirror: Option<Arc<dyn LeadBackend>>,
        fallback: Arc<dyn LeadBackend>,
    ) -> Self {
        Self { primary, mirror, fallback }
    }

    /// Saves the record through the chain. See the module docs for ordering.
    pub async fn save(&self, record: &LeadRecord) -> Result<SaveOutcome, StoreError> {
        let mut failures: Vec<(String, String)> = Vec::new();

        match self.primary.save(record).await {
            Ok(id) => {
                let mirrored = self.mirror_best_effort(record).await;
                return Ok(SaveOutcome { id, backend: self.primary.name(), mirrored });
            }
            Err(e) => {
                tracing::warn!(
                    target: "leadchat::store",
                    backend = self.primary.name(),
                    session_id = %record.session_id,
                    error = %e,
                    "primary save failed, falling through"
                );
                failures.push((self.primary.name().to_string(), e.to_string()));
            }
        }

        if let Some(mirror) = &self.mirror {
            match mirror.save(record).await {
                Ok(id) => {
                    return Ok(SaveOutcome { id, backend: mirror.name(), mirrored: true });
                }
                Err(e) => {
                    tracing::warn!(
                        target: "leadchat::store",
                        backend = mirror.name(),
                        session_id = %record.session_id,
                        error = %e,
                        "mirror save failed, falling through"
                    );
                    failures.push((mirror.name().to_string(), e.to_string()));
                }
            }
        }

        match self.fallback.save(record).await {
            Ok(id) => {
                tracing::info!(
                    target: "leadchat::store",
                    session_id = %record.session_id,
                    "lead saved to fallback tier only"
                );
                Ok(SaveOutcome { id, backend: self.fallback.name(), mirrored: false })
            }
            Err(e) => {
                failures.push((self.fallback.name().to_string(), e.to_string()));
                tracing::error!(
                    target: "leadchat::store",
                    session_id = %record.session_id,
                    "every persistence backend failed"
                );
                Err(StoreError::AllBackendsFailed { failures })
            }
        }
    }

    async fn mirror_best_effort(&self, record: &LeadRecord) -> bool {
        let Some(mirror) = &self.mirror else { return false };
        match mirror.save(record).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    target: "leadchat::store",
                    backend = mirror.name(),
                    session_id = %record.session_id,
                    error = %e,
                    "mirror copy failed (non-fatal)"
                );
                false
            }
        }
    }

    /// Lists leads from the primary store, falling back to the local tier
    /// when the primary is unreadable.
    pub async fn load_leads(&self) -> Result<Vec<LeadRecord>, StoreError> {
        match self.primary.load_all().await {
            Ok(leads) => Ok(leads),
            Err(e) => {
                tracing::warn!(
                    target: "leadchat::store",
                    backend = self.primary.name(),
                    error = %e,
                    "primary load failed, reading fallback tier"
                );
                self.fallback.load_all().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::{ContactInfo, LeadStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(session_id: &str) -> LeadRecord {
        LeadRecord {
            session_id: session_id.to_string(),
            contact: ContactInfo::default(),
            location: None,
            timing: None,
            service_needed: None,
            specific_query: None,
            brand_alignment: false,
            topic_responses: BTreeMap::new(),
            conversation_history: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            status: LeadStatus::InProgress,
            quality_score: 0,
        }
    }

    /// Backend that always fails, counting attempts.
    struct FailingBackend {
        name: &'static str,
        attempts: AtomicUsize,
    }

    impl FailingBackend {
        fn new(name: &'static str) -> Self {
            Self { name, attempts: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LeadBackend for FailingBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn save(&self, _record: &LeadRecord) -> Result<String, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable(format!("{} is down", self.name)))
        }

        async fn load_all(&self) -> Result<Vec<LeadRecord>, StoreError> {
            Err(StoreError::Unavailable(format!("{} is down", self.name)))
        }
    }

    #[tokio::test]
    async fn primary_failure_falls_through_to_local_fallback() {
        // Scenario: primary store throws, mirror unavailable, local succeeds.
        let gateway = PersistenceGateway::new(
            Arc::new(FailingBackend::new("sled")),
            None,
            Arc::new(MemoryFallbackStore::new()),
        );
        let outcome = gateway.save(&record("sess-b")).await.unwrap();
        assert_eq!(outcome.backend, "local");
        assert!(outcome.id.starts_with("local_"), "got id {}", outcome.id);
        assert!(!outcome.mirrored);
    }

    #[tokio::test]
    async fn all_three_tiers_failing_surfaces_aggregated_error() {
        let gateway = PersistenceGateway::new(
            Arc::new(FailingBackend::new("sled")),
            Some(Arc::new(FailingBackend::new("sheets"))),
            Arc::new(FailingBackend::new("local")),
        );
        let err = gateway.save(&record("sess-x")).await.unwrap_err();
        match err {
            StoreError::AllBackendsFailed { failures } => {
                let names: Vec<&str> = failures.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["sled", "sheets", "local"]);
            }
            other => panic!("expected AllBackendsFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn mirror_failure_does_not_fail_a_primary_save() {
        let primary = Arc::new(MemoryFallbackStore::new());
        let mirror = Arc::new(FailingBackend::new("sheets"));
        let gateway = PersistenceGateway::new(
            primary.clone(),
            Some(mirror.clone()),
            Arc::new(MemoryFallbackStore::new()),
        );
        let outcome = gateway.save(&record("sess-m")).await.unwrap();
        assert_eq!(outcome.backend, "local");
        assert!(!outcome.mirrored);
        assert_eq!(mirror.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(primary.len(), 1);
    }

    #[tokio::test]
    async fn mirror_is_tried_as_second_tier_when_primary_fails() {
        let mirror = Arc::new(MemoryFallbackStore::new());
        let gateway = PersistenceGateway::new(
            Arc::new(FailingBackend::new("sled")),
            Some(mirror.clone()),
            Arc::new(MemoryFallbackStore::new()),
        );
        let outcome = gateway.save(&record("sess-t")).await.unwrap();
        assert_eq!(outcome.backend, "local");
        assert!(outcome.mirrored);
        assert_eq!(mirror.len(), 1);
    }

    #[tokio::test]
    async fn load_falls_back_when_primary_is_unreadable() {
        let fallback = Arc::new(MemoryFallbackStore::new());
        fallback.save(&record("sess-l")).await.unwrap();
        let gateway = PersistenceGateway::new(
            Arc::new(FailingBackend::new("sled")),
            None,
            fallback,
        );
        let leads = gateway.load_leads().await.unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].session_id, "sess-l");
    }
}
