//! In-process fallback tier: holds leads in memory when every durable
//! backend is down, so a conversation outcome is never silently dropped.

use async_trait::async_trait;
use dashmap::DashMap;

use super::LeadBackend;
use crate::error::StoreError;
use crate::lead::LeadRecord;

/// Namespace prefix kept on ids so fallback-only saves are recognizable in
/// logs and API responses.
pub const FALLBACK_NAMESPACE: &str = "leadchat_leads";

#[derive(Default)]
pub struct MemoryFallbackStore {
    leads: DashMap<String, LeadRecord>,
}

impl MemoryFallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }
}

#[async_trait]
impl LeadBackend for MemoryFallbackStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn save(&self, record: &LeadRecord) -> Result<String, StoreError> {
        self.leads.insert(record.session_id.clone(), record.clone());
        tracing::debug!(
            target: "leadchat::store",
            namespace = FALLBACK_NAMESPACE,
            session_id = %record.session_id,
            "lead held in memory"
        );
        Ok(format!("local_{}", record.session_id))
    }

    async fn load_all(&self) -> Result<Vec<LeadRecord>, StoreError> {
        Ok(self.leads.iter().map(|e| e.value().clone()).collect())
    }
}
