//! Spreadsheet mirror: POSTs each lead as JSON to a webhook endpoint.
//!
//! Write-only. The webhook appends rows; it cannot be read back, so
//! `load_all` always reports the backend as unavailable.

use async_trait::async_trait;
use std::time::Duration;

use super::LeadBackend;
use crate::error::StoreError;
use crate::lead::LeadRecord;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SheetsMirror {
    webhook_url: String,
    client: reqwest::Client,
}

impl SheetsMirror {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { webhook_url: webhook_url.into(), client }
    }
}

#[async_trait]
impl LeadBackend for SheetsMirror {
    fn name(&self) -> &'static str {
        "sheets"
    }

    async fn save(&self, record: &LeadRecord) -> Result<String, StoreError> {
        let res = self
            .client
            .post(&self.webhook_url)
            .json(record)
            .send()
            .await
            .map_err(|e| StoreError::Mirror(e.to_string()))?;

        if !res.status().is_success() {
            return Err(StoreError::Mirror(format!(
                "webhook returned {}",
                res.status()
            )));
        }
        Ok(format!("sheet_{}", record.session_id))
    }

    async fn load_all(&self) -> Result<Vec<LeadRecord>, StoreError> {
        Err(StoreError::Unavailable(
            "sheets mirror is write-only".to_string(),
        ))
    }
}
