use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SecError;
use crate::types::{Period, SecMetrics};

/// One company's cited metrics for one reporting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecQueryResult {
    pub company: String,
    pub cik: String,
    #[serde(default)]
    pub fiscal_year_end: Option<String>,
    pub period: Period,
    #[serde(default)]
    pub metrics: SecMetrics,
}

/// Source of cited SEC financial metrics.
///
/// Implementations wrap an XBRL extraction library; the engine only relies
/// on the mapping shape and the per-value provenance fields. Tickers absent
/// from the returned map are treated as having no filings for the period.
#[async_trait]
pub trait SecProvider: Send + Sync {
    async fn fetch_metrics(
        &self,
        tickers: &[String],
        metrics: &[&str],
        period: Period,
    ) -> Result<HashMap<String, SecQueryResult>, SecError>;
}
