use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A single market data point with vendor provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketValue {
    pub metric: String,
    pub value: Option<f64>,
    pub unit: String,
    pub vendor: String,
    pub symbol: String,
    pub endpoint: String,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl MarketValue {
    pub fn citation(&self) -> String {
        format!(
            "{}:{} {} @ {}",
            self.vendor,
            self.endpoint,
            self.symbol,
            self.fetched_at.format("%Y-%m-%d %H:%M")
        )
    }
}

/// A single SEC filing data point, traceable to the XBRL concept it was
/// resolved from and the accession it was filed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedValue {
    pub metric: String,
    pub value: Option<f64>,
    pub unit: String,
    pub concept: String,
    #[serde(default)]
    pub fiscal_year: Option<i32>,
    #[serde(default)]
    pub fiscal_period: Option<String>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    #[serde(default)]
    pub form_type: Option<String>,
    #[serde(default)]
    pub filed: Option<NaiveDate>,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub filing_url: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// A derived calculation with formula and full component provenance.
///
/// Components are captured at construction from already-existing source
/// values, so the provenance graph cannot contain cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputedValue {
    pub metric: String,
    pub value: Option<f64>,
    pub unit: String,
    pub formula: String,
    #[serde(default)]
    pub components: HashMap<String, SourceValue>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ComputedValue {
    /// Build a computed value, merging component warnings (in component
    /// insertion order) with locally produced ones, deduplicated.
    pub fn assemble(
        metric: impl Into<String>,
        value: Option<f64>,
        unit: impl Into<String>,
        formula: impl Into<String>,
        components: Vec<(String, SourceValue)>,
        local_warnings: Vec<String>,
    ) -> Arc<Self> {
        let mut warnings: Vec<String> = Vec::new();
        for (_, source) in &components {
            for w in source.warnings() {
                if !warnings.iter().any(|seen| seen == w) {
                    warnings.push(w.clone());
                }
            }
        }
        for w in local_warnings {
            if !warnings.iter().any(|seen| *seen == w) {
                warnings.push(w);
            }
        }

        Arc::new(Self {
            metric: metric.into(),
            value,
            unit: unit.into(),
            formula: formula.into(),
            components: components.into_iter().collect(),
            warnings,
        })
    }
}

// Structural on value/unit/formula; components compare by role and identity.
impl PartialEq for ComputedValue {
    fn eq(&self, other: &Self) -> bool {
        if self.value != other.value || self.unit != other.unit || self.formula != other.formula {
            return false;
        }
        if self.components.len() != other.components.len() {
            return false;
        }
        self.components.iter().all(|(role, source)| {
            other
                .components
                .get(role)
                .is_some_and(|o| source == o)
        })
    }
}

/// Provenance-tagged value: every number in an analysis is one of these
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceValue {
    Market(Arc<MarketValue>),
    Cited(Arc<CitedValue>),
    Computed(Arc<ComputedValue>),
}

impl SourceValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            SourceValue::Market(v) => v.value,
            SourceValue::Cited(v) => v.value,
            SourceValue::Computed(v) => v.value,
        }
    }

    pub fn unit(&self) -> &str {
        match self {
            SourceValue::Market(v) => &v.unit,
            SourceValue::Cited(v) => &v.unit,
            SourceValue::Computed(v) => &v.unit,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            SourceValue::Market(v) => &v.warnings,
            SourceValue::Cited(v) => &v.warnings,
            SourceValue::Computed(v) => &v.warnings,
        }
    }
}

impl PartialEq for SourceValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SourceValue::Market(a), SourceValue::Market(b)) => Arc::ptr_eq(a, b) || **a == **b,
            (SourceValue::Cited(a), SourceValue::Cited(b)) => Arc::ptr_eq(a, b) || **a == **b,
            (SourceValue::Computed(a), SourceValue::Computed(b)) => Arc::ptr_eq(a, b) || **a == **b,
            _ => false,
        }
    }
}

/// Current market data for a single company, fetched as one consistent unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub company_name: Option<String>,
    pub price: Arc<MarketValue>,
    pub shares_outstanding: Arc<MarketValue>,
    pub market_cap: SourceValue,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn market_cap_value(&self) -> Option<f64> {
        self.market_cap.value()
    }
}

/// Which combination of debt concepts feeds the EV bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtMode {
    TotalOnly,
    Split,
    TotalPlusShortTerm,
}

/// Configuration for enterprise value bridge construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvPolicy {
    pub debt_mode: DebtMode,
    pub subtract_cash: bool,
    pub subtract_marketable_securities: bool,
    pub include_leases: bool,
    pub include_preferred: bool,
    pub include_nci: bool,
    pub subtract_equity_method_investments: bool,
}

impl Default for EvPolicy {
    fn default() -> Self {
        Self {
            debt_mode: DebtMode::TotalOnly,
            subtract_cash: true,
            subtract_marketable_securities: true,
            include_leases: false,
            include_preferred: true,
            include_nci: true,
            subtract_equity_method_investments: false,
        }
    }
}

/// Enterprise value bridge with named component slots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvBridge {
    pub equity_value: Option<Arc<ComputedValue>>,
    pub total_debt: Option<Arc<CitedValue>>,
    pub short_term_debt: Option<Arc<CitedValue>>,
    pub cash_and_equivalents: Option<Arc<CitedValue>>,
    pub marketable_securities: Option<Arc<CitedValue>>,
    pub operating_lease_liabilities: Option<Arc<CitedValue>>,
    pub preferred_stock: Option<Arc<CitedValue>>,
    pub noncontrolling_interests: Option<Arc<CitedValue>>,
    pub equity_method_investments: Option<Arc<CitedValue>>,
    pub net_debt: Option<Arc<ComputedValue>>,
    pub enterprise_value: Option<Arc<ComputedValue>>,
}

/// Reporting window selector understood by the SEC provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Ltm,
    LtmMinus1,
    Annual(u32),
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Ltm => write!(f, "ltm"),
            Period::LtmMinus1 => write!(f, "ltm-1"),
            Period::Annual(n) => write!(f, "annual:{n}"),
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ltm" => Ok(Period::Ltm),
            "ltm-1" => Ok(Period::LtmMinus1),
            other => match other.strip_prefix("annual:") {
                Some(n) => n
                    .parse()
                    .map(Period::Annual)
                    .map_err(|_| format!("invalid period selector '{other}'")),
                None => Err(format!("invalid period selector '{other}'")),
            },
        }
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which of a ticker's three data streams produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    SecLtm,
    SecLtmMinus1,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    Upstream,
    Timeout,
    Internal,
}

/// Structured per-stream error descriptor recorded on a ticker's analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub stream: Stream,
    pub kind: StreamErrorKind,
    pub message: String,
}

/// Metric name to cited value, as returned by the SEC provider for one period
pub type SecMetrics = HashMap<String, Arc<CitedValue>>;

/// Metric name to computed value
pub type ComputedMetrics = HashMap<String, Arc<ComputedValue>>;

/// Full analysis result for a single company. Every number is traceable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyAnalysis {
    pub symbol: String,
    pub company_name: String,
    pub cik: String,
    #[serde(default)]
    pub fiscal_year_end: Option<String>,
    pub period: Period,
    pub valuation_timestamp: DateTime<Utc>,
    pub market: Option<MarketSnapshot>,
    #[serde(default)]
    pub sec_ltm: SecMetrics,
    #[serde(default)]
    pub sec_ltm_minus_1: SecMetrics,
    pub ev_bridge: Option<EvBridge>,
    #[serde(default)]
    pub multiples: ComputedMetrics,
    #[serde(default)]
    pub growth: ComputedMetrics,
    #[serde(default)]
    pub operating: ComputedMetrics,
    #[serde(default)]
    pub errors: Vec<StreamError>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
