//! Core data model for comparable-company analysis.
//!
//! Every number in a [`CompanyAnalysis`] traces back to either:
//! - [`MarketValue`]: a data point from a market vendor (Finnhub)
//! - [`CitedValue`]: a data point from an SEC XBRL filing
//! - [`ComputedValue`]: a derived calculation with formula + components

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::Settings;
pub use error::{ConfigError, EngineError, MarketError, SecError};
pub use traits::{SecProvider, SecQueryResult};
pub use types::{
    CitedValue, CompanyAnalysis, ComputedMetrics, ComputedValue, DebtMode, EvBridge, EvPolicy,
    MarketSnapshot, MarketValue, Period, SecMetrics, SourceValue, Stream, StreamError,
    StreamErrorKind,
};
