//! Orchestrator: concurrent SEC + market fetches into `CompanyAnalysis` values.
//!
//! Per ticker, three streams run concurrently under one shared deadline:
//! SEC metrics for the requested period, SEC metrics for the prior window,
//! and the market snapshot. Whatever settles in time contributes; whatever
//! does not becomes a structured error on that ticker alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{timeout_at, Instant};

use comps_analysis::{build_ev_bridge, compute_growth, compute_multiples, compute_operating};
use comps_core::{
    CompanyAnalysis, EngineError, EvPolicy, MarketSnapshot, Period, SecProvider, SecQueryResult,
    Stream, StreamError, StreamErrorKind,
};
use finnhub_client::MarketClient;


/// Metrics requested from the SEC provider for every ticker and period.
pub const REQUIRED_METRICS: &[&str] = &[
    "revenue",
    "cost_of_revenue",
    "gross_profit",
    "operating_income",
    "net_income",
    "ebitda",
    "depreciation_amortization",
    "stock_based_compensation",
    "eps_diluted",
    "rd_expense",
    "sga_expense",
    "total_assets",
    "total_liabilities",
    "stockholders_equity",
    "cash",
    "total_debt",
    "short_term_debt",
    "marketable_securities",
    "operating_lease_liabilities",
    "preferred_stock",
    "noncontrolling_interests",
    "equity_method_investments",
    "operating_cash_flow",
    "capex",
    "free_cash_flow",
    "shares_outstanding",
    "dividends_per_share",
];

/// Per-invocation knobs for `analyze_comps`.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub period: Period,
    pub ev_policy: EvPolicy,
    pub timeout: Duration,
    pub tax_rate: f64,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            period: Period::Ltm,
            ev_policy: EvPolicy::default(),
            timeout: Duration::from_secs(60),
            tax_rate: 0.21,
        }
    }
}

/// Comparable-company analysis engine.
#[derive(Clone)]
pub struct CompsEngine {
    sec: Arc<dyn SecProvider>,
    market: Arc<MarketClient>,
}

impl CompsEngine {
    pub fn new(sec: Arc<dyn SecProvider>, market: Arc<MarketClient>) -> Self {
        Self { sec, market }
    }

    /// Run full comparable company analysis across tickers.
    ///
    /// Returns one `CompanyAnalysis` per input ticker, in input order.
    /// Failures are isolated per ticker and recorded in its `errors` list;
    /// only an empty ticker list is rejected up front.
    pub async fn analyze_comps(
        &self,
        tickers: &[String],
        options: AnalyzeOptions,
    ) -> Result<Vec<CompanyAnalysis>, EngineError> {
        if tickers.is_empty() {
            return Err(EngineError::InvalidInput(
                "ticker list must contain at least one symbol".to_string(),
            ));
        }

        let valuation_ts = Utc::now();
        let deadline = Instant::now() + options.timeout;

        tracing::info!(
            tickers = tickers.len(),
            period = %options.period,
            timeout_secs = options.timeout.as_secs_f64(),
            "starting comps analysis"
        );

        let futures: Vec<_> = tickers
            .iter()
            .map(|ticker| self.analyze_one(ticker.clone(), &options, deadline, valuation_ts))
            .collect();

        Ok(futures::future::join_all(futures).await)
    }

    async fn analyze_one(
        &self,
        ticker: String,
        options: &AnalyzeOptions,
        deadline: Instant,
        valuation_ts: DateTime<Utc>,
    ) -> CompanyAnalysis {
        // Each stream runs in its own task: a panicking provider is confined
        // to its stream and surfaces as an error entry, not a crash.
        let ltm_task = {
            let sec = self.sec.clone();
            let ticker = ticker.clone();
            let period = options.period;
            tokio::spawn(async move {
                timeout_at(deadline, sec.fetch_metrics(&[ticker], REQUIRED_METRICS, period)).await
            })
        };
        let prior_task = {
            let sec = self.sec.clone();
            let ticker = ticker.clone();
            tokio::spawn(async move {
                timeout_at(
                    deadline,
                    sec.fetch_metrics(&[ticker], REQUIRED_METRICS, Period::LtmMinus1),
                )
                .await
            })
        };
        let market_task = {
            let market = self.market.clone();
            let ticker = ticker.clone();
            tokio::spawn(async move { timeout_at(deadline, market.fetch_snapshot(&ticker)).await })
        };

        let (ltm_res, prior_res, market_res) = tokio::join!(ltm_task, prior_task, market_task);

        let mut errors: Vec<StreamError> = Vec::new();

        let mut ltm_result = settle_stream(ltm_res, Stream::SecLtm, &mut errors)
            .map(|mut by_ticker| by_ticker.remove(&ticker));
        if let Some(None) = ltm_result {
            errors.push(StreamError {
                stream: Stream::SecLtm,
                kind: StreamErrorKind::Upstream,
                message: format!("no SEC data returned for {ticker}"),
            });
            ltm_result = None;
        }
        let ltm_result: Option<SecQueryResult> = ltm_result.flatten();

        let prior_result: Option<SecQueryResult> =
            settle_stream(prior_res, Stream::SecLtmMinus1, &mut errors)
                .and_then(|mut by_ticker| by_ticker.remove(&ticker));

        let market_snapshot: Option<MarketSnapshot> =
            settle_stream(market_res, Stream::Market, &mut errors);

        self.assemble(
            ticker,
            options,
            valuation_ts,
            ltm_result,
            prior_result,
            market_snapshot,
            errors,
        )
    }

    /// Build one `CompanyAnalysis` from whatever the streams delivered.
    /// Analysis steps run in a fixed order; each one that cannot run leaves
    /// its slot empty without blocking the rest.
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        ticker: String,
        options: &AnalyzeOptions,
        valuation_ts: DateTime<Utc>,
        sec_ltm_result: Option<SecQueryResult>,
        sec_prior_result: Option<SecQueryResult>,
        market: Option<MarketSnapshot>,
        errors: Vec<StreamError>,
    ) -> CompanyAnalysis {
        // Name resolution: SEC filing name, then vendor name, then ticker.
        let mut company_name = ticker.clone();
        let mut cik = String::new();
        let mut fiscal_year_end = None;

        if let Some(sec) = &sec_ltm_result {
            company_name = sec.company.clone();
            cik = sec.cik.clone();
            fiscal_year_end = sec.fiscal_year_end.clone();
        } else if let Some(name) = market.as_ref().and_then(|m| m.company_name.clone()) {
            company_name = name;
        }

        let sec_ltm = sec_ltm_result.map(|r| r.metrics).unwrap_or_default();
        let sec_ltm_minus_1 = sec_prior_result.map(|r| r.metrics).unwrap_or_default();

        let ev_bridge = market
            .as_ref()
            .map(|m| build_ev_bridge(m, &sec_ltm, &options.ev_policy));

        let multiples = match (&ev_bridge, &market) {
            (Some(bridge), Some(m)) => compute_multiples(bridge, m, &sec_ltm),
            _ => HashMap::new(),
        };

        let growth = compute_growth(&sec_ltm, &sec_ltm_minus_1);

        let operating = compute_operating(&sec_ltm, market.as_ref(), options.tax_rate);

        if !errors.is_empty() {
            tracing::warn!(ticker = %ticker, errors = errors.len(), "partial analysis");
        }

        CompanyAnalysis {
            symbol: ticker,
            company_name,
            cik,
            fiscal_year_end,
            period: options.period,
            valuation_timestamp: valuation_ts,
            market,
            sec_ltm,
            sec_ltm_minus_1,
            ev_bridge,
            multiples,
            growth,
            operating,
            errors,
            warnings: Vec::new(),
        }
    }
}

/// Collapse the three failure layers of a stream task (panic, deadline,
/// upstream error) into at most one error entry.
fn settle_stream<T, E: std::fmt::Display>(
    result: Result<Result<Result<T, E>, tokio::time::error::Elapsed>, tokio::task::JoinError>,
    stream: Stream,
    errors: &mut Vec<StreamError>,
) -> Option<T> {
    match result {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(upstream))) => {
            errors.push(StreamError {
                stream,
                kind: StreamErrorKind::Upstream,
                message: upstream.to_string(),
            });
            None
        }
        Ok(Err(_elapsed)) => {
            errors.push(StreamError {
                stream,
                kind: StreamErrorKind::Timeout,
                message: "timeout".to_string(),
            });
            None
        }
        Err(join_err) => {
            errors.push(StreamError {
                stream,
                kind: StreamErrorKind::Internal,
                message: join_err.to_string(),
            });
            None
        }
    }
}
