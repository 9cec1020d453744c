//! Operating efficiency ratios and per-share metrics.
//!
//! Everything here is SEC-only arithmetic except the share count behind
//! `revenue_per_share`, so cross-currency filers keep their ratios.

use std::sync::Arc;

use comps_core::{ComputedMetrics, ComputedValue, MarketSnapshot, SecMetrics, SourceValue};

use crate::utils::{currency_of_unit, extract_sec_value, resolve_metric};

/// (output name, numerator metric resolved through derivation rules)
const REVENUE_RATIOS: &[(&str, &str)] = &[
    ("gross_margin", "gross_profit"),
    ("ebitda_margin", "ebitda"),
    ("adjusted_ebitda_margin", "adjusted_ebitda"),
    ("net_margin", "net_income"),
    ("fcf_margin", "free_cash_flow"),
    ("rd_to_revenue", "rd_expense"),
    ("sga_to_revenue", "sga_expense"),
    ("capex_to_revenue", "capex"),
];

pub fn compute_operating(
    sec_metrics: &SecMetrics,
    market: Option<&MarketSnapshot>,
    tax_rate: f64,
) -> ComputedMetrics {
    let mut result = ComputedMetrics::new();

    let (rev_val, rev_src) = extract_sec_value(sec_metrics, "revenue");

    if let (Some(rev), Some(rev_src)) = (rev_val, &rev_src) {
        if rev != 0.0 {
            for &(name, num_key) in REVENUE_RATIOS {
                let Some((num_val, num_src)) = resolve_metric(sec_metrics, num_key) else {
                    continue;
                };
                let Some(num) = num_val else {
                    continue;
                };
                result.insert(
                    name.to_string(),
                    ComputedValue::assemble(
                        name,
                        Some(num / rev),
                        "pure",
                        format!("{num_key} / revenue"),
                        vec![
                            (num_key.to_string(), num_src),
                            ("revenue".to_string(), SourceValue::Cited(rev_src.clone())),
                        ],
                        vec![],
                    ),
                );
            }
        }
    }

    // Revenue per share: SEC revenue over the vendor share count. The unit
    // follows the filing currency; crossing currencies warns but computes.
    if let (Some(rev), Some(rev_src), Some(market)) = (rev_val, &rev_src, market) {
        let shares = &market.shares_outstanding;
        if let Some(share_count) = shares.value.filter(|s| *s > 0.0) {
            let ccy = currency_of_unit(&rev_src.unit).unwrap_or("USD");
            let warnings = (ccy != "USD")
                .then(|| format!("cross-context: SEC {ccy} revenue vs market share count"))
                .into_iter()
                .collect();
            result.insert(
                "revenue_per_share".to_string(),
                ComputedValue::assemble(
                    "revenue_per_share",
                    Some(rev / share_count),
                    format!("{ccy}/shares"),
                    "revenue / shares_outstanding",
                    vec![
                        ("revenue".to_string(), SourceValue::Cited(rev_src.clone())),
                        (
                            "shares_outstanding".to_string(),
                            SourceValue::Market(shares.clone()),
                        ),
                    ],
                    warnings,
                ),
            );
        }
    }

    if let Some(roic) = compute_roic(sec_metrics, tax_rate) {
        result.insert("roic".to_string(), roic);
    }

    result
}

/// ROIC approximation: NOPAT over book invested capital. Zero or negative
/// invested capital leaves the metric out.
fn compute_roic(sec_metrics: &SecMetrics, tax_rate: f64) -> Option<Arc<ComputedValue>> {
    let (oi_val, oi_src) = extract_sec_value(sec_metrics, "operating_income");
    let (debt_val, debt_src) = extract_sec_value(sec_metrics, "total_debt");
    let (eq_val, eq_src) = extract_sec_value(sec_metrics, "stockholders_equity");

    let (oi, debt, eq) = (oi_val?, debt_val?, eq_val?);
    let invested_capital = debt + eq;
    if invested_capital <= 0.0 {
        return None;
    }

    let nopat = oi * (1.0 - tax_rate);
    Some(ComputedValue::assemble(
        "roic",
        Some(nopat / invested_capital),
        "pure",
        format!("operating_income * (1 - {tax_rate}) / (total_debt + stockholders_equity)"),
        vec![
            (
                "operating_income".to_string(),
                SourceValue::Cited(oi_src?.clone()),
            ),
            ("total_debt".to_string(), SourceValue::Cited(debt_src?.clone())),
            (
                "stockholders_equity".to_string(),
                SourceValue::Cited(eq_src?.clone()),
            ),
        ],
        vec![format!(
            "ROIC uses assumed {:.0}% tax rate; actual rate may differ",
            tax_rate * 100.0
        )],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use comps_core::{CitedValue, MarketValue};

    fn cited(metric: &str, value: f64, unit: &str) -> Arc<CitedValue> {
        Arc::new(CitedValue {
            metric: metric.to_string(),
            value: Some(value),
            unit: unit.to_string(),
            concept: "TestConcept".to_string(),
            fiscal_year: Some(2025),
            fiscal_period: Some("FY".to_string()),
            period_end: None,
            form_type: Some("10-K".to_string()),
            filed: None,
            accession: None,
            cik: None,
            filing_url: None,
            warnings: vec![],
        })
    }

    fn metrics(entries: &[(&str, f64)]) -> SecMetrics {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), cited(k, *v, "USD")))
            .collect()
    }

    fn snapshot(shares: f64) -> MarketSnapshot {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).unwrap();
        let price = Arc::new(MarketValue {
            metric: "price".to_string(),
            value: Some(100.0),
            unit: "USD".to_string(),
            vendor: "finnhub".to_string(),
            symbol: "TEST".to_string(),
            endpoint: "quote".to_string(),
            as_of: None,
            fetched_at: now,
            raw: None,
            warnings: vec![],
            notes: vec![],
        });
        let shares_mv = Arc::new(MarketValue {
            metric: "shares_outstanding".to_string(),
            value: Some(shares),
            unit: "shares".to_string(),
            vendor: "finnhub".to_string(),
            symbol: "TEST".to_string(),
            endpoint: "profile".to_string(),
            as_of: None,
            fetched_at: now,
            raw: None,
            warnings: vec![],
            notes: vec![],
        });
        let market_cap = SourceValue::Computed(ComputedValue::assemble(
            "market_cap",
            Some(100.0 * shares),
            "USD",
            "price * shares_outstanding",
            vec![
                ("price".to_string(), SourceValue::Market(price.clone())),
                ("shares_outstanding".to_string(), SourceValue::Market(shares_mv.clone())),
            ],
            vec![],
        ));
        MarketSnapshot {
            symbol: "TEST".to_string(),
            company_name: Some("Test Corp".to_string()),
            price,
            shares_outstanding: shares_mv,
            market_cap,
            fetched_at: now,
        }
    }

    #[test]
    fn expense_ratios() {
        let sec = metrics(&[
            ("revenue", 1_000_000.0),
            ("rd_expense", 150_000.0),
            ("sga_expense", 200_000.0),
            ("capex", 100_000.0),
        ]);
        let result = compute_operating(&sec, None, 0.21);

        assert!((result["rd_to_revenue"].value.unwrap() - 0.15).abs() < 1e-9);
        assert!((result["sga_to_revenue"].value.unwrap() - 0.20).abs() < 1e-9);
        assert!((result["capex_to_revenue"].value.unwrap() - 0.10).abs() < 1e-9);
        assert_eq!(result["rd_to_revenue"].unit, "pure");
    }

    #[test]
    fn margins_from_derived_inputs() {
        let sec = metrics(&[
            ("revenue", 20.0e9),
            ("cost_of_revenue", 6.0e9),
            ("ebitda", 6.0e9),
            ("operating_income", 5.0e9),
            ("depreciation_amortization", 1.0e9),
            ("stock_based_compensation", 0.5e9),
            ("net_income", 3.0e9),
            ("free_cash_flow", 4.0e9),
        ]);
        let result = compute_operating(&sec, None, 0.21);

        // Gross margin derives from revenue - cost_of_revenue even without a
        // reported gross_profit tag.
        assert!((result["gross_margin"].value.unwrap() - 0.70).abs() < 1e-9);
        let gp = match &result["gross_margin"].components["gross_profit"] {
            SourceValue::Computed(cv) => cv,
            other => panic!("expected derived gross profit, got {other:?}"),
        };
        assert_eq!(gp.formula, "revenue - cost_of_revenue");

        assert!((result["ebitda_margin"].value.unwrap() - 0.30).abs() < 1e-9);
        // Adjusted: (5 + 1 + 0.5) / 20 = 0.325
        assert!((result["adjusted_ebitda_margin"].value.unwrap() - 0.325).abs() < 1e-9);
        assert!((result["net_margin"].value.unwrap() - 0.15).abs() < 1e-9);
        assert!((result["fcf_margin"].value.unwrap() - 0.20).abs() < 1e-9);
    }

    #[test]
    fn sbc_heavy_adjusted_margin_exceeds_gaap() {
        let sec = metrics(&[
            ("revenue", 2.6e9),
            ("ebitda", 0.3e9),
            ("operating_income", 0.2e9),
            ("depreciation_amortization", 0.1e9),
            ("stock_based_compensation", 0.6e9),
        ]);
        let result = compute_operating(&sec, None, 0.21);
        assert!(
            result["adjusted_ebitda_margin"].value.unwrap()
                > result["ebitda_margin"].value.unwrap()
        );
    }

    #[test]
    fn missing_revenue_skips_ratios() {
        let sec = metrics(&[("rd_expense", 150_000.0)]);
        let result = compute_operating(&sec, None, 0.21);
        assert!(result.is_empty());
    }

    #[test]
    fn zero_revenue_skips_ratios() {
        let sec = metrics(&[("revenue", 0.0), ("rd_expense", 150_000.0)]);
        let result = compute_operating(&sec, None, 0.21);
        assert!(!result.contains_key("rd_to_revenue"));
    }

    #[test]
    fn missing_ebitda_skips_its_margin() {
        let sec = metrics(&[("revenue", 1_000_000.0), ("net_income", 100_000.0)]);
        let result = compute_operating(&sec, None, 0.21);
        assert!(!result.contains_key("ebitda_margin"));
        assert!(!result.contains_key("adjusted_ebitda_margin"));
        assert!(result.contains_key("net_margin"));
    }

    #[test]
    fn revenue_per_share_usd() {
        let sec = metrics(&[("revenue", 10_000_000.0)]);
        let result = compute_operating(&sec, Some(&snapshot(1_000_000.0)), 0.21);

        let cv = &result["revenue_per_share"];
        assert!((cv.value.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(cv.unit, "USD/shares");
        assert!(cv.warnings.is_empty());
    }

    #[test]
    fn revenue_per_share_cross_currency_warns_but_computes() {
        let mut sec = SecMetrics::new();
        sec.insert("revenue".to_string(), cited("revenue", 10_000_000.0, "JPY"));
        let result = compute_operating(&sec, Some(&snapshot(1_000_000.0)), 0.21);

        let cv = &result["revenue_per_share"];
        assert_eq!(cv.unit, "JPY/shares");
        assert!((cv.value.unwrap() - 10.0).abs() < 1e-9);
        assert!(cv
            .warnings
            .iter()
            .any(|w| w.contains("cross-context: SEC JPY revenue vs market share count")));
    }

    #[test]
    fn revenue_per_share_needs_market() {
        let sec = metrics(&[("revenue", 10_000_000.0)]);
        let result = compute_operating(&sec, None, 0.21);
        assert!(!result.contains_key("revenue_per_share"));
    }

    #[test]
    fn roic_basic() {
        let sec = metrics(&[
            ("revenue", 10_000_000.0),
            ("operating_income", 2_000_000.0),
            ("total_debt", 3_000_000.0),
            ("stockholders_equity", 7_000_000.0),
        ]);
        let result = compute_operating(&sec, None, 0.21);

        // 2M * 0.79 / 10M = 0.158
        assert!((result["roic"].value.unwrap() - 0.158).abs() < 1e-9);
        assert!(result["roic"]
            .warnings
            .iter()
            .any(|w| w.contains("assumed 21% tax rate")));
    }

    #[test]
    fn roic_respects_tax_rate_parameter() {
        let sec = metrics(&[
            ("operating_income", 1_000_000.0),
            ("total_debt", 0.0),
            ("stockholders_equity", 10_000_000.0),
        ]);
        let result = compute_operating(&sec, None, 0.30);
        assert!((result["roic"].value.unwrap() - 0.07).abs() < 1e-9);
        assert!(result["roic"].formula.contains("(1 - 0.3)"));
    }

    #[test]
    fn roic_skipped_on_non_positive_invested_capital() {
        let sec = metrics(&[
            ("operating_income", 2_000_000.0),
            ("total_debt", 500_000.0),
            ("stockholders_equity", -1_000_000.0),
        ]);
        let result = compute_operating(&sec, None, 0.21);
        assert!(!result.contains_key("roic"));
    }

    #[test]
    fn cross_currency_does_not_block_operating_ratios() {
        let mut sec = SecMetrics::new();
        sec.insert("revenue".to_string(), cited("revenue", 20.0e9, "BRL"));
        sec.insert("rd_expense".to_string(), cited("rd_expense", 2.0e9, "BRL"));
        let result = compute_operating(&sec, None, 0.21);
        assert!((result["rd_to_revenue"].value.unwrap() - 0.10).abs() < 1e-9);
    }
}
