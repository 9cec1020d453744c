//! Shared helpers: SEC value extraction, currency detection, derived metrics.

use std::sync::Arc;

use comps_core::{CitedValue, ComputedValue, SecMetrics, SourceValue};

/// Marker attached by the XBRL library when an LTM-derived value diverges
/// from the latest annual by more than the split-detection threshold.
pub const SPLIT_CONTAMINATION_MARKER: &str = "Possible stock split contamination";

/// Relative tolerance for derived-vs-reported cross-checks.
const CROSS_CHECK_TOLERANCE: f64 = 0.01;

/// Look up a cited metric by normalized name. Absent entries are not errors.
pub fn extract_sec_value(
    metrics: &SecMetrics,
    name: &str,
) -> (Option<f64>, Option<Arc<CitedValue>>) {
    match metrics.get(name) {
        Some(cv) => (cv.value, Some(cv.clone())),
        None => (None, None),
    }
}

/// Currency code of a unit string: `"USD"` and `"JPY/shares"` carry one,
/// `"shares"` / `"pure"` / `"x"` do not.
pub fn currency_of_unit(unit: &str) -> Option<&str> {
    let code = unit.split('/').next().unwrap_or("");
    (code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())).then_some(code)
}

/// True when a cited value is denominated in something other than the USD
/// the market side quotes in.
pub fn is_cross_currency(sec_value: &CitedValue) -> bool {
    currency_of_unit(&sec_value.unit).is_some_and(|c| c != "USD")
}

/// Majority currency across the cited metrics, with a warning when a filing
/// mixes currency codes. Returns `None` when no cited value carries one.
pub fn detect_sec_currency(metrics: &SecMetrics) -> (Option<String>, Option<String>) {
    let mut keys: Vec<&String> = metrics.keys().collect();
    keys.sort();

    let mut counts: Vec<(String, usize)> = Vec::new();
    for key in keys {
        let Some(code) = currency_of_unit(&metrics[key].unit) else {
            continue;
        };
        match counts.iter_mut().find(|(c, _)| c == code) {
            Some((_, n)) => *n += 1,
            None => counts.push((code.to_string(), 1)),
        }
    }

    let Some((majority, _)) = counts.iter().max_by_key(|(_, n)| *n).cloned() else {
        return (None, None);
    };

    let warning = (counts.len() > 1).then(|| {
        let codes: Vec<&str> = counts.iter().map(|(c, _)| c.as_str()).collect();
        format!(
            "mixed SEC currencies ({}); using majority {majority}",
            codes.join(", ")
        )
    });

    (Some(majority), warning)
}

pub fn currency_mismatch_warning(ccy: &str) -> String {
    format!("currency mismatch: {ccy} cited vs USD market")
}

fn cross_check(
    computed: f64,
    reported: Option<&Arc<CitedValue>>,
    metric: &str,
    derivation: &str,
) -> Option<String> {
    let reported = reported?;
    let reported_val = reported.value?;
    if reported_val == 0.0 {
        return None;
    }
    let diff = (computed - reported_val).abs() / reported_val.abs();
    (diff > CROSS_CHECK_TOLERANCE).then(|| {
        format!(
            "derived {metric} differs from reported value by {:.1}% ({derivation} vs {})",
            diff * 100.0,
            reported.concept
        )
    })
}

/// Gross profit: `revenue - cost_of_revenue`, cross-checked against the
/// reported concept, with pass-through of the reported value when the
/// components are unavailable.
pub fn compute_gross_profit(metrics: &SecMetrics) -> Option<Arc<ComputedValue>> {
    let (rev_val, rev_src) = extract_sec_value(metrics, "revenue");
    let (cor_val, cor_src) = extract_sec_value(metrics, "cost_of_revenue");
    let (_, reported) = extract_sec_value(metrics, "gross_profit");

    if let (Some(rev), Some(cor), Some(rev_src), Some(cor_src)) =
        (rev_val, cor_val, &rev_src, &cor_src)
    {
        let value = rev - cor;
        let derivation = format!("{} - {}", rev_src.concept, cor_src.concept);
        let warnings = cross_check(value, reported.as_ref(), "gross_profit", &derivation)
            .into_iter()
            .collect();
        return Some(ComputedValue::assemble(
            "gross_profit",
            Some(value),
            rev_src.unit.clone(),
            "revenue - cost_of_revenue",
            vec![
                ("revenue".to_string(), SourceValue::Cited(rev_src.clone())),
                (
                    "cost_of_revenue".to_string(),
                    SourceValue::Cited(cor_src.clone()),
                ),
            ],
            warnings,
        ));
    }

    let reported = reported?;
    Some(ComputedValue::assemble(
        "gross_profit",
        reported.value,
        reported.unit.clone(),
        "gross_profit",
        vec![(
            "gross_profit".to_string(),
            SourceValue::Cited(reported.clone()),
        )],
        vec!["reported gross_profit used as-is; revenue or cost_of_revenue unavailable".to_string()],
    ))
}

/// Free cash flow: `operating_cash_flow - capex`, cross-checked against the
/// reported concept, falling back to the reported value.
pub fn compute_free_cash_flow(metrics: &SecMetrics) -> Option<Arc<ComputedValue>> {
    let (ocf_val, ocf_src) = extract_sec_value(metrics, "operating_cash_flow");
    let (capex_val, capex_src) = extract_sec_value(metrics, "capex");
    let (_, reported) = extract_sec_value(metrics, "free_cash_flow");

    if let (Some(ocf), Some(capex), Some(ocf_src), Some(capex_src)) =
        (ocf_val, capex_val, &ocf_src, &capex_src)
    {
        let value = ocf - capex;
        let derivation = format!("{} - {}", ocf_src.concept, capex_src.concept);
        let warnings = cross_check(value, reported.as_ref(), "free_cash_flow", &derivation)
            .into_iter()
            .collect();
        return Some(ComputedValue::assemble(
            "free_cash_flow",
            Some(value),
            ocf_src.unit.clone(),
            "operating_cash_flow - capex",
            vec![
                (
                    "operating_cash_flow".to_string(),
                    SourceValue::Cited(ocf_src.clone()),
                ),
                ("capex".to_string(), SourceValue::Cited(capex_src.clone())),
            ],
            warnings,
        ));
    }

    let reported = reported?;
    Some(ComputedValue::assemble(
        "free_cash_flow",
        reported.value,
        reported.unit.clone(),
        "free_cash_flow",
        vec![(
            "free_cash_flow".to_string(),
            SourceValue::Cited(reported.clone()),
        )],
        vec!["reported free_cash_flow used as-is; operating_cash_flow or capex unavailable"
            .to_string()],
    ))
}

/// Adjusted EBITDA: `OI + D&A + SBC`. Missing SBC degrades to GAAP EBITDA
/// with a warning; missing OI or D&A leaves the value null.
pub fn compute_adjusted_ebitda(metrics: &SecMetrics) -> Arc<ComputedValue> {
    let (oi_val, oi_src) = extract_sec_value(metrics, "operating_income");
    let (dna_val, dna_src) = extract_sec_value(metrics, "depreciation_amortization");
    let (sbc_val, sbc_src) = extract_sec_value(metrics, "stock_based_compensation");

    let mut components: Vec<(String, SourceValue)> = Vec::new();
    if let Some(src) = &oi_src {
        components.push(("operating_income".to_string(), SourceValue::Cited(src.clone())));
    }
    if let Some(src) = &dna_src {
        components.push((
            "depreciation_amortization".to_string(),
            SourceValue::Cited(src.clone()),
        ));
    }
    if let Some(src) = &sbc_src {
        components.push((
            "stock_based_compensation".to_string(),
            SourceValue::Cited(src.clone()),
        ));
    }

    let unit = oi_src
        .as_ref()
        .or(dna_src.as_ref())
        .map(|s| s.unit.clone())
        .unwrap_or_else(|| "USD".to_string());

    let mut warnings = Vec::new();
    let value = match (oi_val, dna_val) {
        (Some(oi), Some(dna)) => {
            if sbc_val.is_none() {
                warnings
                    .push("SBC unavailable; adjusted EBITDA ≈ GAAP EBITDA".to_string());
            }
            Some(oi + dna + sbc_val.unwrap_or(0.0))
        }
        _ => {
            warnings.push(
                "operating_income or depreciation_amortization unavailable; adjusted EBITDA not computed"
                    .to_string(),
            );
            None
        }
    };

    ComputedValue::assemble(
        "adjusted_ebitda",
        value,
        unit,
        "OI + D&A + SBC",
        components,
        warnings,
    )
}

/// Resolve a growth/operating input by name, deriving where the metric has a
/// derivation rule and falling back to the cited value otherwise.
pub fn resolve_metric(metrics: &SecMetrics, name: &str) -> Option<(Option<f64>, SourceValue)> {
    match name {
        "gross_profit" => {
            compute_gross_profit(metrics).map(|cv| (cv.value, SourceValue::Computed(cv)))
        }
        "free_cash_flow" => {
            compute_free_cash_flow(metrics).map(|cv| (cv.value, SourceValue::Computed(cv)))
        }
        "adjusted_ebitda" => {
            let cv = compute_adjusted_ebitda(metrics);
            (!cv.components.is_empty())
                .then(|| (cv.value, SourceValue::Computed(cv)))
        }
        _ => metrics
            .get(name)
            .map(|c| (c.value, SourceValue::Cited(c.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn cited(metric: &str, value: Option<f64>, unit: &str) -> Arc<CitedValue> {
        cited_with_concept(metric, value, unit, "TestConcept")
    }

    pub(crate) fn cited_with_concept(
        metric: &str,
        value: Option<f64>,
        unit: &str,
        concept: &str,
    ) -> Arc<CitedValue> {
        Arc::new(CitedValue {
            metric: metric.to_string(),
            value,
            unit: unit.to_string(),
            concept: concept.to_string(),
            fiscal_year: Some(2025),
            fiscal_period: Some("FY".to_string()),
            period_end: None,
            form_type: Some("10-K".to_string()),
            filed: None,
            accession: Some("0000000000-25-000001".to_string()),
            cik: Some("0000012345".to_string()),
            filing_url: None,
            warnings: vec![],
        })
    }

    fn metrics(entries: &[(&str, f64)]) -> SecMetrics {
        metrics_in(entries, "USD")
    }

    fn metrics_in(entries: &[(&str, f64)], unit: &str) -> SecMetrics {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), cited(k, Some(*v), unit)))
            .collect()
    }

    #[test]
    fn extract_missing_returns_none() {
        let m = metrics(&[("revenue", 100.0)]);
        assert_eq!(extract_sec_value(&m, "revenue").0, Some(100.0));
        assert_eq!(extract_sec_value(&m, "ebitda"), (None, None));
    }

    #[test]
    fn currency_parsing() {
        assert_eq!(currency_of_unit("USD"), Some("USD"));
        assert_eq!(currency_of_unit("JPY/shares"), Some("JPY"));
        assert_eq!(currency_of_unit("shares"), None);
        assert_eq!(currency_of_unit("pure"), None);
        assert_eq!(currency_of_unit("x"), None);
        assert_eq!(currency_of_unit("%"), None);
    }

    #[test]
    fn detect_currency_single_code() {
        let m = metrics_in(&[("revenue", 1.0), ("cash", 2.0)], "CNY");
        let (code, warning) = detect_sec_currency(&m);
        assert_eq!(code.as_deref(), Some("CNY"));
        assert!(warning.is_none());
    }

    #[test]
    fn detect_currency_majority_with_warning() {
        let mut m = metrics_in(&[("revenue", 1.0), ("cash", 2.0), ("total_debt", 3.0)], "JPY");
        m.insert("net_income".to_string(), cited("net_income", Some(4.0), "USD"));
        let (code, warning) = detect_sec_currency(&m);
        assert_eq!(code.as_deref(), Some("JPY"));
        assert!(warning.unwrap().contains("mixed SEC currencies"));
    }

    #[test]
    fn detect_currency_ignores_non_currency_units() {
        let mut m = SecMetrics::new();
        m.insert("shares_outstanding".to_string(), cited("shares_outstanding", Some(1.0), "shares"));
        let (code, warning) = detect_sec_currency(&m);
        assert!(code.is_none());
        assert!(warning.is_none());
    }

    #[test]
    fn adjusted_ebitda_full() {
        let m = metrics(&[
            ("operating_income", 500.0),
            ("depreciation_amortization", 100.0),
            ("stock_based_compensation", 50.0),
        ]);
        let cv = compute_adjusted_ebitda(&m);
        assert_eq!(cv.value, Some(650.0));
        assert_eq!(cv.formula, "OI + D&A + SBC");
        assert!(cv.warnings.is_empty());
    }

    #[test]
    fn adjusted_ebitda_missing_sbc_warns() {
        // OI of -44M plus D&A of 55M still yields a usable 11M.
        let m = metrics(&[
            ("operating_income", -44e6),
            ("depreciation_amortization", 55e6),
        ]);
        let cv = compute_adjusted_ebitda(&m);
        assert_eq!(cv.value, Some(11e6));
        assert!(cv
            .warnings
            .iter()
            .any(|w| w.contains("SBC unavailable; adjusted EBITDA ≈ GAAP EBITDA")));
    }

    #[test]
    fn adjusted_ebitda_missing_oi_is_null() {
        let m = metrics(&[("depreciation_amortization", 55e6)]);
        let cv = compute_adjusted_ebitda(&m);
        assert!(cv.value.is_none());
    }

    #[test]
    fn gross_profit_derived_and_cross_checked() {
        let mut m = SecMetrics::new();
        m.insert(
            "revenue".to_string(),
            cited_with_concept("revenue", Some(1_000_000.0), "USD", "Revenues"),
        );
        m.insert(
            "cost_of_revenue".to_string(),
            cited_with_concept(
                "cost_of_revenue",
                Some(400_000.0),
                "USD",
                "CostOfGoodsAndServicesSold",
            ),
        );

        let cv = compute_gross_profit(&m).unwrap();
        assert_eq!(cv.value, Some(600_000.0));
        assert_eq!(cv.formula, "revenue - cost_of_revenue");
        assert!(cv.warnings.is_empty());

        // A divergent reported value earns a cross-check warning naming the
        // concepts involved.
        m.insert(
            "gross_profit".to_string(),
            cited_with_concept("gross_profit", Some(500_000.0), "USD", "GrossProfit"),
        );
        let cv = compute_gross_profit(&m).unwrap();
        assert_eq!(cv.value, Some(600_000.0));
        let warning = cv
            .warnings
            .iter()
            .find(|w| w.contains("differs from reported"))
            .unwrap();
        assert!(warning.contains("CostOfGoodsAndServicesSold"));
        assert!(warning.contains("GrossProfit"));
    }

    #[test]
    fn gross_profit_within_tolerance_no_warning() {
        let m = metrics(&[
            ("revenue", 1_000_000.0),
            ("cost_of_revenue", 400_000.0),
            ("gross_profit", 600_000.0),
        ]);
        let cv = compute_gross_profit(&m).unwrap();
        assert!(!cv.warnings.iter().any(|w| w.contains("differs")));
    }

    #[test]
    fn gross_profit_falls_back_to_reported() {
        let m = metrics(&[("revenue", 1_000_000.0), ("gross_profit", 600_000.0)]);
        let cv = compute_gross_profit(&m).unwrap();
        assert_eq!(cv.value, Some(600_000.0));
        assert!(cv.warnings.iter().any(|w| w.contains("reported")));
    }

    #[test]
    fn gross_profit_missing_everything_is_none() {
        let m = metrics(&[("revenue", 1_000_000.0)]);
        assert!(compute_gross_profit(&m).is_none());
        assert!(compute_gross_profit(&SecMetrics::new()).is_none());
    }

    #[test]
    fn free_cash_flow_derived() {
        let m = metrics(&[("operating_cash_flow", 5_000_000.0), ("capex", 1_500_000.0)]);
        let cv = compute_free_cash_flow(&m).unwrap();
        assert_eq!(cv.value, Some(3_500_000.0));
        assert_eq!(cv.formula, "operating_cash_flow - capex");
    }

    #[test]
    fn free_cash_flow_divergent_reported_warns() {
        let m = metrics(&[
            ("operating_cash_flow", 5_000_000.0),
            ("capex", 1_500_000.0),
            ("free_cash_flow", 2_000_000.0),
        ]);
        let cv = compute_free_cash_flow(&m).unwrap();
        assert_eq!(cv.value, Some(3_500_000.0));
        assert!(cv.warnings.iter().any(|w| w.contains("differs from reported")));
    }

    #[test]
    fn cross_currency_check() {
        assert!(is_cross_currency(&cited("revenue", Some(1.0), "CNY")));
        assert!(is_cross_currency(&cited("eps", Some(1.0), "JPY/shares")));
        assert!(!is_cross_currency(&cited("revenue", Some(1.0), "USD")));
        assert!(!is_cross_currency(&cited("ratio", Some(1.0), "pure")));
    }
}
