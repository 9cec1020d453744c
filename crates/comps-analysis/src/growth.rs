//! Year-over-year growth and margin deltas from LTM vs LTM-1 data.

use std::sync::Arc;

use comps_core::{ComputedMetrics, ComputedValue, SecMetrics, SourceValue};

use crate::utils::{resolve_metric, SPLIT_CONTAMINATION_MARKER};

const GROWTH_KEYS: &[&str] = &[
    "revenue",
    "gross_profit",
    "operating_income",
    "ebitda",
    "adjusted_ebitda",
    "net_income",
    "eps_diluted",
    "depreciation_amortization",
    "free_cash_flow",
];

/// Per-share metrics are the only ones a stock split can contaminate.
const PER_SHARE_KEYS: &[&str] = &["eps_diluted"];

/// (output key, margin metric name, numerator metric)
const MARGIN_DELTAS: &[(&str, &str, &str)] = &[
    ("gross_margin_chg", "gross_margin", "gross_profit"),
    ("ebitda_margin_chg", "ebitda_margin", "ebitda"),
    (
        "adjusted_ebitda_margin_chg",
        "adjusted_ebitda_margin",
        "adjusted_ebitda",
    ),
];

fn has_split_marker(source: &SourceValue) -> bool {
    source
        .warnings()
        .iter()
        .any(|w| w.contains(SPLIT_CONTAMINATION_MARKER))
}

fn growth_formula(key: &str) -> String {
    format!("({key}_ltm - {key}_ltm1) / abs({key}_ltm1)")
}

/// Compute YoY growth for the standard metric set plus margin deltas.
///
/// Metrics missing from either period are omitted; data-quality conditions
/// (zero prior, split contamination) produce null-valued entries instead.
pub fn compute_growth(ltm: &SecMetrics, ltm_minus_1: &SecMetrics) -> ComputedMetrics {
    let mut result = ComputedMetrics::new();

    for &key in GROWTH_KEYS {
        let Some((cur_val, cur_src)) = resolve_metric(ltm, key) else {
            continue;
        };
        let Some((prior_val, prior_src)) = resolve_metric(ltm_minus_1, key) else {
            continue;
        };

        let out_key = format!("{key}_yoy");
        let components = vec![
            ("current".to_string(), cur_src.clone()),
            ("prior".to_string(), prior_src.clone()),
        ];

        if PER_SHARE_KEYS.contains(&key)
            && (has_split_marker(&cur_src) || has_split_marker(&prior_src))
        {
            result.insert(
                out_key.clone(),
                ComputedValue::assemble(
                    &out_key,
                    None,
                    "pure",
                    growth_formula(key),
                    components,
                    vec!["skipped: stock split contamination".to_string()],
                ),
            );
            continue;
        }

        let (Some(cur), Some(prior)) = (cur_val, prior_val) else {
            continue;
        };

        if prior == 0.0 {
            result.insert(
                out_key.clone(),
                ComputedValue::assemble(
                    &out_key,
                    None,
                    "pure",
                    growth_formula(key),
                    components,
                    vec!["prior period is zero".to_string()],
                ),
            );
            continue;
        }

        let mut warnings = Vec::new();
        if prior < 0.0 {
            warnings.push(format!(
                "prior period is negative ({prior}); denominator uses absolute value"
            ));
        }

        result.insert(
            out_key.clone(),
            ComputedValue::assemble(
                &out_key,
                Some((cur - prior) / prior.abs()),
                "pure",
                growth_formula(key),
                components,
                warnings,
            ),
        );
    }

    for &(out_key, margin_name, num_key) in MARGIN_DELTAS {
        let Some(current) = period_margin(ltm, margin_name, num_key) else {
            continue;
        };
        let Some(prior) = period_margin(ltm_minus_1, margin_name, num_key) else {
            continue;
        };
        let (Some(cur_m), Some(prior_m)) = (current.value, prior.value) else {
            continue;
        };

        result.insert(
            out_key.to_string(),
            ComputedValue::assemble(
                out_key,
                Some(cur_m - prior_m),
                "pure",
                format!("{margin_name}_ltm - {margin_name}_ltm1"),
                vec![
                    ("current".to_string(), SourceValue::Computed(current)),
                    ("prior".to_string(), SourceValue::Computed(prior)),
                ],
                vec![],
            ),
        );
    }

    result
}

/// One period's margin: numerator over revenue, with the numerator resolved
/// through the same derivation rules as the growth metrics.
fn period_margin(
    metrics: &SecMetrics,
    margin_name: &str,
    num_key: &str,
) -> Option<Arc<ComputedValue>> {
    let (num_val, num_src) = resolve_metric(metrics, num_key)?;
    let (rev_val, rev_src) = resolve_metric(metrics, "revenue")?;

    let num = num_val?;
    let rev = rev_val?;
    if rev == 0.0 {
        return None;
    }

    Some(ComputedValue::assemble(
        margin_name,
        Some(num / rev),
        "pure",
        format!("{num_key} / revenue"),
        vec![
            (num_key.to_string(), num_src),
            ("revenue".to_string(), rev_src),
        ],
        vec![],
    ))
}
