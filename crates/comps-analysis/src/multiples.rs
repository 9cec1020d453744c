//! Valuation multiples: EV-based and equity-based, currency-gated.

use std::sync::Arc;

use comps_core::{ComputedMetrics, ComputedValue, EvBridge, MarketSnapshot, SecMetrics, SourceValue};

use crate::utils::{
    compute_adjusted_ebitda, compute_free_cash_flow, currency_mismatch_warning,
    detect_sec_currency, extract_sec_value,
};

/// Divide with missing/zero/non-finite protection. Negative denominators
/// compute through with a warning so loss-makers keep their sign.
fn safe_divide(
    metric: &str,
    formula: &str,
    unit: &str,
    num_val: Option<f64>,
    den_val: Option<f64>,
    num_src: Option<SourceValue>,
    den_src: Option<SourceValue>,
) -> Arc<ComputedValue> {
    let mut components: Vec<(String, SourceValue)> = Vec::new();
    if let Some(src) = num_src {
        components.push(("numerator".to_string(), src));
    }
    if let Some(src) = den_src {
        components.push(("denominator".to_string(), src));
    }

    let mut warnings = Vec::new();
    let value = match (num_val, den_val) {
        (None, _) => {
            warnings.push("Numerator unavailable".to_string());
            None
        }
        (_, None) => {
            warnings.push("Denominator unavailable".to_string());
            None
        }
        (Some(_), Some(d)) if d == 0.0 => {
            warnings.push("Denominator is zero".to_string());
            None
        }
        (Some(n), Some(d)) if !n.is_finite() || !d.is_finite() => {
            warnings.push("Non-finite operand".to_string());
            None
        }
        (Some(n), Some(d)) => {
            if d < 0.0 {
                warnings.push(format!("Negative denominator ({d}); result may be misleading"));
            }
            Some(n / d)
        }
    };

    ComputedValue::assemble(metric, value, unit, formula, components, warnings)
}

/// A structurally complete but null metric for pairs that cannot mix a USD
/// market side with a non-USD cited side.
fn blocked_for_currency(
    metric: &str,
    formula: &str,
    unit: &str,
    ccy: &str,
    num_src: Option<SourceValue>,
    den_src: Option<SourceValue>,
) -> Arc<ComputedValue> {
    let mut components: Vec<(String, SourceValue)> = Vec::new();
    if let Some(src) = num_src {
        components.push(("numerator".to_string(), src));
    }
    if let Some(src) = den_src {
        components.push(("denominator".to_string(), src));
    }

    ComputedValue::assemble(
        metric,
        None,
        unit,
        formula,
        components,
        vec![currency_mismatch_warning(ccy)],
    )
}

/// Compute EV-based and equity-based valuation multiples plus yields.
///
/// Every multiple mixes a market-side number with a cited denominator, so a
/// non-USD filing currency nulls all of them.
pub fn compute_multiples(
    ev_bridge: &EvBridge,
    market: &MarketSnapshot,
    sec_metrics: &SecMetrics,
) -> ComputedMetrics {
    let mut result = ComputedMetrics::new();

    let ev_src = ev_bridge
        .enterprise_value
        .clone()
        .map(SourceValue::Computed);
    let ev_val = ev_src.as_ref().and_then(|s| s.value());
    let mcap_src = market.market_cap.clone();
    let mcap_val = mcap_src.value();
    let price_src = SourceValue::Market(market.price.clone());
    let price_val = market.price.value;

    let (sec_currency, _) = detect_sec_currency(sec_metrics);
    let mismatch_ccy = sec_currency.filter(|c| c != "USD");

    let adjusted_ebitda = compute_adjusted_ebitda(sec_metrics);
    if !adjusted_ebitda.components.is_empty() {
        result.insert("adjusted_ebitda".to_string(), adjusted_ebitda.clone());
    }
    let fcf = compute_free_cash_flow(sec_metrics);
    let fcf_val = fcf.as_ref().and_then(|cv| cv.value);
    let fcf_src = fcf.map(SourceValue::Computed);

    // (name, formula, denominator value, denominator source)
    let mut ev_denominators: Vec<(&str, &str, Option<f64>, Option<SourceValue>)> = Vec::new();
    for (name, key, formula) in [
        ("ev_revenue", "revenue", "enterprise_value / revenue"),
        ("ev_ebitda_gaap", "ebitda", "enterprise_value / ebitda"),
        ("ev_ebit", "operating_income", "enterprise_value / operating_income"),
    ] {
        let (val, src) = extract_sec_value(sec_metrics, key);
        ev_denominators.push((name, formula, val, src.map(SourceValue::Cited)));
    }
    ev_denominators.push((
        "ev_ebitda",
        "enterprise_value / adjusted_ebitda",
        adjusted_ebitda.value,
        Some(SourceValue::Computed(adjusted_ebitda)),
    ));
    ev_denominators.push((
        "ev_fcf",
        "enterprise_value / free_cash_flow",
        fcf_val,
        fcf_src.clone(),
    ));

    for (name, formula, den_val, den_src) in ev_denominators {
        let cv = match &mismatch_ccy {
            Some(ccy) => blocked_for_currency(name, formula, "x", ccy, ev_src.clone(), den_src),
            None => safe_divide(name, formula, "x", ev_val, den_val, ev_src.clone(), den_src),
        };
        result.insert(name.to_string(), cv);
    }

    for (name, key, formula) in [
        ("pe", "net_income", "market_cap / net_income"),
        ("pb", "stockholders_equity", "market_cap / stockholders_equity"),
    ] {
        let (den_val, den_src) = extract_sec_value(sec_metrics, key);
        let den_src = den_src.map(SourceValue::Cited);
        let cv = match &mismatch_ccy {
            Some(ccy) => {
                blocked_for_currency(name, formula, "x", ccy, Some(mcap_src.clone()), den_src)
            }
            None => safe_divide(
                name,
                formula,
                "x",
                mcap_val,
                den_val,
                Some(mcap_src.clone()),
                den_src,
            ),
        };
        result.insert(name.to_string(), cv);
    }

    // Yields: cited numerator over market denominator, decimal fractions.
    let fcf_yield = match &mismatch_ccy {
        Some(ccy) => blocked_for_currency(
            "fcf_yield",
            "free_cash_flow / market_cap",
            "%",
            ccy,
            fcf_src.clone(),
            Some(mcap_src.clone()),
        ),
        None => safe_divide(
            "fcf_yield",
            "free_cash_flow / market_cap",
            "%",
            fcf_val,
            mcap_val,
            fcf_src,
            Some(mcap_src.clone()),
        ),
    };
    result.insert("fcf_yield".to_string(), fcf_yield);

    let (dps_val, dps_src) = extract_sec_value(sec_metrics, "dividends_per_share");
    let dps_src = dps_src.map(SourceValue::Cited);
    let dividend_yield = match &mismatch_ccy {
        Some(ccy) => blocked_for_currency(
            "dividend_yield",
            "dividends_per_share / price",
            "%",
            ccy,
            dps_src,
            Some(price_src),
        ),
        None => safe_divide(
            "dividend_yield",
            "dividends_per_share / price",
            "%",
            dps_val,
            price_val,
            dps_src,
            Some(price_src),
        ),
    };
    result.insert("dividend_yield".to_string(), dividend_yield);

    result
}
