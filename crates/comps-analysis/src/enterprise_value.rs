//! Enterprise value bridge construction.

use std::sync::Arc;

use comps_core::{
    CitedValue, ComputedValue, DebtMode, EvBridge, EvPolicy, MarketSnapshot, SecMetrics,
    SourceValue,
};

use crate::utils::{detect_sec_currency, extract_sec_value};

struct BridgeAccumulator {
    ev: f64,
    formula_parts: Vec<String>,
    components: Vec<(String, SourceValue)>,
    warnings: Vec<String>,
}

impl BridgeAccumulator {
    fn apply(&mut self, role: &str, value: f64, source: &Arc<CitedValue>, sign: f64) {
        self.ev += sign * value;
        let operator = if sign > 0.0 { "+" } else { "-" };
        self.formula_parts.push(format!("{operator} {role}"));
        self.components
            .push((role.to_string(), SourceValue::Cited(source.clone())));
    }
}

/// Construct an enterprise value bridge from market + SEC data.
///
/// EV = market_cap + debt-like claims - cash-like offsets, per policy.
/// Missing cited components contribute zero; a missing market cap or a
/// non-USD filing currency leaves the whole bridge null.
pub fn build_ev_bridge(
    market: &MarketSnapshot,
    sec_metrics: &SecMetrics,
    policy: &EvPolicy,
) -> EvBridge {
    let mut bridge = EvBridge::default();

    bridge.equity_value = Some(ComputedValue::assemble(
        "equity_value",
        market.market_cap_value(),
        "USD",
        "market_cap",
        vec![("market_cap".to_string(), market.market_cap.clone())],
        vec![],
    ));

    let (sec_currency, currency_warning) = detect_sec_currency(sec_metrics);
    if let Some(ccy) = sec_currency.filter(|c| c != "USD") {
        bridge.enterprise_value = Some(ComputedValue::assemble(
            "enterprise_value",
            None,
            "USD",
            "market_cap + debt - cash + adjustments",
            vec![],
            vec![format!(
                "EV bridge blocked: SEC currency {ccy} \u{2260} USD market"
            )],
        ));
        return bridge;
    }

    let Some(mcap) = market.market_cap_value() else {
        bridge.enterprise_value = Some(ComputedValue::assemble(
            "enterprise_value",
            None,
            "USD",
            "market_cap + debt - cash + adjustments",
            vec![("market_cap".to_string(), market.market_cap.clone())],
            vec!["market cap unavailable; enterprise value not computed".to_string()],
        ));
        return bridge;
    };

    let mut acc = BridgeAccumulator {
        ev: mcap,
        formula_parts: vec!["market_cap".to_string()],
        components: vec![("market_cap".to_string(), market.market_cap.clone())],
        warnings: currency_warning.into_iter().collect(),
    };

    let (debt_val, debt_src) = extract_sec_value(sec_metrics, "total_debt");
    let (short_debt_val, short_debt_src) = extract_sec_value(sec_metrics, "short_term_debt");

    match policy.debt_mode {
        DebtMode::TotalOnly => match (debt_val, &debt_src) {
            (Some(v), Some(src)) => {
                acc.apply("total_debt", v, src, 1.0);
                bridge.total_debt = debt_src.clone();
            }
            _ => acc.warnings.push("total_debt missing, treated as 0".to_string()),
        },
        DebtMode::Split | DebtMode::TotalPlusShortTerm => {
            if let (Some(v), Some(src)) = (debt_val, &debt_src) {
                acc.apply("total_debt", v, src, 1.0);
                bridge.total_debt = debt_src.clone();
            }
            if let (Some(v), Some(src)) = (short_debt_val, &short_debt_src) {
                acc.apply("short_term_debt", v, src, 1.0);
                bridge.short_term_debt = short_debt_src.clone();
            }
            if policy.debt_mode == DebtMode::Split
                && debt_val.is_some()
                && short_debt_val.is_some()
            {
                acc.warnings.push(
                    "split debt mode: verify no overlap between total_debt and short_term_debt"
                        .to_string(),
                );
            }
        }
    }

    let (cash_val, cash_src) = extract_sec_value(sec_metrics, "cash");
    let (ms_val, ms_src) = extract_sec_value(sec_metrics, "marketable_securities");

    if policy.subtract_cash {
        match (cash_val, &cash_src) {
            (Some(v), Some(src)) => {
                acc.apply("cash", v, src, -1.0);
                bridge.cash_and_equivalents = cash_src.clone();
            }
            _ => acc.warnings.push("cash missing, treated as 0".to_string()),
        }
    }

    if policy.subtract_marketable_securities {
        if let (Some(v), Some(src)) = (ms_val, &ms_src) {
            acc.apply("marketable_securities", v, src, -1.0);
            bridge.marketable_securities = ms_src.clone();
        }
    }

    if policy.include_leases {
        let (lease_val, lease_src) = extract_sec_value(sec_metrics, "operating_lease_liabilities");
        match (lease_val, &lease_src) {
            (Some(v), Some(src)) => {
                acc.apply("operating_lease_liabilities", v, src, 1.0);
                bridge.operating_lease_liabilities = lease_src.clone();
            }
            _ => acc
                .warnings
                .push("operating_lease_liabilities requested but missing".to_string()),
        }
    }

    if policy.include_preferred {
        let (pref_val, pref_src) = extract_sec_value(sec_metrics, "preferred_stock");
        if let (Some(v), Some(src)) = (pref_val, &pref_src) {
            acc.apply("preferred_stock", v, src, 1.0);
            bridge.preferred_stock = pref_src.clone();
        }
    }

    if policy.include_nci {
        let (nci_val, nci_src) = extract_sec_value(sec_metrics, "noncontrolling_interests");
        if let (Some(v), Some(src)) = (nci_val, &nci_src) {
            acc.apply("noncontrolling_interests", v, src, 1.0);
            bridge.noncontrolling_interests = nci_src.clone();
        }
    }

    if policy.subtract_equity_method_investments {
        let (emi_val, emi_src) = extract_sec_value(sec_metrics, "equity_method_investments");
        if let (Some(v), Some(src)) = (emi_val, &emi_src) {
            acc.apply("equity_method_investments", v, src, -1.0);
            bridge.equity_method_investments = emi_src.clone();
        }
    }

    // Net debt is informational: gross debt per debt mode, minus cash-like
    // balances, independent of the subtract flags.
    let mut debt_total = debt_val.unwrap_or(0.0);
    if policy.debt_mode != DebtMode::TotalOnly {
        debt_total += short_debt_val.unwrap_or(0.0);
    }
    let cash_total = cash_val.unwrap_or(0.0) + ms_val.unwrap_or(0.0);

    let mut net_debt_components: Vec<(String, SourceValue)> = Vec::new();
    for (role, src) in [
        ("total_debt", &debt_src),
        ("short_term_debt", &short_debt_src),
        ("cash", &cash_src),
        ("marketable_securities", &ms_src),
    ] {
        if let Some(src) = src {
            net_debt_components.push((role.to_string(), SourceValue::Cited(src.clone())));
        }
    }
    bridge.net_debt = Some(ComputedValue::assemble(
        "net_debt",
        Some(debt_total - cash_total),
        "USD",
        "total_debt - cash - marketable_securities",
        net_debt_components,
        vec![],
    ));

    tracing::debug!(
        symbol = %market.symbol,
        ev = acc.ev,
        formula = %acc.formula_parts.join(" "),
        "assembled EV bridge"
    );

    bridge.enterprise_value = Some(ComputedValue::assemble(
        "enterprise_value",
        Some(acc.ev),
        "USD",
        acc.formula_parts.join(" "),
        acc.components,
        acc.warnings,
    ));

    bridge
}
