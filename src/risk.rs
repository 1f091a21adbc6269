use serde::{Deserialize, Serialize};

use crate::jupiter::RouteStep;

pub const ROUTE_DIRECT: &str = "Direct";
pub const ROUTE_AGGREGATED: &str = "Aggregated";
pub const ROUTE_SEPARATOR: &str = " → ";

/// Slippage tolerance above which the terminal warns the user.
pub const HIGH_SLIPPAGE_BPS: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactThresholds {
    /// Impact at or above this percent is `Medium`.
    pub medium_pct: f64,
    /// Impact at or above this percent is `High`.
    pub high_pct: f64,
}

impl Default for ImpactThresholds {
    fn default() -> Self {
        Self { medium_pct: 1.0, high_pct: 3.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceImpactAssessment {
    pub value: f64,
    pub severity: Severity,
}

pub fn assess_price_impact(raw: &serde_json::Value) -> PriceImpactAssessment {
    assess_price_impact_with(raw, ImpactThresholds::default())
}

/// Display aid only. Unparsable input reads as 0 so it can never block a trade.
pub fn assess_price_impact_with(raw: &serde_json::Value, thresholds: ImpactThresholds) -> PriceImpactAssessment {
    let parsed = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let value = parsed.filter(|v| v.is_finite()).unwrap_or(0.0);

    let severity = if value >= thresholds.high_pct {
        Severity::High
    } else if value >= thresholds.medium_pct {
        Severity::Medium
    } else {
        Severity::Low
    };
    PriceImpactAssessment { value, severity }
}

pub fn format_route(route_plan: &[RouteStep]) -> String {
    if route_plan.is_empty() {
        return ROUTE_DIRECT.to_string();
    }

    let mut labels: Vec<&str> = Vec::with_capacity(route_plan.len());
    for label in route_plan.iter().filter_map(|s| s.label.as_deref()).map(str::trim) {
        if label.is_empty() || labels.last() == Some(&label) {
            continue;
        }
        labels.push(label);
    }

    if labels.is_empty() {
        ROUTE_AGGREGATED.to_string()
    } else {
        labels.join(ROUTE_SEPARATOR)
    }
}

pub fn slippage_warning(slippage_bps: u16) -> Option<&'static str> {
    (slippage_bps > HIGH_SLIPPAGE_BPS).then_some("High slippage risk")
}
