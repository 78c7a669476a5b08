//! Snapshot to financial metrics. Pure; every ratio with a zero denominator
//! resolves to 0 and every overflowing result saturates at the largest
//! finite value, so the metrics always serialize.

use campaign_core::config::BusinessConstants;
use campaign_core::types::{saturate, FinancialMetrics, MetricsSnapshot};

/// Days a customer takes to pay back their acquisition cost are expressed
/// over a 30-day month.
const PAYBACK_MONTH_DAYS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct FinancialCalculator {
    business: BusinessConstants,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        saturate(numerator / denominator)
    } else {
        0.0
    }
}

impl FinancialCalculator {
    pub fn new(business: BusinessConstants) -> Self {
        Self { business }
    }

    pub fn compute(&self, snapshot: &MetricsSnapshot) -> FinancialMetrics {
        let spend = snapshot.spend;
        let revenue = snapshot.revenue;
        let margin = self.business.profit_margin;
        let ltv = self.business.target_lifetime_value;
        let daily_budget = snapshot.daily_budget;

        let roas = ratio(revenue, spend);
        let roi = saturate(ratio(revenue - spend, spend) * 100.0);
        let net_profit = saturate(revenue * margin - spend);
        let cost_per_acquisition = ratio(spend, snapshot.conversions as f64);
        let payback_period_days =
            saturate(ratio(cost_per_acquisition, ltv * margin) * PAYBACK_MONTH_DAYS);

        FinancialMetrics {
            spend,
            revenue,
            roas,
            roi,
            net_profit,
            profit_margin: ratio(net_profit, revenue),
            cost_per_acquisition,
            lifetime_value: ltv,
            payback_period_days,
            budget_utilization: saturate(ratio(spend, daily_budget) * 100.0),
            daily_budget,
            remaining_budget: (daily_budget - spend).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(spend: f64, revenue: f64, conversions: u64, budget: f64) -> MetricsSnapshot {
        let mut s = MetricsSnapshot::empty("u1", Utc::now());
        s.spend = spend;
        s.revenue = revenue;
        s.conversions = conversions;
        s.daily_budget = budget;
        s
    }

    fn calc() -> FinancialCalculator {
        FinancialCalculator::new(BusinessConstants::default())
    }

    #[test]
    fn test_zero_spend_yields_zeros() {
        let m = calc().compute(&snapshot(0.0, 0.0, 0, 0.0));
        for v in [m.roas, m.roi, m.cost_per_acquisition, m.budget_utilization] {
            assert_eq!(v, 0.0);
            assert!(v.is_finite());
        }
        assert_eq!(m.payback_period_days, 0.0);
        assert_eq!(m.profit_margin, 0.0);
    }

    #[test]
    fn test_zero_spend_with_revenue_is_finite() {
        let m = calc().compute(&snapshot(0.0, 500.0, 3, 1000.0));
        assert_eq!(m.roas, 0.0);
        assert_eq!(m.roi, 0.0);
        assert_eq!(m.budget_utilization, 0.0);
        assert!((m.remaining_budget - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_standard_metrics() {
        let m = calc().compute(&snapshot(1000.0, 6000.0, 10, 1000.0));
        assert!((m.roas - 6.0).abs() < f64::EPSILON);
        assert!((m.roi - 500.0).abs() < 1e-9);
        // 6000 * 0.40 - 1000
        assert!((m.net_profit - 1400.0).abs() < 1e-9);
        assert!((m.cost_per_acquisition - 100.0).abs() < f64::EPSILON);
        assert!((m.budget_utilization - 100.0).abs() < f64::EPSILON);
        assert_eq!(m.remaining_budget, 0.0);
        // 100 / (7500 * 0.4) * 30
        assert!((m.payback_period_days - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_conversions_cpa_and_payback() {
        let m = calc().compute(&snapshot(300.0, 0.0, 0, 1000.0));
        assert_eq!(m.cost_per_acquisition, 0.0);
        assert_eq!(m.payback_period_days, 0.0);
        assert!((m.net_profit + 300.0).abs() < f64::EPSILON);
        assert!((m.budget_utilization - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_overflowing_ratios_saturate() {
        let m = calc().compute(&snapshot(1e-300, 1e10, 1, 1e-300));
        for v in [
            m.roas,
            m.roi,
            m.net_profit,
            m.profit_margin,
            m.payback_period_days,
            m.budget_utilization,
        ] {
            assert!(v.is_finite());
        }
        assert_eq!(m.roas, f64::MAX);
        assert_eq!(m.roi, f64::MAX);
    }
}
