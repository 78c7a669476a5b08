//! Weighted four-category risk scoring.
//!
//! Each category sums independent threshold checks without a cap, then the
//! categories are weighted and the total clamped to `[0, 100]`. Scoring is
//! deterministic given `now`, so the same engine serves live cycles and
//! back-tests of stored snapshots.

use campaign_core::config::{BusinessConstants, RiskThresholds};
use campaign_core::types::{FinancialMetrics, MetricsSnapshot, RiskAssessment, RiskLevel};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, Timelike, Utc, Weekday};

pub const FINANCIAL_WEIGHT: f64 = 0.4;
pub const PERFORMANCE_WEIGHT: f64 = 0.3;
pub const OPERATIONAL_WEIGHT: f64 = 0.2;
pub const MARKET_WEIGHT: f64 = 0.1;

/// Unit metadata that is not part of the snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitContext {
    pub age_days: i64,
    pub last_optimized_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Tally {
    score: f64,
    factors: Vec<String>,
    mitigations: Vec<String>,
}

impl Tally {
    fn add(&mut self, points: f64, factor: String, mitigation: &str) {
        self.score += points;
        self.factors.push(factor);
        self.mitigations.push(mitigation.to_string());
    }

    fn merge(&mut self, other: Tally) -> f64 {
        self.factors.extend(other.factors);
        self.mitigations.extend(other.mitigations);
        other.score
    }
}

#[derive(Debug, Clone)]
pub struct RiskEngine {
    thresholds: RiskThresholds,
    business: BusinessConstants,
}

impl RiskEngine {
    pub fn new(thresholds: RiskThresholds, business: BusinessConstants) -> Self {
        Self {
            thresholds,
            business,
        }
    }

    pub fn assess(
        &self,
        snapshot: &MetricsSnapshot,
        financial: &FinancialMetrics,
        context: UnitContext,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let mut all = Tally::default();
        let financial_risk = all.merge(self.financial_risk(financial));
        let performance_risk = all.merge(self.performance_risk(snapshot));
        let operational_risk = all.merge(self.operational_risk(context, now));
        let market_risk = all.merge(self.market_risk(now));

        let weighted = financial_risk * FINANCIAL_WEIGHT
            + performance_risk * PERFORMANCE_WEIGHT
            + operational_risk * OPERATIONAL_WEIGHT
            + market_risk * MARKET_WEIGHT;
        let risk_score = weighted.clamp(0.0, 100.0);

        RiskAssessment {
            unit_id: snapshot.unit_id.clone(),
            financial_risk,
            performance_risk,
            operational_risk,
            market_risk,
            risk_score,
            level: RiskLevel::from_score(risk_score),
            risk_factors: all.factors,
            mitigations: all.mitigations,
            assessed_at: now,
        }
    }

    fn financial_risk(&self, m: &FinancialMetrics) -> Tally {
        let t = &self.thresholds;
        let mut tally = Tally::default();
        // Nothing spent, nothing at risk.
        if m.spend <= 0.0 {
            return tally;
        }

        if m.roas < t.min_roas {
            tally.add(
                30.0,
                format!("Low ROAS: {:.2} (target {:.2})", m.roas, t.target_roas),
                "Optimize audience targeting and creative performance",
            );
        }
        if m.cost_per_acquisition > t.max_cpa {
            tally.add(
                25.0,
                format!(
                    "High CPA: {:.2} {}",
                    m.cost_per_acquisition, self.business.currency
                ),
                "Improve conversion rate through landing page optimization",
            );
        }
        if m.profit_margin < t.min_profit_margin {
            tally.add(
                20.0,
                format!("Low profit margin: {:.1}%", m.profit_margin * 100.0),
                "Review pricing strategy or reduce acquisition costs",
            );
        }
        if m.budget_utilization > t.budget_utilization_critical {
            tally.add(
                15.0,
                format!("Critical budget utilization: {:.1}%", m.budget_utilization),
                "Implement budget pacing controls",
            );
        }
        if m.payback_period_days > self.business.acceptable_payback_days {
            tally.add(
                10.0,
                format!("Long payback period: {:.0} days", m.payback_period_days),
                "Focus on higher-value customer segments",
            );
        }
        tally
    }

    fn performance_risk(&self, s: &MetricsSnapshot) -> Tally {
        let t = &self.thresholds;
        let mut tally = Tally::default();

        if s.impressions > 0 && s.ctr < t.min_ctr {
            tally.add(
                25.0,
                format!("Low CTR: {:.2}%", s.ctr),
                "Refresh creative assets and test new formats",
            );
        }
        if s.cpc > t.max_cpc {
            tally.add(
                20.0,
                format!("High CPC: {:.2} {}", s.cpc, self.business.currency),
                "Optimize bidding strategy and audience targeting",
            );
        }
        if s.frequency > t.max_frequency {
            tally.add(
                20.0,
                format!("High frequency: {:.2}", s.frequency),
                "Expand audience or implement frequency capping",
            );
        }
        if let Some(qs) = s.quality_score {
            if qs < t.min_quality_score {
                tally.add(
                    15.0,
                    format!("Low quality score: {qs:.1}"),
                    "Improve ad relevance and landing page experience",
                );
            }
        }
        tally
    }

    fn operational_risk(&self, ctx: UnitContext, now: DateTime<Utc>) -> Tally {
        let t = &self.thresholds;
        let mut tally = Tally::default();

        let recently_optimized = ctx
            .last_optimized_at
            .map(|at| now - at <= Duration::days(t.stale_optimization_days))
            .unwrap_or(false);

        if ctx.age_days > t.long_running_days && !recently_optimized {
            tally.add(
                15.0,
                format!(
                    "Long-running unit ({} days) without recent optimization",
                    ctx.age_days
                ),
                "Schedule regular creative refreshes",
            );
        }
        if ctx.last_optimized_at.is_none() {
            tally.add(
                10.0,
                "No optimizations recorded".to_string(),
                "Implement regular optimization schedule",
            );
        }
        tally
    }

    fn market_risk(&self, now: DateTime<Utc>) -> Tally {
        let mut tally = Tally::default();
        let local = self.local_time(now);
        let hour = local.hour();

        if hour < self.business.business_hours_start || hour > self.business.business_hours_end {
            tally.add(
                5.0,
                format!("Running outside business hours ({hour:02}:00 local)"),
                "Consider dayparting optimization",
            );
        }
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            tally.add(
                5.0,
                "Weekend traffic typically converts lower".to_string(),
                "Review weekend bid adjustments",
            );
        }
        tally
    }

    fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.business.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        now.with_timezone(&offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::financial::FinancialCalculator;
    use chrono::TimeZone;

    // Wednesday 2024-03-06 12:00 UTC, inside business hours.
    fn weekday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(RiskThresholds::default(), BusinessConstants::default())
    }

    fn healthy_snapshot() -> MetricsSnapshot {
        let mut s = MetricsSnapshot::empty("u1", weekday_noon());
        s.spend = 500.0;
        s.revenue = 3000.0;
        s.conversions = 10;
        s.clicks = 200;
        s.impressions = 10_000;
        s.ctr = 2.0;
        s.cpc = 2.5;
        s.frequency = 1.5;
        s.quality_score = Some(8.0);
        s.daily_budget = 1000.0;
        s
    }

    fn assess(s: &MetricsSnapshot, ctx: UnitContext, now: DateTime<Utc>) -> RiskAssessment {
        let m = FinancialCalculator::new(BusinessConstants::default()).compute(s);
        engine().assess(s, &m, ctx, now)
    }

    fn recently_optimized(now: DateTime<Utc>) -> UnitContext {
        UnitContext {
            age_days: 5,
            last_optimized_at: Some(now - Duration::days(1)),
        }
    }

    #[test]
    fn test_healthy_unit_is_low_risk() {
        let now = weekday_noon();
        let a = assess(&healthy_snapshot(), recently_optimized(now), now);
        assert_eq!(a.risk_score, 0.0);
        assert_eq!(a.level, RiskLevel::Low);
        assert!(a.risk_factors.is_empty());
    }

    #[test]
    fn test_factors_and_mitigations_are_parallel() {
        let now = weekday_noon();
        let mut s = healthy_snapshot();
        s.revenue = 600.0;
        s.cpc = 150.0;
        s.frequency = 4.0;
        let a = assess(&s, UnitContext::default(), now);
        assert_eq!(a.risk_factors.len(), a.mitigations.len());
        assert!(a.risk_factors.iter().any(|f| f.starts_with("Low ROAS")));
        assert!(a.risk_factors.iter().any(|f| f.starts_with("High CPC")));
    }

    #[test]
    fn test_weighting() {
        let now = weekday_noon();
        let mut s = healthy_snapshot();
        // ROAS 1.5 (+30) and a negative margin (+20).
        s.revenue = 750.0;
        s.frequency = 5.0;
        let a = assess(&s, recently_optimized(now), now);
        assert!((a.financial_risk - 50.0).abs() < f64::EPSILON);
        assert!((a.performance_risk - 20.0).abs() < f64::EPSILON);
        assert_eq!(a.operational_risk, 0.0);
        assert_eq!(a.market_risk, 0.0);
        assert!((a.risk_score - (50.0 * 0.4 + 20.0 * 0.3)).abs() < 1e-9);
        assert_eq!(a.level, RiskLevel::Low);
    }

    #[test]
    fn test_everything_firing_stays_in_range() {
        // Saturday 02:00 UTC: outside business hours and on a weekend.
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 2, 0, 0).unwrap();
        let mut s = MetricsSnapshot::empty("u1", now);
        s.spend = 5000.0;
        s.revenue = 1000.0;
        s.conversions = 1;
        s.impressions = 10_000;
        s.clicks = 10;
        s.ctr = 0.1;
        s.cpc = 500.0;
        s.frequency = 6.0;
        s.quality_score = Some(2.0);
        s.daily_budget = 1000.0;
        let ctx = UnitContext {
            age_days: 90,
            last_optimized_at: None,
        };
        let a = assess(&s, ctx, now);
        assert!((a.financial_risk - 100.0).abs() < f64::EPSILON);
        assert!((a.performance_risk - 80.0).abs() < f64::EPSILON);
        assert!((a.operational_risk - 25.0).abs() < f64::EPSILON);
        assert!((a.market_risk - 10.0).abs() < f64::EPSILON);
        assert!(a.risk_score >= 0.0 && a.risk_score <= 100.0);
        assert!((a.risk_score - 70.0).abs() < 1e-9);
        assert_eq!(a.level, RiskLevel::High);
    }

    #[test]
    fn test_zero_spend_has_no_financial_risk() {
        let now = weekday_noon();
        let s = MetricsSnapshot::empty("u1", now);
        let a = assess(&s, recently_optimized(now), now);
        assert_eq!(a.financial_risk, 0.0);
        // No impressions, so CTR is not judged either.
        assert_eq!(a.performance_risk, 0.0);
    }

    #[test]
    fn test_missing_quality_score_is_not_penalized() {
        let now = weekday_noon();
        let mut s = healthy_snapshot();
        s.quality_score = None;
        let a = assess(&s, recently_optimized(now), now);
        assert_eq!(a.performance_risk, 0.0);
    }

    #[test]
    fn test_stale_optimization_on_old_unit() {
        let now = weekday_noon();
        let ctx = UnitContext {
            age_days: 45,
            last_optimized_at: Some(now - Duration::days(10)),
        };
        let a = assess(&healthy_snapshot(), ctx, now);
        assert!((a.operational_risk - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_business_hours_respect_offset() {
        // 12:00 UTC is 17:30 at +05:30, still inside 9..=18.
        let now = weekday_noon();
        let mut business = BusinessConstants::default();
        business.utc_offset_minutes = 330;
        let engine = RiskEngine::new(RiskThresholds::default(), business.clone());
        let s = healthy_snapshot();
        let m = FinancialCalculator::new(business).compute(&s);
        let a = engine.assess(&s, &m, recently_optimized(now), now);
        assert_eq!(a.market_risk, 0.0);

        // 14:00 UTC is 19:30 local.
        let later = now + Duration::hours(2);
        let a = engine.assess(&s, &m, recently_optimized(later), later);
        assert!((a.market_risk - 5.0).abs() < f64::EPSILON);
    }
}
