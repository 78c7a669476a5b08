use crate::error::{CampaignError, CampaignResult};
use crate::types::DatePreset;
use serde::Deserialize;
use std::path::Path;

/// Root guard configuration. Loaded from an optional TOML file layered
/// under environment variables with the prefix `CAMPAIGN_GUARD__`.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub rules: OptimizationRules,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub thresholds: RiskThresholds,
    #[serde(default)]
    pub business: BusinessConstants,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub approvals_path: Option<String>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// ROAS bands and budget step sizes driving the decision engine.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationRules {
    #[serde(default = "default_scale_up_roas")]
    pub scale_up_roas: f64,
    #[serde(default = "default_scale_down_roas")]
    pub scale_down_roas: f64,
    #[serde(default = "default_pause_roas")]
    pub pause_roas: f64,
    #[serde(default = "default_emergency_stop_roas")]
    pub emergency_stop_roas: f64,
    /// Percentage, e.g. `20.0` for +20%.
    #[serde(default = "default_scale_up_pct")]
    pub scale_up_pct: f64,
    /// Percentage, e.g. `15.0` for -15%.
    #[serde(default = "default_scale_down_pct")]
    pub scale_down_pct: f64,
    #[serde(default = "default_max_daily_spend_per_unit")]
    pub max_daily_spend_per_unit: f64,
    #[serde(default = "default_min_daily_spend")]
    pub min_daily_spend: f64,
    #[serde(default = "default_min_conversions_for_action")]
    pub min_conversions_for_action: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_actions_per_hour")]
    pub max_actions_per_hour: u32,
    /// Budget changes larger than this percentage need an external approval.
    #[serde(default = "default_large_change_approval_pct")]
    pub large_change_approval_pct: f64,
    #[serde(default = "default_max_actions_per_cycle")]
    pub max_actions_per_cycle: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskThresholds {
    #[serde(default = "default_min_roas")]
    pub min_roas: f64,
    #[serde(default = "default_target_roas")]
    pub target_roas: f64,
    #[serde(default = "default_max_cpa")]
    pub max_cpa: f64,
    #[serde(default = "default_min_profit_margin")]
    pub min_profit_margin: f64,
    #[serde(default = "default_budget_utilization_warning")]
    pub budget_utilization_warning: f64,
    #[serde(default = "default_budget_utilization_critical")]
    pub budget_utilization_critical: f64,
    #[serde(default = "default_min_ctr")]
    pub min_ctr: f64,
    #[serde(default = "default_max_cpc")]
    pub max_cpc: f64,
    #[serde(default = "default_max_frequency")]
    pub max_frequency: f64,
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,
    #[serde(default = "default_spend_anomaly_pct")]
    pub spend_anomaly_pct: f64,
    #[serde(default = "default_conversion_drop_pct")]
    pub conversion_drop_pct: f64,
    #[serde(default = "default_stale_optimization_days")]
    pub stale_optimization_days: i64,
    #[serde(default = "default_long_running_days")]
    pub long_running_days: i64,
    /// Below this ROAS a unit is flagged as losing money.
    #[serde(default = "default_losing_money_roas")]
    pub losing_money_roas: f64,
}

/// Business constants feeding the financial calculator.
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessConstants {
    /// Fraction in (0, 1].
    #[serde(default = "default_profit_margin")]
    pub profit_margin: f64,
    #[serde(default = "default_target_lifetime_value")]
    pub target_lifetime_value: f64,
    #[serde(default = "default_acceptable_payback_days")]
    pub acceptable_payback_days: f64,
    #[serde(default = "default_business_hours_start")]
    pub business_hours_start: u32,
    #[serde(default = "default_business_hours_end")]
    pub business_hours_end: u32,
    /// Offset of the business's local time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between cycles.
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval: u64,
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_execute_timeout_ms")]
    pub execute_timeout_ms: u64,
    #[serde(default)]
    pub date_preset: DatePreset,
    #[serde(default = "default_alert_dedup_window_secs")]
    pub alert_dedup_window_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// Defaults to `<state dir>/backups`.
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    #[serde(default = "default_max_active_alerts")]
    pub max_active_alerts: usize,
    #[serde(default = "default_max_alert_history")]
    pub max_alert_history: usize,
    #[serde(default = "default_max_action_history")]
    pub max_action_history: usize,
    #[serde(default = "default_max_decision_log")]
    pub max_decision_log: usize,
    #[serde(default = "default_max_assessment_history")]
    pub max_assessment_history: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_metrics_dir")]
    pub metrics_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "guard-01".to_string()
}
fn default_scale_up_roas() -> f64 {
    5.0
}
fn default_scale_down_roas() -> f64 {
    3.5
}
fn default_pause_roas() -> f64 {
    3.0
}
fn default_emergency_stop_roas() -> f64 {
    0.8
}
fn default_scale_up_pct() -> f64 {
    20.0
}
fn default_scale_down_pct() -> f64 {
    15.0
}
fn default_max_daily_spend_per_unit() -> f64 {
    12_000.0
}
fn default_min_daily_spend() -> f64 {
    500.0
}
fn default_min_conversions_for_action() -> u64 {
    5
}
fn default_max_actions_per_hour() -> u32 {
    10
}
fn default_large_change_approval_pct() -> f64 {
    50.0
}
fn default_max_actions_per_cycle() -> usize {
    50
}
fn default_min_roas() -> f64 {
    2.0
}
fn default_target_roas() -> f64 {
    4.0
}
fn default_max_cpa() -> f64 {
    500.0
}
fn default_min_profit_margin() -> f64 {
    0.20
}
fn default_budget_utilization_warning() -> f64 {
    80.0
}
fn default_budget_utilization_critical() -> f64 {
    95.0
}
fn default_min_ctr() -> f64 {
    0.8
}
fn default_max_cpc() -> f64 {
    100.0
}
fn default_max_frequency() -> f64 {
    3.0
}
fn default_min_quality_score() -> f64 {
    6.0
}
fn default_spend_anomaly_pct() -> f64 {
    50.0
}
fn default_conversion_drop_pct() -> f64 {
    30.0
}
fn default_stale_optimization_days() -> i64 {
    7
}
fn default_long_running_days() -> i64 {
    30
}
fn default_losing_money_roas() -> f64 {
    1.0
}
fn default_profit_margin() -> f64 {
    0.40
}
fn default_target_lifetime_value() -> f64 {
    7_500.0
}
fn default_acceptable_payback_days() -> f64 {
    30.0
}
fn default_business_hours_start() -> u32 {
    9
}
fn default_business_hours_end() -> u32 {
    18
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_monitoring_interval() -> u64 {
    900
}
fn default_max_concurrency() -> usize {
    8
}
fn default_fetch_timeout_ms() -> u64 {
    30_000
}
fn default_execute_timeout_ms() -> u64 {
    30_000
}
fn default_alert_dedup_window_secs() -> i64 {
    86_400
}
fn default_state_path() -> String {
    "data/guard_state.json".to_string()
}
fn default_backup_retention() -> usize {
    10
}
fn default_max_active_alerts() -> usize {
    100
}
fn default_max_alert_history() -> usize {
    1000
}
fn default_max_action_history() -> usize {
    1000
}
fn default_max_decision_log() -> usize {
    1000
}
fn default_max_assessment_history() -> usize {
    500
}
fn default_metrics_dir() -> String {
    "data/metrics".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for OptimizationRules {
    fn default() -> Self {
        Self {
            scale_up_roas: default_scale_up_roas(),
            scale_down_roas: default_scale_down_roas(),
            pause_roas: default_pause_roas(),
            emergency_stop_roas: default_emergency_stop_roas(),
            scale_up_pct: default_scale_up_pct(),
            scale_down_pct: default_scale_down_pct(),
            max_daily_spend_per_unit: default_max_daily_spend_per_unit(),
            min_daily_spend: default_min_daily_spend(),
            min_conversions_for_action: default_min_conversions_for_action(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_actions_per_hour: default_max_actions_per_hour(),
            large_change_approval_pct: default_large_change_approval_pct(),
            max_actions_per_cycle: default_max_actions_per_cycle(),
        }
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            min_roas: default_min_roas(),
            target_roas: default_target_roas(),
            max_cpa: default_max_cpa(),
            min_profit_margin: default_min_profit_margin(),
            budget_utilization_warning: default_budget_utilization_warning(),
            budget_utilization_critical: default_budget_utilization_critical(),
            min_ctr: default_min_ctr(),
            max_cpc: default_max_cpc(),
            max_frequency: default_max_frequency(),
            min_quality_score: default_min_quality_score(),
            spend_anomaly_pct: default_spend_anomaly_pct(),
            conversion_drop_pct: default_conversion_drop_pct(),
            stale_optimization_days: default_stale_optimization_days(),
            long_running_days: default_long_running_days(),
            losing_money_roas: default_losing_money_roas(),
        }
    }
}

impl Default for BusinessConstants {
    fn default() -> Self {
        Self {
            profit_margin: default_profit_margin(),
            target_lifetime_value: default_target_lifetime_value(),
            acceptable_payback_days: default_acceptable_payback_days(),
            business_hours_start: default_business_hours_start(),
            business_hours_end: default_business_hours_end(),
            utc_offset_minutes: 0,
            currency: default_currency(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: default_monitoring_interval(),
            units: Vec::new(),
            max_concurrency: default_max_concurrency(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            execute_timeout_ms: default_execute_timeout_ms(),
            date_preset: DatePreset::default(),
            alert_dedup_window_secs: default_alert_dedup_window_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            backup_dir: None,
            backup_retention: default_backup_retention(),
            max_active_alerts: default_max_active_alerts(),
            max_alert_history: default_max_alert_history(),
            max_action_history: default_max_action_history(),
            max_decision_log: default_max_decision_log(),
            max_assessment_history: default_max_assessment_history(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            metrics_dir: default_metrics_dir(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            rules: OptimizationRules::default(),
            safety: SafetyConfig::default(),
            thresholds: RiskThresholds::default(),
            business: BusinessConstants::default(),
            monitoring: MonitoringConfig::default(),
            storage: StorageConfig::default(),
            source: SourceConfig::default(),
            approvals_path: None,
            metrics: MetricsConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from an optional TOML file and environment variables.
    /// Environment variables win over file values.
    pub fn load(path: Option<&Path>) -> CampaignResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_GUARD")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("monitoring.units"),
        );

        let config: GuardConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations whose bands or bounds contradict each other.
    pub fn validate(&self) -> CampaignResult<()> {
        let r = &self.rules;
        if !(r.emergency_stop_roas <= r.pause_roas
            && r.pause_roas < r.scale_down_roas
            && r.scale_down_roas < r.scale_up_roas)
        {
            return Err(CampaignError::Config(format!(
                "ROAS bands must satisfy emergency_stop ({}) <= pause ({}) < scale_down ({}) < scale_up ({})",
                r.emergency_stop_roas, r.pause_roas, r.scale_down_roas, r.scale_up_roas
            )));
        }
        if r.scale_up_pct <= 0.0 || r.scale_down_pct <= 0.0 || r.scale_down_pct >= 100.0 {
            return Err(CampaignError::Config(format!(
                "scale_up_pct ({}) must be > 0 and scale_down_pct ({}) must be in (0, 100)",
                r.scale_up_pct, r.scale_down_pct
            )));
        }
        if r.min_daily_spend > r.max_daily_spend_per_unit {
            return Err(CampaignError::Config(format!(
                "min_daily_spend ({}) exceeds max_daily_spend_per_unit ({})",
                r.min_daily_spend, r.max_daily_spend_per_unit
            )));
        }
        let margin = self.business.profit_margin;
        if !(margin > 0.0 && margin <= 1.0) {
            return Err(CampaignError::Config(format!(
                "profit_margin ({margin}) must be in (0, 1]"
            )));
        }
        if self.business.business_hours_start > 23 || self.business.business_hours_end > 23 {
            return Err(CampaignError::Config(
                "business hours must be in 0..=23".to_string(),
            ));
        }
        if self.monitoring.max_concurrency == 0 {
            return Err(CampaignError::Config(
                "monitoring.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.monitoring.monitoring_interval == 0 {
            return Err(CampaignError::Config(
                "monitoring.monitoring_interval must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}
