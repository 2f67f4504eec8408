//! Controller configuration
//!
//! Loaded from an optional `aegis-controller.{toml,yaml,json}` file and
//! `AEGIS_*` environment variables. Only `baseline_policy` is required.

use anyhow::{bail, Context, Result};
use controller_lib::baseline::{BaselineConfig, BaselinePolicy};
use controller_lib::collector::{
    QuerySet, DEFAULT_LATENCY_P95_QUERY, DEFAULT_MEMORY_QUERY, DEFAULT_REQUEST_RATE_QUERY,
};
use controller_lib::detector::DetectorConfig;
use controller_lib::model::IsolationForestConfig;
use controller_lib::notifier::WEBHOOK_URL_ENV;
use controller_lib::remediation::{ControlPlane, KubeControlPlane, KubectlControlPlane};
use controller_lib::{RemediationAction, WorkloadRef};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Prometheus base URL
    #[serde(default = "default_metrics_url")]
    pub metrics_url: String,

    #[serde(default = "default_target_deployment")]
    pub target_deployment: String,

    #[serde(default = "default_target_namespace")]
    pub target_namespace: String,

    /// Warm-up sampling attempts
    #[serde(default = "default_baseline_samples")]
    pub baseline_samples: usize,

    #[serde(default = "default_baseline_interval")]
    pub baseline_interval_secs: u64,

    #[serde(default = "default_min_baseline_samples")]
    pub min_baseline_samples: usize,

    /// `strict` or `patient`; no default
    pub baseline_policy: String,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// `scale` or `restart`
    #[serde(default = "default_remediation_action")]
    pub remediation_action: String,

    #[serde(default = "default_scale_replicas")]
    pub scale_replicas: u32,

    /// `api` or `kubectl`
    #[serde(default = "default_control_plane")]
    pub control_plane: String,

    #[serde(default = "default_kubectl_path")]
    pub kubectl_path: String,

    /// Incident webhook; falls back to `SLACK_WEBHOOK_URL`
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,

    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,

    #[serde(default = "default_contamination")]
    pub contamination: f64,

    #[serde(default = "default_model_seed")]
    pub model_seed: u64,

    #[serde(default = "default_query_request_rate")]
    pub query_request_rate: String,

    #[serde(default = "default_query_latency_p95")]
    pub query_latency_p95: String,

    #[serde(default = "default_query_memory")]
    pub query_memory: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_metrics_url() -> String {
    "http://monitoring-kube-prometheus-prometheus.aegisops.svc.cluster.local:9090".to_string()
}

fn default_target_deployment() -> String {
    "aegisops-app".to_string()
}

fn default_target_namespace() -> String {
    "aegisops".to_string()
}

fn default_baseline_samples() -> usize {
    controller_lib::baseline::DEFAULT_BASELINE_SAMPLES
}

fn default_baseline_interval() -> u64 {
    5
}

fn default_min_baseline_samples() -> usize {
    controller_lib::baseline::MIN_BASELINE_SAMPLES
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_cooldown() -> u64 {
    120
}

fn default_remediation_action() -> String {
    "scale".to_string()
}

fn default_scale_replicas() -> u32 {
    4
}

fn default_control_plane() -> String {
    "api".to_string()
}

fn default_kubectl_path() -> String {
    "kubectl".to_string()
}

fn default_query_timeout() -> u64 {
    5
}

fn default_notify_timeout() -> u64 {
    5
}

fn default_dispatch_timeout() -> u64 {
    10
}

fn default_contamination() -> f64 {
    controller_lib::model::DEFAULT_CONTAMINATION
}

fn default_model_seed() -> u64 {
    controller_lib::model::DEFAULT_SEED
}

fn default_query_request_rate() -> String {
    DEFAULT_REQUEST_RATE_QUERY.to_string()
}

fn default_query_latency_p95() -> String {
    DEFAULT_LATENCY_P95_QUERY.to_string()
}

fn default_query_memory() -> String {
    DEFAULT_MEMORY_QUERY.to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl ControllerConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("aegis-controller").required(false))
            .add_source(config::Environment::with_prefix("AEGIS"))
            .build()
            .context("failed to read controller configuration")?;

        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        let parsed: Self = config
            .try_deserialize()
            .context("invalid controller configuration (is AEGIS_BASELINE_POLICY set?)")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject malformed values up front instead of at first use
    fn validate(&self) -> Result<()> {
        self.policy()?;
        self.fitter()?;
        match self.remediation_action.trim() {
            "scale" | "restart" => {}
            other => bail!("unknown remediation_action {:?}, expected \"scale\" or \"restart\"", other),
        }
        match self.control_plane.trim() {
            "api" | "kubectl" => {}
            other => bail!("unknown control_plane {:?}, expected \"api\" or \"kubectl\"", other),
        }
        if self.min_baseline_samples == 0 {
            bail!("min_baseline_samples must be at least 1");
        }
        Ok(())
    }

    pub fn policy(&self) -> Result<BaselinePolicy> {
        self.baseline_policy
            .parse()
            .context("invalid baseline_policy")
    }

    pub fn target(&self) -> WorkloadRef {
        WorkloadRef::new(&self.target_deployment, &self.target_namespace)
    }

    pub fn baseline(&self) -> Result<BaselineConfig> {
        let mut baseline = BaselineConfig::new(self.policy()?);
        baseline.attempts = self.baseline_samples;
        baseline.interval = Duration::from_secs(self.baseline_interval_secs);
        baseline.min_samples = self.min_baseline_samples;
        Ok(baseline)
    }

    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig {
            monitor_interval: Duration::from_secs(self.monitor_interval_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn fitter(&self) -> Result<IsolationForestConfig> {
        let fitter = IsolationForestConfig::default()
            .with_contamination(self.contamination)
            .with_seed(self.model_seed);
        fitter.validate().context("invalid model configuration")?;
        Ok(fitter)
    }

    pub fn queries(&self) -> QuerySet {
        QuerySet {
            request_rate: self.query_request_rate.clone(),
            latency_p95: self.query_latency_p95.clone(),
            memory: self.query_memory.clone(),
        }
    }

    /// Remediation to perform; `None` disables remediation
    pub fn action(&self) -> Option<RemediationAction> {
        let target = self.target();
        match self.remediation_action.trim() {
            "restart" => Some(RemediationAction::RestartDeployment { target }),
            _ => match NonZeroU32::new(self.scale_replicas) {
                Some(replicas) => Some(RemediationAction::ScaleDeployment { target, replicas }),
                None => {
                    warn!("scale_replicas is 0, remediation disabled (notifications only)");
                    None
                }
            },
        }
    }

    pub fn control_plane(&self) -> Arc<dyn ControlPlane> {
        match self.control_plane.trim() {
            "kubectl" => Arc::new(KubectlControlPlane::new(&self.kubectl_path)),
            _ => Arc::new(KubeControlPlane::new()),
        }
    }

    /// Notification endpoint from configuration or `SLACK_WEBHOOK_URL`
    pub fn webhook(&self) -> Option<Url> {
        resolve_webhook(
            self.webhook_url.as_deref(),
            std::env::var(WEBHOOK_URL_ENV).ok(),
        )
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

fn resolve_webhook(configured: Option<&str>, fallback: Option<String>) -> Option<Url> {
    let raw = configured
        .map(str::to_string)
        .or(fallback)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let Some(raw) = raw else {
        warn!("No webhook URL configured, incident notifications disabled");
        return None;
    };

    match Url::parse(&raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(error = %e, "Invalid webhook URL, incident notifications disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_toml(toml: &str) -> Result<ControllerConfig> {
        let config = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        ControllerConfig::from_config(config)
    }

    #[test]
    fn test_defaults_with_required_policy() {
        let config = from_toml(r#"baseline_policy = "strict""#).unwrap();

        assert_eq!(config.target(), WorkloadRef::new("aegisops-app", "aegisops"));
        assert_eq!(config.cooldown_secs, 120);
        assert_eq!(config.monitor_interval_secs, 10);
        assert_eq!(config.api_port, 8080);

        let baseline = config.baseline().unwrap();
        assert_eq!(baseline.policy, BaselinePolicy::Strict);
        assert_eq!(baseline.attempts, 30);
        assert_eq!(baseline.interval, Duration::from_secs(5));
        assert_eq!(baseline.min_samples, 10);

        assert_eq!(config.queries(), QuerySet::default());
        assert!(matches!(
            config.action(),
            Some(RemediationAction::ScaleDeployment { replicas, .. }) if replicas.get() == 4
        ));
    }

    #[test]
    fn test_missing_policy_is_rejected() {
        assert!(from_toml(r#"cooldown_secs = 60"#).is_err());
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(from_toml(r#"baseline_policy = "lenient""#).is_err());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = from_toml(
            r#"
            baseline_policy = "patient"
            remediation_action = "delete"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("remediation_action"));
    }

    #[test]
    fn test_invalid_contamination_is_rejected() {
        assert!(from_toml(
            r#"
            baseline_policy = "strict"
            contamination = 0.9
            "#,
        )
        .is_err());
    }

    #[test]
    fn test_zero_replicas_disables_remediation() {
        let config = from_toml(
            r#"
            baseline_policy = "strict"
            scale_replicas = 0
            "#,
        )
        .unwrap();
        assert!(config.action().is_none());
    }

    #[test]
    fn test_restart_action() {
        let config = from_toml(
            r#"
            baseline_policy = "patient"
            remediation_action = "restart"
            target_deployment = "checkout"
            target_namespace = "shop"
            "#,
        )
        .unwrap();

        assert_eq!(config.policy().unwrap(), BaselinePolicy::Patient);
        assert_eq!(
            config.action(),
            Some(RemediationAction::RestartDeployment {
                target: WorkloadRef::new("checkout", "shop")
            })
        );
    }

    #[test]
    fn test_webhook_resolution() {
        let configured = resolve_webhook(
            Some("https://hooks.example.com/a"),
            Some("https://hooks.example.com/b".to_string()),
        );
        assert_eq!(configured.unwrap().as_str(), "https://hooks.example.com/a");

        let fallback = resolve_webhook(None, Some("https://hooks.example.com/b".to_string()));
        assert_eq!(fallback.unwrap().as_str(), "https://hooks.example.com/b");

        assert!(resolve_webhook(None, None).is_none());
        assert!(resolve_webhook(Some("  "), None).is_none());
        assert!(resolve_webhook(Some("not a url"), None).is_none());
    }
}
