//! Operator configuration.
//!
//! Settings are read from `RRS_`-prefixed environment variables. Nested
//! sections use a double underscore: `RRS_ODOO__URL`, `RRS_PINATA__API_KEY`,
//! `RRS_OPENAI__API_KEY`.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

use rrs_core::{CoreError, FormatRules, Keypair, SingleKeyRule};
use rrs_relay::{SupervisorConfig, REPORT_TOPIC};
use rrs_store::{OdooConfig, PinataConfig, RetryPolicy};

use crate::advisor::OpenAiConfig;
use crate::artifacts::ArtifactConfig;
use crate::ingestor::IngestorConfig;
use crate::reconciler::ReconcilerConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RRS";

/// Everything the operator binary needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Hex seed of the admin identity.
    pub admin_seed: String,

    /// Relay WebSocket URL
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Topic devices publish reports on
    #[serde(default = "default_relay_topic")]
    pub relay_topic: String,

    /// Delay between relay reconnect attempts in seconds
    #[serde(default = "default_relay_reconnect_secs")]
    pub relay_reconnect_secs: u64,

    pub odoo: OdooConfig,

    /// Archival node API URL
    #[serde(default = "default_ipfs_api_url")]
    pub ipfs_api_url: String,

    #[serde(default = "default_ipfs_timeout_secs")]
    pub ipfs_timeout_secs: u64,

    pub pinata: PinataConfig,

    /// Fix suggestions are only requested when this section is present.
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,

    /// Delay between ERP retries in seconds
    #[serde(default = "default_erp_retry_secs")]
    pub erp_retry_secs: u64,

    /// Delay between artifact fetch retries in seconds
    #[serde(default = "default_fetch_retry_secs")]
    pub fetch_retry_secs: u64,

    /// Cap on the time one ERP or fetch call is retried, in seconds; 0 retries forever
    #[serde(default = "default_retry_max_elapsed_secs")]
    pub retry_max_elapsed_secs: u64,

    /// Deadline for one report in seconds; unset means no deadline
    #[serde(default)]
    pub report_timeout_secs: Option<u64>,

    /// Period of the closed-ticket artifact sweep in seconds; 0 disables it
    #[serde(default = "default_ticket_sweep_interval_secs")]
    pub ticket_sweep_interval_secs: u64,

    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,

    #[serde(default = "default_quota_interval_secs")]
    pub quota_interval_secs: u64,

    /// Interpretation of single-key report objects
    #[serde(default)]
    pub single_key_rule: SingleKeyRule,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:8888".to_string()
}

fn default_relay_topic() -> String {
    REPORT_TOPIC.to_string()
}

fn default_relay_reconnect_secs() -> u64 {
    5
}

fn default_ipfs_api_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_ipfs_timeout_secs() -> u64 {
    60
}

fn default_erp_retry_secs() -> u64 {
    5
}

fn default_fetch_retry_secs() -> u64 {
    10
}

fn default_retry_max_elapsed_secs() -> u64 {
    900
}

fn default_ticket_sweep_interval_secs() -> u64 {
    3600
}

fn default_liveness_interval_secs() -> u64 {
    15
}

fn default_quota_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl OperatorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from an environment source.
    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(environment.prefix_separator("_").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// The admin identity.
    pub fn admin_keypair(&self) -> Result<Keypair, CoreError> {
        Keypair::from_seed_hex(&self.admin_seed)
    }

    pub fn artifact_config(&self) -> ArtifactConfig {
        ArtifactConfig {
            fetch_retry: self.retry_policy(self.fetch_retry_secs),
            ..ArtifactConfig::default()
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            retry: self.retry_policy(self.erp_retry_secs),
            ..ReconcilerConfig::default()
        }
    }

    fn retry_policy(&self, delay_secs: u64) -> RetryPolicy {
        let policy = RetryPolicy::unbounded_fixed(Duration::from_secs(delay_secs));
        match self.retry_max_elapsed_secs {
            0 => policy,
            limit => policy.with_max_elapsed(Duration::from_secs(limit)),
        }
    }

    /// Period of the closed-ticket sweep, `None` when disabled.
    pub fn ticket_sweep_interval(&self) -> Option<Duration> {
        (self.ticket_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.ticket_sweep_interval_secs))
    }

    pub fn ingestor_config(&self) -> IngestorConfig {
        IngestorConfig {
            topic: self.relay_topic.clone(),
            report_timeout: self.report_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            liveness_interval: Duration::from_secs(self.liveness_interval_secs),
            quota_interval: Duration::from_secs(self.quota_interval_secs),
        }
    }

    pub fn format_rules(&self) -> FormatRules {
        FormatRules {
            single_key: self.single_key_rule,
        }
    }
}
