use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

const ENV_PREFIX: &str = "VISIBILITY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub gateway_url: String,
    pub gateway_token: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub db_path: String,
    pub default_user_id: String,
    pub admin_emails: Vec<String>,
    pub extension_id: Option<String>,
    pub log_level: String,
    pub scan: ScanTimings,
    pub limits: Limits,
}

/// Timer settings for scan polling, rescans and gateway requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTimings {
    pub poll_interval_ms: u64,
    pub display_tick_ms: u64,
    pub hard_timeout_ms: u64,
    pub prompt_delay_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_prompts: usize,
    pub history_cap: usize,
    pub audit_daily_limit: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:3000".to_string(),
            gateway_token: None,
            supabase_url: None,
            supabase_key: None,
            db_path: "visibility.db".to_string(),
            default_user_id: "local".to_string(),
            admin_emails: Vec::new(),
            extension_id: None,
            log_level: "info".to_string(),
            scan: ScanTimings::default(),
            limits: Limits::default(),
        }
    }
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 15_000,
            display_tick_ms: 1_000,
            hard_timeout_ms: 180_000,
            prompt_delay_ms: 1_500,
            request_timeout_ms: 120_000,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_prompts: 10,
            history_cap: 20,
            audit_daily_limit: 2,
        }
    }
}

impl ScanTimings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn display_tick(&self) -> Duration {
        Duration::from_millis(self.display_tick_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    pub fn prompt_delay(&self) -> Duration {
        Duration::from_millis(self.prompt_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl AppConfig {
    /// Defaults, then the optional file, then `VISIBILITY__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("admin_emails")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn is_admin(&self, email: Option<&str>) -> bool {
        match email {
            Some(email) => {
                let email = email.trim().to_lowercase();
                self.admin_emails.iter().any(|a| a.trim().to_lowercase() == email)
            }
            None => false,
        }
    }
}
