//! Quota configuration.

use crate::ApiAccount;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Authentication and quota settings.
///
/// ```toml
/// [quota]
/// active_requests = 100
/// admit_timeout_secs = 30
/// admins = ["melanie"]
///
/// [[quota.accounts]]
/// name = "melanie"
/// token_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// rpm = 600
///
/// [quota.limited_users]
/// freeloader = ["instagram"]
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
pub struct QuotaConfig {
    /// Statically configured accounts
    #[serde(default)]
    #[builder(default)]
    accounts: Vec<ApiAccount>,

    /// Requests in flight across all accounts
    #[serde(default = "default_active_requests")]
    #[builder(default = "default_active_requests()")]
    active_requests: usize,

    /// Longest wait for a global or platform slot (seconds)
    #[serde(default = "default_admit_timeout_secs")]
    #[builder(default = "default_admit_timeout_secs()")]
    admit_timeout_secs: u64,

    /// Accounts allowed to call admin routes
    #[serde(default = "default_admins")]
    #[builder(default = "default_admins()")]
    admins: Vec<String>,

    /// Longest accepted command prefix for bot-facing settings
    #[serde(default = "default_max_prefix_length")]
    #[builder(default = "default_max_prefix_length()")]
    max_prefix_length: usize,

    /// Accounts restricted to one concurrent request on the listed platforms
    #[serde(default)]
    #[builder(default)]
    limited_users: HashMap<String, Vec<String>>,
}

fn default_active_requests() -> usize {
    100
}

fn default_admit_timeout_secs() -> u64 {
    30
}

fn default_admins() -> Vec<String> {
    vec!["melanie".to_string()]
}

fn default_max_prefix_length() -> usize {
    20
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            active_requests: default_active_requests(),
            admit_timeout_secs: default_admit_timeout_secs(),
            admins: default_admins(),
            max_prefix_length: default_max_prefix_length(),
            limited_users: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// Longest wait for a slot.
    pub fn admit_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.admit_timeout_secs)
    }

    /// Whether `account` is restricted on `platform`.
    pub fn is_limited(&self, account: &str, platform: &str) -> bool {
        self.limited_users
            .get(account)
            .is_some_and(|platforms| platforms.iter().any(|p| p.eq_ignore_ascii_case(platform)))
    }

    /// Whether `account` may call admin routes.
    pub fn is_admin(&self, account: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(account))
    }
}
