//! Browser pool configuration.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Credentials of a third-party account the pool logs contexts into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct BrowserAccount {
    /// Pool-wide name; also the key of the stored session
    name: String,
    /// Login username
    username: String,
    /// Login password
    password: String,
}

impl BrowserAccount {
    /// Create an account.
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Configuration for the context pool.
///
/// ```toml
/// [browser]
/// endpoint = "http://127.0.0.1:9222"
/// per_account = 2
/// global_limit = 12
/// proxies = ["socks5://10.0.0.2:1080"]
///
/// [[browser.accounts]]
/// name = "ig1"
/// username = "someone"
/// password = "hunter2"
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
pub struct BrowserConfig {
    /// DevTools HTTP endpoint; `None` disables browser-backed fetchers
    #[serde(default)]
    #[builder(default)]
    endpoint: Option<String>,

    /// Concurrent borrows per account
    #[serde(default = "default_per_account")]
    #[builder(default = "default_per_account()")]
    per_account: usize,

    /// Concurrent borrows across the whole pool
    #[serde(default = "default_global_limit")]
    #[builder(default = "default_global_limit()")]
    global_limit: usize,

    /// Proxy servers, one anonymous context each
    #[serde(default)]
    #[builder(default)]
    proxies: Vec<String>,

    /// Concurrent pages per proxy context
    #[serde(default = "default_proxy_pages")]
    #[builder(default = "default_proxy_pages()")]
    proxy_pages: usize,

    /// Deadline for obtaining a page (seconds)
    #[serde(default = "default_borrow_timeout_secs")]
    #[builder(default = "default_borrow_timeout_secs()")]
    borrow_timeout_secs: u64,

    /// Accounts contexts are logged into
    #[serde(default)]
    #[builder(default)]
    accounts: Vec<BrowserAccount>,

    /// Bounds of the randomized session save interval (seconds)
    #[serde(default = "default_save_interval_secs")]
    #[builder(default = "default_save_interval_secs()")]
    save_interval_secs: (u64, u64),
}

fn default_per_account() -> usize {
    2
}

fn default_global_limit() -> usize {
    12
}

fn default_proxy_pages() -> usize {
    5
}

fn default_borrow_timeout_secs() -> u64 {
    90
}

fn default_save_interval_secs() -> (u64, u64) {
    (200, 300)
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            per_account: default_per_account(),
            global_limit: default_global_limit(),
            proxies: Vec::new(),
            proxy_pages: default_proxy_pages(),
            borrow_timeout_secs: default_borrow_timeout_secs(),
            accounts: Vec::new(),
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

impl BrowserConfig {
    /// Borrow deadline.
    pub fn borrow_timeout(&self) -> Duration {
        Duration::from_secs(self.borrow_timeout_secs)
    }

    /// Credentials for a named account.
    pub fn account(&self, name: &str) -> Option<&BrowserAccount> {
        self.accounts.iter().find(|a| a.name() == name)
    }
}
