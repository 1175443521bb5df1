//! Request admission.

use crate::{AccountLimiter, ApiAccount, QuotaConfig, hash_token};
use meridian_error::{ApiError, ApiErrorKind, JsonError, MeridianResult};
use meridian_kv::SharedKv;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Hash of runtime-registered accounts, `name -> ApiAccount` JSON.
const ACCOUNTS_KEY: &str = "api_accounts";

fn disabled_key(platform: &str, account: &str) -> String {
    format!("platform_disabled:{}:{}", platform.to_ascii_lowercase(), account)
}

/// Slots held by an admitted request. Dropping it frees them.
#[derive(Debug)]
pub struct QuotaPermit {
    account: String,
    platform: Option<String>,
    _global: OwnedSemaphorePermit,
    _platform: Option<OwnedSemaphorePermit>,
}

impl QuotaPermit {
    /// Account the request runs as.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Platform slot held, if any.
    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }
}

/// Authenticates API tokens and admits requests under the account's quotas.
pub struct QuotaGate {
    kv: SharedKv,
    config: QuotaConfig,
    global: Arc<Semaphore>,
    limiters: Mutex<HashMap<String, Arc<AccountLimiter>>>,
}

impl std::fmt::Debug for QuotaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGate")
            .field("config", &self.config)
            .field("available", &self.global.available_permits())
            .finish_non_exhaustive()
    }
}

impl QuotaGate {
    /// Create a gate.
    pub fn new(kv: SharedKv, config: QuotaConfig) -> Self {
        tracing::info!(
            accounts = config.accounts().len(),
            active_requests = config.active_requests(),
            "Creating quota gate"
        );
        let global = Arc::new(Semaphore::new((*config.active_requests()).max(1)));
        Self {
            kv,
            config,
            global,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Gate configuration.
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Resolve an `Authorization` header value to an account.
    #[tracing::instrument(skip_all)]
    pub async fn authenticate(&self, header: Option<&str>) -> MeridianResult<ApiAccount> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::new(ApiErrorKind::Unauthorized))?;

        if let Some(account) = self.config.accounts().iter().find(|a| a.matches_token(token)) {
            tracing::debug!(account = %account.name(), "Authenticated configured account");
            return Ok(account.clone());
        }

        let digest = hash_token(token);
        for (name, raw) in self.kv.hgetall(ACCOUNTS_KEY).await? {
            match serde_json::from_str::<ApiAccount>(&raw) {
                Ok(account) if account.token_sha256().eq_ignore_ascii_case(&digest) => {
                    tracing::debug!(account = %name, "Authenticated registered account");
                    return Ok(account);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(account = %name, error = %e, "Skipping undecodable account"),
            }
        }

        tracing::info!("Rejected unknown API token");
        Err(ApiError::new(ApiErrorKind::Unauthorized).into())
    }

    /// Register or replace a runtime account.
    pub async fn register_account(&self, account: &ApiAccount) -> MeridianResult<()> {
        let raw = serde_json::to_string(account).map_err(|e| JsonError::new(e.to_string()))?;
        self.kv.hset(ACCOUNTS_KEY, account.name(), &raw).await?;
        self.limiters.lock().remove(account.name());
        tracing::info!(account = %account.name(), "Registered API account");
        Ok(())
    }

    fn limiter_for(&self, account: &ApiAccount) -> Arc<AccountLimiter> {
        self.limiters
            .lock()
            .entry(account.name().clone())
            .or_insert_with(|| {
                let restricted = self
                    .config
                    .limited_users()
                    .get(account.name())
                    .cloned()
                    .unwrap_or_default();
                Arc::new(AccountLimiter::new(
                    *account.rpm(),
                    account.platform_limits().clone(),
                    restricted,
                ))
            })
            .clone()
    }

    /// Admit a request for `account`, optionally against `platform`.
    ///
    /// Scope, kill-switch and per-minute checks fail fast. The platform slot
    /// is taken before the global one, so requests queued on a saturated
    /// platform hold no global slot. Each wait is bounded by the configured
    /// admit timeout.
    #[tracing::instrument(skip(self, account), fields(account = %account.name()))]
    pub async fn admit(
        &self,
        account: &ApiAccount,
        platform: Option<&str>,
    ) -> MeridianResult<QuotaPermit> {
        if let Some(platform) = platform {
            if !account.allows(platform) {
                return Err(ApiError::new(ApiErrorKind::Forbidden(format!(
                    "{} is not allowed on {}",
                    account.name(),
                    platform
                )))
                .into());
            }
            if self.kv.exists(&disabled_key(platform, account.name())).await? {
                tracing::info!(platform, "Platform disabled for account");
                return Err(ApiError::new(ApiErrorKind::QuotaExceeded(format!(
                    "{} disabled for {}",
                    platform,
                    account.name()
                )))
                .into());
            }
        }

        let limiter = self.limiter_for(account);
        if !limiter.check_rate() {
            tracing::info!("Requests per minute exceeded");
            return Err(ApiError::new(ApiErrorKind::QuotaExceeded(format!(
                "rate limit for {}",
                account.name()
            )))
            .into());
        }

        let wait = self.config.admit_timeout();
        let platform_permit = match platform {
            Some(platform) => Some(
                tokio::time::timeout(wait, limiter.acquire_platform(platform))
                    .await
                    .map_err(|_| {
                        tracing::info!(platform, "Timed out waiting for a platform slot");
                        ApiError::new(ApiErrorKind::QuotaExceeded(format!("{} busy", platform)))
                    })?
                    .ok_or_else(|| {
                        ApiError::new(ApiErrorKind::QuotaExceeded(format!("{} closed", platform)))
                    })?,
            ),
            None => None,
        };

        let global = tokio::time::timeout(wait, self.global.clone().acquire_owned())
            .await
            .map_err(|_| {
                tracing::info!("Timed out waiting for a global slot");
                ApiError::new(ApiErrorKind::QuotaExceeded("server busy".into()))
            })?
            .map_err(|_| ApiError::new(ApiErrorKind::QuotaExceeded("gate closed".into())))?;

        Ok(QuotaPermit {
            account: account.name().clone(),
            platform: platform.map(str::to_string),
            _global: global,
            _platform: platform_permit,
        })
    }

    /// Whether `account` may call admin routes.
    pub fn is_admin(&self, account: &ApiAccount) -> bool {
        self.config.is_admin(account.name())
    }

    /// Disable `platform` for `account` for `ttl`, or until re-enabled.
    pub async fn disable_platform(
        &self,
        account: &str,
        platform: &str,
        ttl: Option<Duration>,
    ) -> MeridianResult<()> {
        self.kv.set(&disabled_key(platform, account), "1", ttl).await?;
        tracing::warn!(account, platform, ttl_secs = ttl.map(|t| t.as_secs()), "Platform disabled");
        Ok(())
    }

    /// Lift a platform kill switch. Returns whether one was set.
    pub async fn enable_platform(&self, account: &str, platform: &str) -> MeridianResult<bool> {
        let removed = self.kv.del(&disabled_key(platform, account)).await?;
        tracing::info!(account, platform, removed, "Platform enabled");
        Ok(removed)
    }

    /// Free global slots.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }
}
