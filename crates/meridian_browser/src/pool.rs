//! The context pool.

use crate::{
    BrowserConfig, BrowserContext, ContextFactory, ContextSpec, LoginFlow, Page, StorageState,
};
use meridian_error::{BrowserError, BrowserErrorKind, MeridianResult};
use meridian_kv::{KeyedLocks, KvLock, SharedKv};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// KV hash of persisted sessions, `account -> StorageState` JSON.
pub const SESSIONS_KEY: &str = "api_sessions_store2";
/// KV set of accounts taken out of rotation by an operator.
pub const DISABLED_KEY: &str = "disabled_ctx";
const RELOGIN_TTL: Duration = Duration::from_secs(120);
const FLAG_TTL: Duration = Duration::from_secs(3600);

fn flag_key(account: &str) -> String {
    format!("api_flagged_context:{}", account)
}

fn relogin_key(account: &str) -> String {
    format!("relogin:{}", account)
}

fn unavailable(reason: impl Into<String>) -> BrowserError {
    BrowserError::new(BrowserErrorKind::Unavailable(reason.into()))
}

/// A context shared by several borrows, with its own slot limit.
struct Slot {
    permits: Arc<Semaphore>,
    context: tokio::sync::Mutex<Option<Arc<dyn BrowserContext>>>,
    generation: AtomicU64,
}

impl Slot {
    fn new(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(permits.max(1))),
            context: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }
}

/// A page held for the duration of a borrow.
///
/// Dropping the lease closes the page in the background and frees the slot.
pub struct PageLease {
    page: Arc<dyn Page>,
    account: Option<String>,
    generation: u64,
    _global: OwnedSemaphorePermit,
    _slot: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PageLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageLease")
            .field("account", &self.account)
            .field("generation", &self.generation)
            .finish()
    }
}

impl PageLease {
    /// The borrowed page.
    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }

    /// Account whose context the page belongs to.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }
}

impl std::ops::Deref for PageLease {
    type Target = dyn Page;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        let page = self.page.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = page.close().await {
                    tracing::debug!(error = %e, "Closing borrowed page failed");
                }
            });
        }
    }
}

/// Pool of browser contexts borrowed by fetchers.
pub struct ContextPool {
    factory: Arc<dyn ContextFactory>,
    kv: SharedKv,
    config: BrowserConfig,
    login: Option<Arc<dyn LoginFlow>>,
    global: Arc<Semaphore>,
    accounts: Mutex<HashMap<String, Arc<Slot>>>,
    anonymous: Arc<Slot>,
    proxies: Vec<(String, Arc<Slot>)>,
    next_proxy: AtomicUsize,
    relogins: KeyedLocks,
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("config", &self.config)
            .field("available", &self.global.available_permits())
            .finish_non_exhaustive()
    }
}

impl ContextPool {
    /// Create a pool. Contexts are created lazily on first borrow.
    pub fn new(
        factory: Arc<dyn ContextFactory>,
        kv: SharedKv,
        config: BrowserConfig,
        login: Option<Arc<dyn LoginFlow>>,
    ) -> Self {
        tracing::info!(
            accounts = config.accounts().len(),
            proxies = config.proxies().len(),
            global_limit = config.global_limit(),
            "Creating browser context pool"
        );
        let proxies = config
            .proxies()
            .iter()
            .map(|p| (p.clone(), Slot::new(*config.proxy_pages())))
            .collect();
        Self {
            factory,
            kv,
            global: Arc::new(Semaphore::new((*config.global_limit()).max(1))),
            accounts: Mutex::new(HashMap::new()),
            anonymous: Slot::new(*config.global_limit()),
            proxies,
            next_proxy: AtomicUsize::new(0),
            relogins: KeyedLocks::new(),
            login,
            config,
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    fn account_slot(&self, account: &str) -> Arc<Slot> {
        self.accounts
            .lock()
            .entry(account.to_string())
            .or_insert_with(|| Slot::new(*self.config.per_account()))
            .clone()
    }

    /// Whether an account is currently out of rotation.
    pub async fn is_unavailable(&self, account: &str) -> MeridianResult<bool> {
        Ok(self.kv.exists(&flag_key(account)).await?
            || self.kv.sismember(DISABLED_KEY, account).await?)
    }

    /// Borrow a page.
    ///
    /// With an account, the page runs in that account's authenticated
    /// context; with `proxy`, in the next proxy context; otherwise in a shared
    /// anonymous context. The whole acquisition is bounded by the borrow
    /// timeout.
    #[tracing::instrument(skip(self))]
    pub async fn borrow(&self, account: Option<&str>, proxy: bool) -> MeridianResult<PageLease> {
        let timeout = self.config.borrow_timeout();
        match tokio::time::timeout(timeout, self.borrow_inner(account, proxy)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Borrow timed out");
                Err(BrowserError::new(BrowserErrorKind::Timeout(format!(
                    "borrow for {}",
                    account.unwrap_or("anonymous")
                )))
                .into())
            }
        }
    }

    /// Borrow a page from the configured account with the most free slots.
    pub async fn borrow_any_account(&self) -> MeridianResult<PageLease> {
        let mut best: Option<(String, usize)> = None;
        for account in self.config.accounts() {
            let name = account.name();
            if self.is_unavailable(name).await? {
                continue;
            }
            let free = self.account_slot(name).permits.available_permits();
            if best.as_ref().is_none_or(|(_, f)| free > *f) {
                best = Some((name.clone(), free));
            }
        }
        let (name, _) = best.ok_or_else(|| unavailable("no usable account"))?;
        self.borrow(Some(&name), false).await
    }

    async fn borrow_inner(&self, account: Option<&str>, proxy: bool) -> MeridianResult<PageLease> {
        if let Some(account) = account {
            if self.is_unavailable(account).await? {
                return Err(unavailable(format!("{} is flagged or disabled", account)).into());
            }
        }

        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| unavailable("pool closed"))?;

        let (slot, spec) = match (account, proxy) {
            (Some(account), _) => (
                self.account_slot(account),
                ContextSpec {
                    account: Some(account.to_string()),
                    ..ContextSpec::default()
                },
            ),
            (None, true) if !self.proxies.is_empty() => {
                let index = self.next_proxy.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
                let (server, slot) = &self.proxies[index];
                (
                    slot.clone(),
                    ContextSpec {
                        proxy: Some(server.clone()),
                        ..ContextSpec::default()
                    },
                )
            }
            _ => (self.anonymous.clone(), ContextSpec::default()),
        };

        let slot_permit = slot
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| unavailable("slot closed"))?;

        let context = self.ensure_context(&slot, spec).await?;
        let page = context.new_page().await?;
        Ok(PageLease {
            page,
            account: account.map(str::to_string),
            generation: slot.generation.load(Ordering::SeqCst),
            _global: global,
            _slot: slot_permit,
        })
    }

    async fn ensure_context(
        &self,
        slot: &Slot,
        mut spec: ContextSpec,
    ) -> MeridianResult<Arc<dyn BrowserContext>> {
        let mut current = slot.context.lock().await;
        if let Some(context) = current.as_ref() {
            return Ok(context.clone());
        }

        let account = spec.account.clone();
        if let Some(account) = &account {
            spec.storage = self.load_state(account).await?;
        }
        let context = self.factory.create(&spec).await?;

        if let Some(account) = &account {
            if spec.storage.is_none() {
                tracing::info!(account = %account, "No stored session, logging in");
                self.login_into(context.as_ref(), account).await?;
            }
        }

        *current = Some(context.clone());
        Ok(context)
    }

    async fn login_into(&self, context: &dyn BrowserContext, account: &str) -> MeridianResult<()> {
        let Some(login) = &self.login else {
            return Ok(());
        };
        let credentials = self
            .config
            .account(account)
            .ok_or_else(|| unavailable(format!("no credentials for {}", account)))?;
        login.login(context, credentials).await?;
        let state = context.storage_state().await?;
        self.store_state(account, &state).await?;
        tracing::info!(account, "Logged in");
        Ok(())
    }

    async fn load_state(&self, account: &str) -> MeridianResult<Option<StorageState>> {
        let Some(raw) = self.kv.hget(SESSIONS_KEY, account).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<StorageState>(&raw) {
            Ok(state) if !state.is_empty() => Ok(Some(state)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(account, error = %e, "Discarding undecodable session");
                Ok(None)
            }
        }
    }

    async fn store_state(&self, account: &str, state: &StorageState) -> MeridianResult<()> {
        let raw = serde_json::to_string(state)
            .map_err(|e| unavailable(format!("encoding session for {}: {}", account, e)))?;
        self.kv.hset(SESSIONS_KEY, account, &raw).await?;
        Ok(())
    }

    /// Report that the lease's context lost its authentication.
    ///
    /// The first report for a context generation discards it and logs in
    /// again under a per-account single-flight lock shared across processes;
    /// later reports for the same generation wait for that attempt and return
    /// its outcome. A failed relogin flags the account for an hour.
    #[tracing::instrument(skip(self, lease), fields(account = ?lease.account()))]
    pub async fn report_auth_failure(&self, lease: &PageLease) -> MeridianResult<()> {
        let Some(account) = lease.account() else {
            return Ok(());
        };
        self.relogin(account, lease.generation).await
    }

    /// Log an account's context in again unless that already happened after
    /// `seen_generation`.
    pub async fn relogin(&self, account: &str, seen_generation: u64) -> MeridianResult<()> {
        let _local = self.relogins.lock(account).await;
        let slot = self.account_slot(account);
        if slot.generation.load(Ordering::SeqCst) != seen_generation {
            tracing::debug!(account, "Context already renewed");
            return Ok(());
        }

        let Some(lock) = KvLock::try_acquire(self.kv.clone(), relogin_key(account), RELOGIN_TTL).await?
        else {
            return Err(unavailable(format!("{} is being logged in elsewhere", account)).into());
        };

        let outcome = self.renew(&slot, account).await;
        slot.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = lock.release().await {
            tracing::warn!(account, error = %e, "Releasing relogin lock failed");
        }

        match outcome {
            Ok(()) => {
                self.kv.del(&flag_key(account)).await?;
                tracing::info!(account, "Relogin succeeded");
                Ok(())
            }
            Err(e) => {
                self.kv.set(&flag_key(account), "1", Some(FLAG_TTL)).await?;
                tracing::error!(account, error = %e, "Relogin failed, account flagged");
                Err(BrowserError::new(BrowserErrorKind::AuthRevoked(account.to_string())).into())
            }
        }
    }

    async fn renew(&self, slot: &Slot, account: &str) -> MeridianResult<()> {
        let mut current = slot.context.lock().await;
        if let Some(old) = current.take() {
            if let Err(e) = old.close().await {
                tracing::debug!(account, error = %e, "Closing stale context failed");
            }
        }
        self.kv.hdel(SESSIONS_KEY, account).await?;
        let context = self
            .factory
            .create(&ContextSpec {
                account: Some(account.to_string()),
                ..ContextSpec::default()
            })
            .await?;
        self.login_into(context.as_ref(), account).await?;
        *current = Some(context);
        Ok(())
    }

    /// Persist the session of every live account context.
    #[tracing::instrument(skip(self))]
    pub async fn save_states(&self) -> MeridianResult<usize> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .accounts
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut saved = 0;
        for (account, slot) in slots {
            let context = slot.context.lock().await.clone();
            let Some(context) = context else { continue };
            match context.storage_state().await {
                Ok(state) if !state.is_empty() => {
                    self.store_state(&account, &state).await?;
                    saved += 1;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(account = %account, error = %e, "Reading session failed"),
            }
        }
        tracing::debug!(saved, "Saved browser sessions");
        Ok(saved)
    }

    /// Run [`ContextPool::save_states`] at randomized intervals until `cancel` fires.
    pub fn spawn_save_loop(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (low, high) = *self.config.save_interval_secs();
                let secs = if high > low {
                    rand::thread_rng().gen_range(low..=high)
                } else {
                    low
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Browser session save loop stopped");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                        if let Err(e) = self.save_states().await {
                            tracing::error!(error = %e, "Saving browser sessions failed");
                        }
                    }
                }
            }
        })
    }

    /// Free slots across the pool.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }
}
