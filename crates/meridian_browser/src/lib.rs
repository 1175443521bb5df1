//! Pool of authenticated headless-browser contexts.
//!
//! Fetchers that need a real browser borrow a [`PageLease`] from the
//! [`ContextPool`]. A lease pins one tab inside a context that belongs to a
//! third-party account, a proxy, or the shared anonymous context:
//!
//! - at most `per_account` borrows run against one account at a time,
//! - at most `global_limit` borrows run across the pool,
//! - sessions are restored from and saved to the KV hash `api_sessions_store2`,
//! - a context that lost its login is renewed once per generation under a
//!   per-account lock, and accounts whose relogin failed are skipped.
//!
//! The browser itself sits behind [`ContextFactory`]: [`ChromeFactory`] talks
//! to Chrome over the DevTools protocol, [`ScriptedFactory`] replays canned
//! pages in process.

mod cdp;
mod chrome;
mod config;
mod page;
mod pool;
mod scripted;
mod state;

pub use cdp::{CdpConnection, CdpEvent};
pub use chrome::{ChromeContext, ChromeFactory, ChromePage};
pub use config::{BrowserAccount, BrowserConfig, BrowserConfigBuilder};
pub use page::{
    BrowserContext, ContextFactory, ContextSpec, InterceptedResponse, Interceptor, LoginFlow, Page,
};
pub use pool::{ContextPool, DISABLED_KEY, PageLease, SESSIONS_KEY};
pub use scripted::{ScriptedContext, ScriptedFactory, ScriptedLogin, ScriptedPage, ScriptedRoute};
pub use state::{Cookie, StorageState};
