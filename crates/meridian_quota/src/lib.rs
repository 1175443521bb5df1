//! Authentication, quotas and request auditing for the media API.
//!
//! Requests carry `Authorization: Bearer <token>`. The token is hashed with
//! SHA-256 and matched against configured accounts and the runtime account
//! hash `api_accounts` in the key-value store. An authenticated request is
//! then admitted by [`QuotaGate::admit`], which enforces:
//!
//! - a global cap on requests in flight,
//! - a per-account requests-per-minute limit (governor GCRA),
//! - a per-account, per-platform concurrency cap,
//! - a runtime kill switch `platform_disabled:{platform}:{account}`.
//!
//! Every request yields an [`AuditRecord`] that is logged and, when slow,
//! handed to an [`AuditSink`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod account;
mod audit;
mod config;
mod gate;
mod limiter;

pub use account::{ApiAccount, ApiAccountBuilder, hash_token};
pub use audit::{AUDIT_THRESHOLD, AuditRecord, AuditSink, RequestAudit, TracingAuditSink};
pub use config::{QuotaConfig, QuotaConfigBuilder};
pub use gate::{QuotaGate, QuotaPermit};
pub use limiter::{AccountLimiter, default_platform_limit};
