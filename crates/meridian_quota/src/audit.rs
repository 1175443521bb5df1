//! Per-request audit records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_error::MeridianResult;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Requests slower than this are persisted by the audit sink.
pub const AUDIT_THRESHOLD: Duration = Duration::from_millis(100);

/// One handled API request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique request id
    pub request_id: Uuid,
    /// When the request arrived
    pub created_at: DateTime<Utc>,
    /// Route name, e.g. `instagram_profile`
    pub route_name: String,
    /// Handling time in seconds
    pub processing_time: f64,
    /// Authenticated account, if any
    pub username: Option<String>,
    /// Discord user the request was made for, if any
    pub user_id: Option<u64>,
    /// Query arguments
    pub args: serde_json::Value,
    /// Path arguments
    pub path_args: serde_json::Value,
    /// Request body, if JSON
    pub body: Option<serde_json::Value>,
    /// Whether the request ended in an error
    pub failed: bool,
    /// Error message when failed
    pub error: Option<String>,
    /// Client address
    pub ip: Option<String>,
}

/// Destination for slow-request records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist a record.
    async fn record(&self, record: &AuditRecord) -> MeridianResult<()>;
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> MeridianResult<()> {
        tracing::info!(
            request_id = %record.request_id,
            route = %record.route_name,
            processing_time = record.processing_time,
            failed = record.failed,
            "Slow request"
        );
        Ok(())
    }
}

/// Timer for an in-flight request.
#[derive(Debug)]
pub struct RequestAudit {
    record: AuditRecord,
    started: Instant,
}

impl RequestAudit {
    /// Start timing a request.
    pub fn start(
        route_name: impl Into<String>,
        username: Option<String>,
        args: serde_json::Value,
        path_args: serde_json::Value,
        ip: Option<String>,
    ) -> Self {
        Self {
            record: AuditRecord {
                request_id: Uuid::new_v4(),
                created_at: Utc::now(),
                route_name: route_name.into(),
                processing_time: 0.0,
                username,
                user_id: None,
                args,
                path_args,
                body: None,
                failed: false,
                error: None,
                ip,
            },
            started: Instant::now(),
        }
    }

    /// Request id assigned at start.
    pub fn request_id(&self) -> Uuid {
        self.record.request_id
    }

    /// Attach the Discord user the request was made for.
    pub fn with_user_id(mut self, user_id: Option<u64>) -> Self {
        self.record.user_id = user_id;
        self
    }

    /// Attach the request body.
    pub fn with_body(mut self, body: Option<serde_json::Value>) -> Self {
        self.record.body = body;
        self
    }

    /// Stop the timer and produce the record.
    pub fn finish(mut self, error: Option<String>) -> AuditRecord {
        self.record.processing_time = self.started.elapsed().as_secs_f64();
        self.record.failed = error.is_some();
        self.record.error = error;
        tracing::debug!(
            request_id = %self.record.request_id,
            route = %self.record.route_name,
            processing_time = self.record.processing_time,
            failed = self.record.failed,
            "Request finished"
        );
        self.record
    }

    /// Finish and persist the record when it crossed [`AUDIT_THRESHOLD`].
    ///
    /// Sink failures are logged and swallowed.
    pub async fn finish_into(self, error: Option<String>, sink: &dyn AuditSink) -> AuditRecord {
        let record = self.finish(error);
        if record.processing_time > AUDIT_THRESHOLD.as_secs_f64() {
            if let Err(e) = sink.record(&record).await {
                tracing::warn!(error = %e, request_id = %record.request_id, "Audit sink failed");
            }
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_marks_failure() {
        let audit = RequestAudit::start(
            "tiktok_post",
            Some("melanie".into()),
            serde_json::json!({"url": "x"}),
            serde_json::Value::Null,
            None,
        );
        let id = audit.request_id();
        let record = audit.finish(Some("502".into()));
        assert_eq!(record.request_id, id);
        assert!(record.failed);
        assert_eq!(record.error.as_deref(), Some("502"));
        assert!(record.processing_time >= 0.0);
    }

    #[test]
    fn test_record_json_carries_hyphenated_request_id() {
        let record = RequestAudit::start(
            "instagram_profile",
            None,
            serde_json::Value::Null,
            serde_json::Value::Null,
            None,
        )
        .finish(None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["request_id"], record.request_id.hyphenated().to_string());
        let back: AuditRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
