// Audit event publishing
// The core emits security events through this interface; the production
// publisher writes structured tracing events under a stable `audit` target
// so they can be routed independently of application logs.

use serde::Serialize;

/// Security events worth an audit trail.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSucceeded {
        username: String,
        client_ip: String,
    },
    LoginFailed {
        username: String,
        client_ip: String,
        error_code: &'static str,
    },
    BruteForceBlocked {
        rate_limit_key: String,
        retry_after_seconds: u64,
    },
    RefreshRotated {
        username: String,
        old_jti: String,
        new_jti: String,
    },
    RefreshReuseDetected {
        username: String,
        jti: String,
        family_id: String,
    },
    SessionRevoked {
        username: String,
        jti: String,
    },
    GlobalLogout {
        username: String,
        sessions_removed: usize,
    },
}

pub trait AuditEventPublisher: Send + Sync {
    fn publish(&self, event: AuditEvent);
}

/// Publishes audit events as structured tracing records.
pub struct TracingAuditPublisher;

impl AuditEventPublisher for TracingAuditPublisher {
    fn publish(&self, event: AuditEvent) {
        match &event {
            AuditEvent::RefreshReuseDetected { username, jti, family_id } => {
                tracing::warn!(
                    target: "audit",
                    username = %username,
                    jti = %jti,
                    family_id = %family_id,
                    "refresh token reuse detected, family revoked"
                );
            },
            AuditEvent::BruteForceBlocked { rate_limit_key, retry_after_seconds } => {
                tracing::warn!(
                    target: "audit",
                    rate_limit_key = %rate_limit_key,
                    retry_after_seconds = retry_after_seconds,
                    "login blocked by attempt policy"
                );
            },
            other => {
                tracing::info!(
                    target: "audit",
                    event = ?other,
                    "security event"
                );
            },
        }
    }
}

/// Collects events for assertions in tests.
#[derive(Default)]
pub struct RecordingAuditPublisher {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit lock").clone()
    }
}

impl AuditEventPublisher for RecordingAuditPublisher {
    fn publish(&self, event: AuditEvent) {
        self.events.lock().expect("audit lock").push(event);
    }
}
