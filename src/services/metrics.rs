// Security metrics
// Counter-only registry exposed at /v1/metrics in Prometheus text format.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Counters for the security-relevant events of the core.
pub struct AuthMetricsService {
    registry: Registry,
    pub login_success: IntCounter,
    pub login_failure: IntCounter,
    pub token_refresh: IntCounter,
    pub user_registration: IntCounter,
    pub bruteforce_detected: IntCounter,
    pub session_revoked: IntCounter,
    pub rotation_failed: IntCounter,
    pub user_locked: IntCounter,
    pub refresh_reused: IntCounter,
    pub password_change: IntCounter,
}

impl AuthMetricsService {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            IntCounter::new(name.to_string(), help.to_string())
        };

        let login_success = counter("login_success", "Successful logins")?;
        let login_failure = counter("login_failure", "Failed logins")?;
        let token_refresh = counter("token_refresh", "Successful token refreshes")?;
        let user_registration = counter("user_registration", "New user registrations")?;
        let bruteforce_detected =
            counter("bruteforce_detected", "Login attempts blocked by lockout")?;
        let session_revoked = counter("session_revoked", "Sessions revoked by logout")?;
        let rotation_failed = counter("rotation_failed", "Refresh rotations that failed")?;
        let user_locked = counter("user_locked", "Logins rejected for locked accounts")?;
        let refresh_reused = counter("refresh_reused", "Refresh token reuse detections")?;
        let password_change = counter("password_change", "Password changes")?;

        for metric in [
            &login_success,
            &login_failure,
            &token_refresh,
            &user_registration,
            &bruteforce_detected,
            &session_revoked,
            &rotation_failed,
            &user_locked,
            &refresh_reused,
            &password_change,
        ] {
            registry.register(Box::new(metric.clone()))?;
        }

        Ok(Self {
            registry,
            login_success,
            login_failure,
            token_refresh,
            user_registration,
            bruteforce_detected,
            session_revoked,
            rotation_failed,
            user_locked,
            refresh_reused,
            password_change,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
