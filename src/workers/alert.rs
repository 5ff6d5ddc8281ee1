//! Dead-letter alerting with per-type suppression.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::job::Job;

/// Suppression window between alerts for the same job type.
const ALERT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Emits one dead-letter alert per job type per window.
pub struct DeadLetterAlerts {
    window: Duration,
    last_alert: Mutex<HashMap<String, Instant>>,
}

impl DeadLetterAlerts {
    pub fn new() -> Self {
        Self::with_window(ALERT_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            last_alert: Mutex::new(HashMap::new()),
        }
    }

    /// Record a permanently failed job; logs unless a recent alert for the
    /// same type already fired.
    pub fn alert(&self, job: &Job) {
        if !self.should_fire(&job.job_type) {
            return;
        }

        tracing::error!(
            job_id = %job.id,
            job_type = %job.job_type,
            error = job.error_msg.as_deref().unwrap_or(""),
            "dead letter alert: job failed permanently"
        );
    }

    fn should_fire(&self, job_type: &str) -> bool {
        let mut last_alert = self.last_alert.lock().expect("alert map poisoned");
        let now = Instant::now();

        match last_alert.get(job_type) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                last_alert.insert(job_type.to_string(), now);
                true
            }
        }
    }
}

impl Default for DeadLetterAlerts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_alert_within_window_is_suppressed() {
        let alerts = DeadLetterAlerts::with_window(Duration::from_secs(600));

        assert!(alerts.should_fire("broadcast_private_message"));
        assert!(!alerts.should_fire("broadcast_private_message"));
        // A different type has its own window.
        assert!(alerts.should_fire("create_user_otp"));
    }

    #[test]
    fn alert_fires_again_after_window() {
        let alerts = DeadLetterAlerts::with_window(Duration::from_millis(0));

        assert!(alerts.should_fire("broadcast_private_message"));
        assert!(alerts.should_fire("broadcast_private_message"));
    }
}
