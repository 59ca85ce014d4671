//! Outbound mail collaborator.
//!
//! The server only depends on this interface; actual SMTP delivery lives
//! outside the process. The shipped implementation records the rendered
//! intent in the log, which is also what the tests observe.

use serde_json::Value;

pub trait Mailer: Send + Sync {
    /// Queue a templated message. Never blocks the caller and never fails
    /// into the request path.
    fn send(&self, to: &str, subject: &str, template: &str, context: &Value);
}

/// Mailer that logs instead of delivering.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, template: &str, context: &Value) {
        tracing::info!(
            from = %self.from,
            to = %to,
            subject = %subject,
            template = %template,
            context = %context,
            "queueing outbound mail"
        );
    }
}
