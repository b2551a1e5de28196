//! Action dispatch: fire a rule's side effects for one changed record.
//!
//! Channels are independent. A failure in one is logged and the rest are
//! still attempted. Nothing is retried or re-queued.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::Config;
use crate::model::{ActionSpec, ChangeSet};

/// Errors delivering a single notification.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("webhook {url} failed: {message}")]
    Webhook { url: String, message: String },

    #[error("failed to run {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited with {status}", path.display())]
    Exit { path: PathBuf, status: String },

    #[error("{} still running after {}s, killed", path.display(), after.as_secs())]
    Timeout { path: PathBuf, after: Duration },

    #[error("email to {to} failed: {message}")]
    Email { to: String, message: String },
}

/// Outbound notification channels.
pub trait Notifier {
    /// POST `payload` as JSON to `url`.
    fn webhook(&self, url: &str, payload: &Value) -> Result<(), DispatchError>;

    /// Run `script` with the record id as its only argument and wait for it
    /// to exit.
    fn subprocess(&self, script: &Path, record_id: &str) -> Result<(), DispatchError>;

    /// Send a plain-text email.
    fn email(&self, to: &[String], subject: &str, body: &str) -> Result<(), DispatchError>;
}

/// Notifier backed by HTTP, child processes and the local `sendmail`.
pub struct SystemNotifier {
    agent: ureq::Agent,
    sendmail: PathBuf,
    from: String,
    action_timeout: Duration,
}

impl SystemNotifier {
    pub fn new(config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        Self {
            agent,
            sendmail: config.sendmail_path.clone(),
            from: config.email_from.clone(),
            action_timeout: config.action_timeout(),
        }
    }
}

impl Notifier for SystemNotifier {
    fn webhook(&self, url: &str, payload: &Value) -> Result<(), DispatchError> {
        let failed = |message: String| DispatchError::Webhook {
            url: url.to_string(),
            message,
        };

        match self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_json(payload)
        {
            Ok(response) if (200..300).contains(&response.status()) => Ok(()),
            Ok(response) => Err(failed(format!("HTTP {}", response.status()))),
            Err(ureq::Error::Status(status, _)) => Err(failed(format!("HTTP {status}"))),
            Err(ureq::Error::Transport(transport)) => Err(failed(transport.to_string())),
        }
    }

    fn subprocess(&self, script: &Path, record_id: &str) -> Result<(), DispatchError> {
        let spawn_failed = |source| DispatchError::Spawn {
            path: script.to_path_buf(),
            source,
        };

        let mut child = Command::new(script)
            .arg(record_id)
            .spawn()
            .map_err(spawn_failed)?;

        let Some(status) = child.wait_timeout(self.action_timeout).map_err(spawn_failed)? else {
            if let Err(error) = child.kill() {
                warn!(script = %script.display(), %error, "failed to kill action");
            }
            child.wait().map_err(spawn_failed)?;
            return Err(DispatchError::Timeout {
                path: script.to_path_buf(),
                after: self.action_timeout,
            });
        };

        if !status.success() {
            return Err(DispatchError::Exit {
                path: script.to_path_buf(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    fn email(&self, to: &[String], subject: &str, body: &str) -> Result<(), DispatchError> {
        let recipients = to.join(", ");
        let failed = |message: String| DispatchError::Email {
            to: recipients.clone(),
            message,
        };

        let message = format!(
            "From: {}\nTo: {recipients}\nSubject: {subject}\nContent-Type: text/plain; charset=utf-8\n\n{body}\n",
            self.from
        );

        let mut child = Command::new(&self.sendmail)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("failed to run {}: {e}", self.sendmail.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.as_bytes())
                .map_err(|e| failed(e.to_string()))?;
        }

        let output = child.wait_with_output().map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("sendmail {}: {}", output.status, stderr.trim())));
        }
        Ok(())
    }
}

/// Tally of one dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub delivered: usize,
    pub failed: usize,
}

impl Outcome {
    fn record(&mut self, channel: &str, target: &str, result: Result<(), DispatchError>) {
        match result {
            Ok(()) => {
                debug!(channel, target, "delivered");
                self.delivered += 1;
            }
            Err(error) => {
                warn!(channel, target, %error, "dispatch failed");
                self.failed += 1;
            }
        }
    }
}

/// The webhook payload for one record: `{ "<record key>": <change set> }`.
pub fn payload(record_key: &str, change: &ChangeSet) -> Value {
    json!({ record_key: change })
}

/// Fire every channel in `actions` for one record.
pub fn dispatch(
    actions: &ActionSpec,
    record_key: &str,
    change: &ChangeSet,
    notifier: &dyn Notifier,
) -> Outcome {
    let payload = payload(record_key, change);
    let mut outcome = Outcome::default();

    for url in &actions.webhook {
        outcome.record("webhook", url, notifier.webhook(url, &payload));
    }

    for script in &actions.subprocess {
        let target = script.display().to_string();
        outcome.record("subprocess", &target, notifier.subprocess(script, record_key));
    }

    if !actions.email.is_empty() {
        let details = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        for email in &actions.email {
            let body = match &email.body {
                Some(body) => format!("{body}\n\n{details}"),
                None => details.clone(),
            };
            let target = email.to.join(", ");
            outcome.record("email", &target, notifier.email(&email.to, &email.subject, &body));
        }
    }

    outcome
}

/// Tell the operator the listener has stopped. Failures are only logged.
pub fn alert_operator(notifier: &dyn Notifier, operator: &str, message: &str) {
    let to = [operator.to_string()];
    if let Err(error) = notifier.email(&to, "pagewatch stopped", message) {
        warn!(%error, "failed to alert operator");
    }
}
