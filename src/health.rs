//! Heartbeat reporting to an external health monitor.

use tracing::{debug, warn};

use crate::config::Config;

/// Lifecycle states reported to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Run,
    Complete,
    Fail,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Complete => "complete",
            Self::Fail => "fail",
        }
    }
}

/// Where lifecycle states are reported.
pub trait Heartbeat {
    /// Report `state`. Delivery failures are only logged.
    fn ping(&self, state: State, message: Option<&str>);
}

/// Pings the configured heartbeat URL. Does nothing when none is configured.
pub struct Monitor {
    agent: ureq::Agent,
    url: Option<String>,
}

impl Monitor {
    pub fn new(config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        Self {
            agent,
            url: config.health_url.clone(),
        }
    }
}

impl Heartbeat for Monitor {
    fn ping(&self, state: State, message: Option<&str>) {
        let Some(url) = &self.url else {
            return;
        };

        let mut request = self.agent.get(url).query("state", state.as_str());
        if let Some(message) = message {
            request = request.query("message", message);
        }

        match request.call() {
            Ok(_) => debug!(state = state.as_str(), "health ping sent"),
            Err(error) => warn!(state = state.as_str(), %error, "health ping failed"),
        }
    }
}
