//! GitHub device-code login: request a user code, then poll until the user
//! approves it in the browser.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use cproxy_protocol::github::LoginResponse;

use crate::error::UpstreamError;
use crate::upstream_client::CopilotClient;

#[derive(Debug, thiserror::Error)]
pub enum DeviceFlowError {
    #[error("authorization was denied by the user")]
    Denied,
    #[error("device code expired before authorization completed")]
    Expired,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Pacing of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Used when the server reports an interval of zero.
    pub default_interval: Duration,
    /// Added to every wait on top of the server interval.
    pub padding: Duration,
    /// Added to the interval on `slow_down` when the server gives no new one.
    pub slow_down_step: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(5),
            padding: Duration::from_secs(1),
            slow_down_step: Duration::from_secs(5),
        }
    }
}

impl PollTiming {
    fn interval_from(&self, secs: u64) -> Duration {
        if secs == 0 {
            self.default_interval
        } else {
            Duration::from_secs(secs)
        }
    }
}

/// Polls the token endpoint until an access token is issued.
pub async fn poll_access_token(
    client: &CopilotClient,
    login: &LoginResponse,
    timing: PollTiming,
) -> Result<String, DeviceFlowError> {
    let deadline = login
        .expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut interval = timing.interval_from(login.interval);

    loop {
        tokio::time::sleep(interval + timing.padding).await;
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(DeviceFlowError::Expired);
        }

        let response = client.authenticate(&login.device_code).await?;
        if !response.access_token.is_empty() {
            return Ok(response.access_token);
        }

        match response.error.as_deref() {
            Some("access_denied") => return Err(DeviceFlowError::Denied),
            Some("expired_token") => return Err(DeviceFlowError::Expired),
            Some("slow_down") => {
                interval = if response.interval > 0 {
                    Duration::from_secs(response.interval)
                } else {
                    interval + timing.slow_down_step
                };
                debug!(event = "device_flow_slow_down", interval_secs = interval.as_secs());
            }
            other => {
                interval = timing.interval_from(response.interval);
                debug!(event = "device_flow_pending", error = ?other);
            }
        }
    }
}
