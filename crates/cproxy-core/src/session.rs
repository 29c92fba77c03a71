use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cproxy_common::{RefreshConfig, RefreshFailurePolicy};

use crate::error::UpstreamError;
use crate::upstream_client::CopilotClient;

const EXPIRY_FIELD: &str = "exp=";

/// Short-lived Copilot token used as the bearer for chat calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl SessionCredential {
    /// Rejects tokens that carry no `exp=<digits>` field.
    pub fn parse(token: impl Into<String>) -> Result<Self, UpstreamError> {
        let token = token.into();
        let expires_at = parse_expiry(&token).ok_or(UpstreamError::InvalidSessionToken)?;
        Ok(Self { token, expires_at })
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now.unix_timestamp()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

/// Value of the first `exp=` field followed by at least one digit.
pub fn parse_expiry(token: &str) -> Option<i64> {
    token.match_indices(EXPIRY_FIELD).find_map(|(pos, _)| {
        let rest = &token[pos + EXPIRY_FIELD.len()..];
        let end = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        rest[..end].parse().ok()
    })
}

/// Process-wide session credential. Readers always see a whole token.
#[derive(Debug)]
pub struct SessionStore {
    current: ArcSwap<SessionCredential>,
}

impl SessionStore {
    pub fn new(initial: SessionCredential) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn current(&self) -> Arc<SessionCredential> {
        self.current.load_full()
    }

    pub fn replace(&self, credential: SessionCredential) {
        self.current.store(Arc::new(credential));
    }
}

/// Periodically re-derives the session credential from the access token.
pub struct SessionRefresher {
    client: CopilotClient,
    access_token: String,
    store: Arc<SessionStore>,
    config: RefreshConfig,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl SessionRefresher {
    pub fn new(
        client: CopilotClient,
        access_token: impl Into<String>,
        store: Arc<SessionStore>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            client,
            access_token: access_token.into(),
            store,
            config,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5 * 60),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Fetches a fresh credential and swaps it into the store.
    pub async fn refresh_once(&self) -> Result<Arc<SessionCredential>, UpstreamError> {
        let credential = self.client.session_token(&self.access_token).await?;
        self.store.replace(credential);
        Ok(self.store.current())
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the task is aborted, or until the first failure under
    /// [`RefreshFailurePolicy::Stop`].
    pub async fn run(self) {
        let interval = self.config.interval();
        let mut delay = interval;
        let mut backoff = self.initial_backoff;

        loop {
            tokio::time::sleep(delay).await;
            match self.refresh_once().await {
                Ok(credential) => {
                    info!(
                        event = "session_refreshed",
                        expires_at = credential.expires_at
                    );
                    delay = interval;
                    backoff = self.initial_backoff;
                }
                Err(err) => match self.config.failure {
                    RefreshFailurePolicy::Stop => {
                        error!(
                            event = "session_refresh_failed",
                            policy = %self.config.failure,
                            error = %err
                        );
                        return;
                    }
                    RefreshFailurePolicy::Retry => {
                        warn!(
                            event = "session_refresh_failed",
                            policy = %self.config.failure,
                            retry_in_ms = backoff.as_millis(),
                            error = %err
                        );
                        delay = backoff;
                        backoff = (backoff * 2).min(self.max_backoff);
                    }
                },
            }
        }
    }
}
