use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{info, warn};
use wreq::{Client, Proxy, RequestBuilder};

use cproxy_common::GlobalConfig;
use cproxy_protocol::chat::request::CompletionRequest;
use cproxy_protocol::error::ErrorEnvelope;
use cproxy_protocol::github::{
    AuthenticationRequest, AuthenticationResponse, DEVICE_CODE_GRANT_TYPE, LoginRequest,
    LoginResponse, SessionResponse,
};

use crate::error::UpstreamError;
use crate::session::SessionCredential;

pub const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
pub const LOGIN_SCOPES: &str = "read:user";

/// Raw upstream body chunks of a streaming completion.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEndpoints {
    pub device_code_url: String,
    pub access_token_url: String,
    pub session_token_url: String,
    pub chat_url: String,
}

impl UpstreamEndpoints {
    /// Every endpoint rooted at one base URL. Used to point the client at a mock server.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            device_code_url: format!("{base}/login/device/code"),
            access_token_url: format!("{base}/login/oauth/access_token"),
            session_token_url: format!("{base}/copilot_internal/v2/token"),
            chat_url: format!("{base}/chat/completions"),
        }
    }
}

impl Default for UpstreamEndpoints {
    fn default() -> Self {
        Self {
            device_code_url: "https://github.com/login/device/code".to_string(),
            access_token_url: "https://github.com/login/oauth/access_token".to_string(),
            session_token_url: "https://api.github.com/copilot_internal/v2/token".to_string(),
            chat_url: "https://api.githubcopilot.com/chat/completions".to_string(),
        }
    }
}

/// Client identification sent on every upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorIdentity {
    pub client_id: String,
    pub editor_version: String,
    pub editor_plugin_version: String,
    pub user_agent: String,
}

impl Default for EditorIdentity {
    fn default() -> Self {
        Self {
            client_id: GITHUB_CLIENT_ID.to_string(),
            editor_version: "vscode/1.83.1".to_string(),
            editor_plugin_version: "copilot-chat/0.8.0".to_string(),
            user_agent: "githubCopilot/1.155.0".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
    pub endpoints: UpstreamEndpoints,
    pub identity: EditorIdentity,
}

impl UpstreamClientConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            proxy: global.proxy.clone(),
            connect_timeout: global.timeouts.connect(),
            request_timeout: global.timeouts.request(),
            idle_timeout: global.timeouts.idle(),
            ..Self::default()
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(600),
            idle_timeout: Duration::from_secs(60),
            endpoints: UpstreamEndpoints::default(),
            identity: EditorIdentity::default(),
        }
    }
}

/// Result of a chat call: a live byte stream or the buffered JSON body.
pub enum ChatResponse {
    Stream(ByteStream),
    Json(Bytes),
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatResponse::Stream(_) => f.write_str("ChatResponse::Stream(..)"),
            ChatResponse::Json(body) => f.debug_tuple("ChatResponse::Json").field(body).finish(),
        }
    }
}

/// HTTP client for the GitHub OAuth, Copilot session and chat endpoints.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct CopilotClient {
    http: Client,
    endpoints: UpstreamEndpoints,
    identity: EditorIdentity,
}

impl CopilotClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let http = build_client(&config)?;
        Ok(Self {
            http,
            endpoints: config.endpoints,
            identity: config.identity,
        })
    }

    pub fn endpoints(&self) -> &UpstreamEndpoints {
        &self.endpoints
    }

    pub fn identity(&self) -> &EditorIdentity {
        &self.identity
    }

    /// Starts the device-code flow.
    pub async fn login(&self) -> Result<LoginResponse, UpstreamError> {
        let payload = LoginRequest {
            client_id: self.identity.client_id.clone(),
            scopes: LOGIN_SCOPES.to_string(),
        };
        let body = encode(&payload)?;
        let url = &self.endpoints.device_code_url;
        let response = send_with_logging("login", "POST", url, false, || {
            self.json_request(self.http.post(url)).body(body).send()
        })
        .await?;
        decode_json(response).await
    }

    /// Polls once for the access token. A pending authorization is not an
    /// error here: it comes back as a response with `error` set.
    pub async fn authenticate(
        &self,
        device_code: &str,
    ) -> Result<AuthenticationResponse, UpstreamError> {
        let payload = AuthenticationRequest {
            client_id: self.identity.client_id.clone(),
            device_code: device_code.to_string(),
            grant_type: DEVICE_CODE_GRANT_TYPE.to_string(),
        };
        let body = encode(&payload)?;
        let url = &self.endpoints.access_token_url;
        let response = send_with_logging("authenticate", "POST", url, false, || {
            self.json_request(self.http.post(url)).body(body).send()
        })
        .await?;
        decode_json(response).await
    }

    /// Exchanges the long-lived access token for a Copilot session token.
    pub async fn session_token(
        &self,
        access_token: &str,
    ) -> Result<SessionCredential, UpstreamError> {
        let url = &self.endpoints.session_token_url;
        let response = send_with_logging("session_token", "GET", url, false, || {
            self.identify(self.http.get(url))
                .header("accept", "application/json")
                .header("authorization", format!("token {access_token}"))
                .send()
        })
        .await?;
        let session: SessionResponse = decode_json(response).await?;
        SessionCredential::parse(session.token)
    }

    /// Sends a completion request. `request.stream` decides the response shape.
    pub async fn chat(
        &self,
        session_token: &str,
        request: &CompletionRequest,
    ) -> Result<ChatResponse, UpstreamError> {
        let body = encode(request)?;
        let url = &self.endpoints.chat_url;
        let response = send_with_logging("chat", "POST", url, request.stream, || {
            self.json_request(self.http.post(url))
                .header("authorization", format!("Bearer {session_token}"))
                .body(body)
                .send()
        })
        .await?;
        let response = ensure_success(response).await?;

        if request.stream {
            let stream = response
                .bytes_stream()
                .map(|item| item.map_err(UpstreamError::from));
            Ok(ChatResponse::Stream(Box::pin(stream)))
        } else {
            Ok(ChatResponse::Json(response.bytes().await?))
        }
    }

    fn identify(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("editor-version", self.identity.editor_version.as_str())
            .header(
                "editor-plugin-version",
                self.identity.editor_plugin_version.as_str(),
            )
            .header("user-agent", self.identity.user_agent.as_str())
    }

    fn json_request(&self, builder: RequestBuilder) -> RequestBuilder {
        self.identify(builder)
            .header("accept", "application/json")
            .header("content-type", "application/json")
    }
}

fn build_client(config: &UpstreamClientConfig) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.idle_timeout);

    if let Some(proxy) = config
        .proxy
        .as_deref()
        .map(str::trim)
        .filter(|proxy| !proxy.is_empty())
    {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

async fn send_with_logging<F, Fut>(
    op: &str,
    method: &str,
    url: &str,
    is_stream: bool,
    send: F,
) -> Result<wreq::Response, UpstreamError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<wreq::Response, wreq::Error>>,
{
    info!(
        event = "upstream_request",
        op = %op,
        method = %method,
        url = %url,
        is_stream = is_stream
    );
    let started_at = Instant::now();
    match send().await {
        Ok(response) => {
            info!(
                event = "upstream_response",
                op = %op,
                status = %response.status().as_u16(),
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream = is_stream
            );
            Ok(response)
        }
        Err(err) => {
            warn!(
                event = "upstream_response",
                op = %op,
                status = "error",
                elapsed_ms = started_at.elapsed().as_millis(),
                error = %err
            );
            Err(UpstreamError::Transport(err))
        }
    }
}

/// Turns a non-2xx response into [`UpstreamError::Api`] when the body is an
/// error envelope, [`UpstreamError::Status`] otherwise.
async fn ensure_success(response: wreq::Response) -> Result<wreq::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let status = status.as_u16();
    let body = response.bytes().await.unwrap_or_default();
    Err(api_error(status, &body))
}

fn api_error(status: u16, body: &[u8]) -> UpstreamError {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => UpstreamError::Api {
            status,
            message: envelope.error.message,
            code: envelope.error.code,
            kind: envelope.error.kind,
        },
        Err(_) => UpstreamError::Status { status },
    }
}

async fn decode_json<T>(response: wreq::Response) -> Result<T, UpstreamError>
where
    T: serde::de::DeserializeOwned,
{
    let response = ensure_success(response).await?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(UpstreamError::Decode)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, UpstreamError> {
    serde_json::to_vec(value).map_err(UpstreamError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_prefers_envelope() {
        let err = api_error(
            401,
            br#"{"error":{"message":"bad credentials","type":"auth","code":"invalid"}}"#,
        );
        match err {
            UpstreamError::Api {
                status,
                message,
                code,
                kind,
            } => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad credentials");
                assert_eq!(code, "invalid");
                assert_eq!(kind, "auth");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn api_error_falls_back_to_status() {
        let err = api_error(502, b"<html>bad gateway</html>");
        assert!(matches!(err, UpstreamError::Status { status: 502 }));
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn endpoints_with_base() {
        let endpoints = UpstreamEndpoints::with_base("http://127.0.0.1:9000/");
        assert_eq!(endpoints.chat_url, "http://127.0.0.1:9000/chat/completions");
        assert_eq!(
            endpoints.session_token_url,
            "http://127.0.0.1:9000/copilot_internal/v2/token"
        );
    }

    #[test]
    fn config_from_global_uses_timeouts() {
        let mut global = GlobalConfig::default();
        global.timeouts.connect_secs = 3;
        global.proxy = Some("http://proxy:8080".to_string());
        let config = UpstreamClientConfig::from_global(&global);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(600));
        assert_eq!(config.proxy.as_deref(), Some("http://proxy:8080"));
        assert_eq!(config.endpoints, UpstreamEndpoints::default());
    }
}
