use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cproxy_core::{
    CopilotClient, DeviceFlowError, PollTiming, UpstreamClientConfig, UpstreamEndpoints,
    poll_access_token,
};
use cproxy_protocol::github::LoginResponse;

const INSTANT: PollTiming = PollTiming {
    default_interval: Duration::ZERO,
    padding: Duration::ZERO,
    slow_down_step: Duration::ZERO,
};

fn client_for(server: &MockServer) -> CopilotClient {
    CopilotClient::new(UpstreamClientConfig {
        endpoints: UpstreamEndpoints::with_base(&server.uri()),
        ..UpstreamClientConfig::default()
    })
    .unwrap()
}

fn login() -> LoginResponse {
    LoginResponse {
        device_code: "dev-1".to_string(),
        user_code: "ABCD-1234".to_string(),
        verification_uri: "https://github.com/login/device".to_string(),
        interval: 0,
        expires_in: None,
    }
}

async fn mount_poll(server: &MockServer, body: serde_json::Value, times: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body));
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

#[tokio::test]
async fn polls_until_token_is_issued() {
    let server = MockServer::start().await;
    mount_poll(&server, json!({"error": "authorization_pending"}), Some(2)).await;
    mount_poll(&server, json!({"error": "slow_down"}), Some(1)).await;
    mount_poll(
        &server,
        json!({"access_token": "gho_done", "token_type": "bearer", "scope": "read:user"}),
        None,
    )
    .await;

    let token = poll_access_token(&client_for(&server), &login(), INSTANT)
        .await
        .unwrap();
    assert_eq!(token, "gho_done");

    let polls = server.received_requests().await.unwrap();
    assert_eq!(polls.len(), 4);
}

#[tokio::test]
async fn access_denied_aborts() {
    let server = MockServer::start().await;
    mount_poll(&server, json!({"error": "access_denied"}), None).await;

    let err = poll_access_token(&client_for(&server), &login(), INSTANT)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceFlowError::Denied));
}

#[tokio::test]
async fn expired_token_aborts() {
    let server = MockServer::start().await;
    mount_poll(&server, json!({"error": "authorization_pending"}), Some(1)).await;
    mount_poll(&server, json!({"error": "expired_token"}), None).await;

    let err = poll_access_token(&client_for(&server), &login(), INSTANT)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceFlowError::Expired));
}

#[tokio::test]
async fn upstream_failure_is_propagated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = poll_access_token(&client_for(&server), &login(), INSTANT)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceFlowError::Upstream(_)));
}
