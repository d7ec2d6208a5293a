use std::sync::Mutex;

use chrono::Utc;
use mockito::Matcher;
use once_cell::sync::Lazy;
use serde_json::json;

use polytone::api::pandora_protocol::{PandoraSession, PartnerCredentials, ProtocolClient};
use polytone::error::CoreError;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

// Test credentials with matching keys so the test can forge the encrypted
// syncTime the server side would produce.
fn test_partner() -> PartnerCredentials {
    PartnerCredentials {
        encrypt_key: "testkey123".into(),
        decrypt_key: "testkey123".into(),
        ..PartnerCredentials::default()
    }
}

fn encrypted_sync_time(server_time: i64) -> String {
    let forger = ProtocolClient::new(test_partner());
    // Four bytes of garbage precede the ASCII timestamp on the wire.
    forger
        .encrypt(format!("ZZZZ{}", server_time).as_bytes())
        .unwrap()
}

fn dummy_session() -> PandoraSession {
    PandoraSession {
        sync_time_offset: 0,
        partner_id: "42".into(),
        partner_auth_token: "PAT".into(),
        user_id: "U1".into(),
        user_auth_token: "UAT".into(),
    }
}

#[tokio::test]
async fn two_phase_login_produces_a_session() {
    let _guard = ENV_LOCK.lock().unwrap();
    let mut server = mockito::Server::new_async().await;
    std::env::set_var("PANDORA_API_BASE", server.url());

    let now = Utc::now().timestamp();
    let partner_mock = server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "auth.partnerLogin".into(),
        ))
        .with_status(200)
        .with_body(
            json!({
                "stat": "ok",
                "result": {
                    "partnerId": "42",
                    "partnerAuthToken": "PAT",
                    "syncTime": encrypted_sync_time(now),
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let user_mock = server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "auth.userLogin".into(),
        ))
        .with_status(200)
        .with_body(
            json!({
                "stat": "ok",
                "result": {"userId": "U1", "userAuthToken": "UAT"}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let pc = ProtocolClient::new(test_partner());
    let session = pc.user_login("listener@example.com", "hunter2").await.unwrap();

    partner_mock.assert_async().await;
    user_mock.assert_async().await;
    assert_eq!(session.partner_id, "42");
    assert_eq!(session.partner_auth_token, "PAT");
    assert_eq!(session.user_id, "U1");
    assert_eq!(session.user_auth_token, "UAT");
    // Server answered with the current time, so the offset stays near zero
    // and the corrected clock tracks the real one.
    assert!(session.sync_time_offset.abs() <= 5);
    assert!((session.sync_time() - Utc::now().timestamp()).abs() <= 6);
}

#[tokio::test]
async fn partner_login_failure_is_a_partner_auth_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    let mut server = mockito::Server::new_async().await;
    std::env::set_var("PANDORA_API_BASE", server.url());

    server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "auth.partnerLogin".into(),
        ))
        .with_status(200)
        .with_body(r#"{"stat":"fail","code":1002}"#)
        .create_async()
        .await;

    let pc = ProtocolClient::new(test_partner());
    match pc.partner_login().await {
        Err(CoreError::PartnerAuth(msg)) => assert!(msg.contains("1002")),
        other => panic!("expected partner auth error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn user_login_rejection_is_a_user_auth_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    let mut server = mockito::Server::new_async().await;
    std::env::set_var("PANDORA_API_BASE", server.url());

    server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "auth.partnerLogin".into(),
        ))
        .with_status(200)
        .with_body(
            json!({
                "stat": "ok",
                "result": {
                    "partnerId": "42",
                    "partnerAuthToken": "PAT",
                    "syncTime": encrypted_sync_time(Utc::now().timestamp()),
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "auth.userLogin".into(),
        ))
        .with_status(200)
        .with_body(r#"{"stat":"fail","code":1002}"#)
        .create_async()
        .await;

    let pc = ProtocolClient::new(test_partner());
    match pc.user_login("listener@example.com", "wrong").await {
        Err(CoreError::UserAuth(msg)) => assert!(msg.contains("1002")),
        other => panic!("expected user auth error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn call_unwraps_the_result_envelope() {
    let _guard = ENV_LOCK.lock().unwrap();
    let mut server = mockito::Server::new_async().await;
    std::env::set_var("PANDORA_API_BASE", server.url());

    server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "user.getStationList".into(),
        ))
        .with_status(200)
        .with_body(r#"{"stat":"ok","result":{"stations":[{"stationName":"Quickmix"}]}}"#)
        .create_async()
        .await;

    let pc = ProtocolClient::new(test_partner());
    let result = pc
        .call(&dummy_session(), "user.getStationList", json!({}), false)
        .await
        .unwrap();
    assert_eq!(result["stations"][0]["stationName"], "Quickmix");
}

#[tokio::test]
async fn rejected_call_carries_the_error_code() {
    let _guard = ENV_LOCK.lock().unwrap();
    let mut server = mockito::Server::new_async().await;
    std::env::set_var("PANDORA_API_BASE", server.url());

    server
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded(
            "method".into(),
            "station.getPlaylist".into(),
        ))
        .with_status(200)
        .with_body(r#"{"stat":"fail","code":1039}"#)
        .create_async()
        .await;

    let pc = ProtocolClient::new(test_partner());
    let err = pc
        .call(&dummy_session(), "station.getPlaylist", json!({}), true)
        .await
        .expect_err("rejected");
    assert!(err.to_string().contains("1039"));
}
