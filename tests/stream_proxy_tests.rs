use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use polytone::api::mock::MockProvider;
use polytone::api::Provider;
use polytone::config::MatcherConfig;
use polytone::manager::{ManagerHandle, SourceManager};
use polytone::stream::{router, StreamState};

const AUDIO: &[u8] = b"RIFFxxxxWAVEfmt fake-audio-payload-for-tests";

async fn upstream_audio() -> (mockito::ServerGuard, String) {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/audio")
        .with_status(200)
        .with_header("content-type", "audio/wav")
        .with_body(AUDIO)
        .create_async()
        .await;
    let url = format!("{}/audio", server.url());
    (server, url)
}

async fn serve(provider: Arc<MockProvider>) -> SocketAddr {
    let manager = SourceManager::new(
        vec![provider as Arc<dyn Provider>],
        MatcherConfig::default(),
    );
    let state = Arc::new(StreamState::new(
        Arc::new(ManagerHandle::new(manager)),
        16,
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn full_request_returns_entire_body() {
    let (_upstream, url) = upstream_audio().await;
    let provider = Arc::new(MockProvider {
        stream_target: url,
        ..MockProvider::default()
    });
    let addr = serve(provider).await;

    let resp = reqwest::get(format!("http://{}/stream/mock:t1", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("accept-ranges").unwrap().to_str().unwrap(),
        "bytes"
    );
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "audio/wav"
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), AUDIO);
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let (_upstream, url) = upstream_audio().await;
    let provider = Arc::new(MockProvider {
        stream_target: url,
        ..MockProvider::default()
    });
    let addr = serve(provider).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{}/stream/mock:t1", addr))
        .header("range", "bytes=4-7")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(
        resp.headers().get("content-range").unwrap().to_str().unwrap(),
        format!("bytes 4-7/{}", AUDIO.len())
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &AUDIO[4..=7]);
}

#[tokio::test]
async fn malformed_range_falls_back_to_full_response() {
    let (_upstream, url) = upstream_audio().await;
    let provider = Arc::new(MockProvider {
        stream_target: url,
        ..MockProvider::default()
    });
    let addr = serve(provider).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{}/stream/mock:t1", addr))
        .header("range", "bytes=zz-7")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().len(), AUDIO.len());
}

#[tokio::test]
async fn resolution_failure_is_a_plain_text_502() {
    let provider = Arc::new(MockProvider::failing("session expired"));
    let addr = serve(provider).await;

    let resp = reqwest::get(format!("http://{}/stream/mock:t1", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("stream error:"), "body was: {}", body);
}

#[tokio::test]
async fn repeat_requests_resolve_once() {
    let (_upstream, url) = upstream_audio().await;
    let provider = Arc::new(MockProvider {
        stream_target: url,
        ..MockProvider::default()
    });
    let addr = serve(provider.clone()).await;

    let client = reqwest::Client::new();
    let a = client.get(format!("http://{}/stream/mock:t1", addr)).send();
    let b = client.get(format!("http://{}/stream/mock:t1", addr)).send();
    let (ra, rb) = tokio::join!(a, b);
    assert_eq!(ra.unwrap().status(), 200);
    assert_eq!(rb.unwrap().status(), 200);
    // Both hits converge on one provider resolution.
    assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn next_hint_prefetches_in_the_background() {
    let (_upstream, url) = upstream_audio().await;
    let provider = Arc::new(MockProvider {
        stream_target: url,
        ..MockProvider::default()
    });
    let addr = serve(provider.clone()).await;

    let resp = reqwest::get(format!(
        "http://{}/stream/mock:t1?next=mock:t2",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 200);

    // The prefetch is detached; poll until it lands.
    let mut calls = 0;
    for _ in 0..50 {
        calls = provider.stream_calls.load(Ordering::SeqCst);
        if calls == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(calls, 2, "prefetch for the next track never resolved");
}

#[tokio::test]
async fn next_hint_equal_to_current_id_is_skipped() {
    let (_upstream, url) = upstream_audio().await;
    let provider = Arc::new(MockProvider {
        stream_target: url,
        ..MockProvider::default()
    });
    let addr = serve(provider.clone()).await;

    let resp = reqwest::get(format!(
        "http://{}/stream/mock:t1?next=mock:t1",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 200);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 1);
}
