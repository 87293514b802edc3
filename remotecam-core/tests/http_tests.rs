//! Integration tests for the MJPEG HTTP server
//!
//! Runs the real server on an ephemeral port and talks to it with reqwest.

mod mocks;

use bytes::Bytes;
use mocks::{eventually, manual_planar};
use remotecam_core::config::ViewState;
use remotecam_core::output::{AccessControl, StreamChannel, StreamServer, TokenPolicy};
use remotecam_core::pipeline::{Pipeline, PipelineOptions};
use remotecam_core::SessionState;
use reqwest::{redirect, Client, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const PASSWORD: &str = "s3cret";
const WAIT: Duration = Duration::from_secs(5);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn client() -> Client {
    Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

async fn start_server(policy: TokenPolicy) -> (StreamServer, Arc<AccessControl>, StreamChannel) {
    let access = Arc::new(AccessControl::with_password(PASSWORD, policy));
    let channel = StreamChannel::new(8);
    let server = StreamServer::bind(loopback(), access.clone(), channel.clone())
        .await
        .unwrap();
    (server, access, channel)
}

async fn login(client: &Client, addr: SocketAddr, password: &str) -> Response {
    client
        .post(format!("http://{}/", addr))
        .form(&[("password", password)])
        .send()
        .await
        .unwrap()
}

fn token_from_page(page: &str) -> String {
    let start = page.find("token=").expect("stream link") + "token=".len();
    let rest = &page[start..];
    rest[..rest.find('"').unwrap()].to_string()
}

async fn login_token(client: &Client, addr: SocketAddr) -> String {
    let response = login(client, addr, PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    token_from_page(&response.text().await.unwrap())
}

/// Read body chunks until one full multipart section is buffered
async fn read_part(response: &mut Response) -> Vec<u8> {
    let mut buffered = Vec::new();
    loop {
        if let Some(jpeg) = complete_part(&buffered) {
            return jpeg;
        }
        let chunk = tokio::time::timeout(WAIT, response.chunk())
            .await
            .expect("frame in time")
            .unwrap()
            .expect("stream still open");
        buffered.extend_from_slice(&chunk);
    }
}

fn complete_part(buffered: &[u8]) -> Option<Vec<u8>> {
    let text = String::from_utf8_lossy(buffered);
    let header_end = text.find("\r\n\r\n")? + 4;
    let length: usize = text[..header_end]
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))?
        .trim()
        .parse()
        .ok()?;
    let body = buffered.get(header_end..header_end + length)?;
    Some(body.to_vec())
}

#[tokio::test]
async fn test_login_page_and_failure_notice() {
    let (server, _access, _channel) = start_server(TokenPolicy::default()).await;
    let client = client();
    let base = format!("http://{}/", server.local_addr());

    let page = client.get(&base).send().await.unwrap();
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(
        page.headers()["cache-control"],
        "no-store, no-cache, must-revalidate"
    );
    let body = page.text().await.unwrap();
    assert!(body.contains("name=\"password\""));
    assert!(!body.contains("Incorrect password"));

    let failed = client
        .get(format!("{}?loginFailed=true", base))
        .send()
        .await
        .unwrap();
    assert!(failed.text().await.unwrap().contains("Incorrect password"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let (server, _access, _channel) = start_server(TokenPolicy::default()).await;
    let client = client();
    let addr = server.local_addr();

    for path in ["/", "/stream", "/nowhere"] {
        let response = client
            .get(format!("http://{}{}", addr, path))
            .send()
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff", "{}", path);
        assert_eq!(headers["x-frame-options"], "DENY", "{}", path);
        assert_eq!(headers["referrer-policy"], "no-referrer", "{}", path);
        assert!(headers.contains_key("content-security-policy"), "{}", path);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (server, _access, _channel) = start_server(TokenPolicy::default()).await;
    let response = client()
        .get(format!("http://{}/admin", server.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "Not found.");
    server.shutdown().await;
}

#[tokio::test]
async fn test_login_requires_form_encoding() {
    let (server, access, _channel) = start_server(TokenPolicy::default()).await;
    let response = client()
        .post(format!("http://{}/", server.local_addr()))
        .header("content-type", "application/json")
        .body(format!("{{\"password\":\"{}\"}}", PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(!access.has_token());
    server.shutdown().await;
}

#[tokio::test]
async fn test_wrong_password_redirects_and_revokes() {
    let (server, access, _channel) = start_server(TokenPolicy::default()).await;
    let client = client();
    let addr = server.local_addr();

    let token = login_token(&client, addr).await;
    assert!(access.validate(&token));

    let response = login(&client, addr, "guess").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["location"], "/?loginFailed=true");
    assert!(!access.has_token());

    let stream = client
        .get(format!("http://{}/stream?token={}", addr, token))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::UNAUTHORIZED);

    server.shutdown().await;
}

#[tokio::test]
async fn test_stream_requires_token() {
    let (server, _access, _channel) = start_server(TokenPolicy::default()).await;
    let client = client();
    let addr = server.local_addr();

    for query in ["", "?token=", "?token=abc"] {
        let response = client
            .get(format!("http://{}/stream{}", addr, query))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{:?}", query);
        assert_eq!(
            response.text().await.unwrap(),
            "Invalid or missing access token."
        );
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_stream_delivers_frames_and_token_is_single_use() {
    let (server, _access, channel) = start_server(TokenPolicy::default()).await;
    let client = client();
    let addr = server.local_addr();

    let token = login_token(&client, addr).await;
    let mut stream = client
        .get(format!("http://{}/cam.mjpeg?token={}", addr, token))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    assert_eq!(
        stream.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=FRAME"
    );
    assert!(eventually(WAIT, || server.clients() == 1).await);

    channel.publish(Bytes::from_static(b"\xFF\xD8first\xFF\xD9"));
    assert_eq!(read_part(&mut stream).await, b"\xFF\xD8first\xFF\xD9");

    let again = client
        .get(format!("http://{}/stream?token={}", addr, token))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::UNAUTHORIZED);

    drop(stream);
    assert!(eventually(WAIT, || server.clients() == 0).await);
    server.shutdown().await;
}

#[tokio::test]
async fn test_reusable_tokens_open_several_streams() {
    let policy = TokenPolicy {
        ttl: None,
        single_use: false,
    };
    let (server, _access, _channel) = start_server(policy).await;
    let client = client();
    let addr = server.local_addr();
    let token = login_token(&client, addr).await;

    let url = format!("http://{}/stream?token={}", addr, token);
    let first = client.get(&url).send().await.unwrap();
    let second = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert!(eventually(WAIT, || server.clients() == 2).await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let policy = TokenPolicy {
        ttl: Some(Duration::from_millis(50)),
        single_use: true,
    };
    let (server, _access, _channel) = start_server(policy).await;
    let client = client();
    let addr = server.local_addr();
    let token = login_token(&client, addr).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    let response = client
        .get(format!("http://{}/stream?token={}", addr, token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    server.shutdown().await;
}

#[tokio::test]
async fn test_password_change_invalidates_issued_token() {
    let (backend, _feed) = manual_planar(&[30]);
    let options = PipelineOptions::default()
        .with_listen(loopback())
        .with_token_policy(TokenPolicy {
            ttl: None,
            single_use: false,
        })
        .with_view(ViewState::default().with_stream(true).with_preview(false));
    let pipeline = Pipeline::start(backend, options).await.unwrap();
    let client = client();
    let addr = pipeline.local_addr();

    let response = login(&client, addr, remotecam_core::output::DEFAULT_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    let old_token = token_from_page(&response.text().await.unwrap());

    pipeline.change_password("newpass").unwrap();

    let rejected = client
        .get(format!("http://{}/stream?token={}", addr, old_token))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        rejected.text().await.unwrap(),
        "Invalid or missing access token."
    );

    let response = login(&client, addr, "newpass").await;
    assert_eq!(response.status(), StatusCode::OK);
    let new_token = token_from_page(&response.text().await.unwrap());
    assert_ne!(new_token, old_token);
    let stream = client
        .get(format!("http://{}/stream?token={}", addr, new_token))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let (backend, feed) = manual_planar(&[30]);
    let options = PipelineOptions::default()
        .with_listen(loopback())
        .with_view(ViewState::default().with_stream(true).with_preview(false));
    let pipeline = Pipeline::start(backend, options).await.unwrap();
    assert!(
        pipeline
            .session()
            .wait_for_state(SessionState::Capturing, WAIT)
            .await
    );
    assert!(feed.wait_active(WAIT).await);

    let client = client();
    let addr = pipeline.local_addr();
    let response = login(&client, addr, remotecam_core::output::DEFAULT_PASSWORD).await;
    let token = token_from_page(&response.text().await.unwrap());

    let mut stream = client
        .get(format!("http://{}/stream?token={}", addr, token))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(eventually(WAIT, || pipeline.stats().clients == 1).await);

    feed.push(2).await;
    let jpeg = read_part(&mut stream).await;
    let image = remotecam_core::encode::decode(&jpeg).expect("valid JPEG");
    assert_eq!(image.dimensions(), (64, 48));

    pipeline.stop().await;
    pipeline.stop().await;
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.state(), SessionState::Closed);

    // Closing the channel ends the open stream
    let mut ended = false;
    for _ in 0..100 {
        match tokio::time::timeout(WAIT, stream.chunk()).await {
            Ok(Ok(Some(_))) => continue,
            _ => {
                ended = true;
                break;
            }
        }
    }
    assert!(ended);
}
