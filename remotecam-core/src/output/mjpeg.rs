//! MJPEG over HTTP
//!
//! Routes:
//! - `GET /` login form, with a failure notice after `?loginFailed=true`
//! - `POST /` form-encoded `password`; mints a stream token on success
//! - `GET /stream?token=T` (alias `/cam.mjpeg`) multipart JPEG stream
//!
//! Every response carries the security headers below. Each stream client
//! gets its own subscription on the [`StreamChannel`]; a client that goes
//! away only ends its own subscription.

use axum::body::Body;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Router};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::AccessControl;
use super::channel::{FrameReceiver, StreamChannel};
use crate::error::{RemoteCamError, Result};

/// Multipart boundary between frames
pub const BOUNDARY: &str = "FRAME";

/// Content policy sent with every response
pub const CONTENT_SECURITY_POLICY: &str =
    "default-src 'self'; style-src 'self'; img-src 'self'; form-action 'self';";

/// Time allowed for open connections to finish on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const LOGIN_FAILED_NOTICE: &str = "Incorrect password. Please try again.";

/// State shared by all handlers
pub struct ServerState {
    pub access: Arc<AccessControl>,
    pub channel: StreamChannel,
    clients: Arc<AtomicUsize>,
}

impl ServerState {
    pub fn new(access: Arc<AccessControl>, channel: StreamChannel) -> Self {
        Self {
            access,
            channel,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open stream connections
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

/// Build the HTTP router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(login_page).post(login))
        .route("/stream", get(stream))
        .route("/cam.mjpeg", get(stream))
        .fallback(not_found)
        .layer(middleware::map_response(security_headers))
        .with_state(state)
}

async fn security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    response
}

/// Headers that keep auth pages out of every cache
fn no_store() -> [(HeaderName, &'static str); 3] {
    [
        (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
    ]
}

#[derive(Debug, Deserialize)]
struct LoginPageQuery {
    #[serde(rename = "loginFailed")]
    login_failed: Option<String>,
}

async fn login_page(Query(query): Query<LoginPageQuery>) -> impl IntoResponse {
    let failed = query.login_failed.as_deref() == Some("true");
    let notice = if failed {
        format!("<p class=\"error\">{}</p>\n", LOGIN_FAILED_NOTICE)
    } else {
        String::new()
    };
    let page = format!(
        "<html>\n<head><title>Login - RemoteCam</title></head>\n<body>\n\
         <form method=\"POST\" action=\"/\">\n\
         Password: <input type=\"password\" name=\"password\" autofocus autocomplete=\"current-password\">\n\
         <input type=\"submit\" value=\"Login\">\n\
         </form>\n{}</body>\n</html>\n",
        notice
    );
    (no_store(), Html(page))
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    password: Option<String>,
}

async fn login(
    State(state): State<Arc<ServerState>>,
    form: std::result::Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(FormRejection::InvalidFormContentType(_)) => {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/x-www-form-urlencoded",
            )
                .into_response();
        }
        Err(rejection) => {
            debug!("Rejected login body: {}", rejection);
            return rejection.into_response();
        }
    };

    let token = form
        .password
        .as_deref()
        .and_then(|password| state.access.login(password));

    match token {
        Some(token) => {
            let page = format!(
                "<html>\n<head><title>RemoteCam Stream</title></head>\n<body>\n\
                 <img src=\"/stream?token={}\" alt=\"Camera Stream\">\n\
                 </body>\n</html>\n",
                token
            );
            (no_store(), Html(page)).into_response()
        }
        None => {
            // a form without a password is a failed attempt too
            state.access.invalidate();
            (StatusCode::FOUND, [(header::LOCATION, "/?loginFailed=true")]).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    token: Option<String>,
}

async fn stream(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let authorized = query
        .token
        .as_deref()
        .is_some_and(|token| state.access.redeem(token));
    if !authorized {
        warn!("Stream request with invalid or missing token");
        return (StatusCode::UNAUTHORIZED, "Invalid or missing access token.").into_response();
    }

    let guard = ClientGuard::new(state.clients.clone());
    let body = Body::from_stream(frame_stream(state.channel.subscribe(), guard));

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
            ),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found.")
}

/// Counts a connected stream client for as long as its body lives
struct ClientGuard {
    clients: Arc<AtomicUsize>,
}

impl ClientGuard {
    fn new(clients: Arc<AtomicUsize>) -> Self {
        let now = clients.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Stream client connected ({} total)", now);
        Self { clients }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let left = self.clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        debug!("Stream client disconnected ({} left)", left);
    }
}

/// One multipart section carrying a JPEG
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

fn frame_stream(
    receiver: FrameReceiver,
    guard: ClientGuard,
) -> impl futures::Stream<Item = std::result::Result<Bytes, Infallible>> {
    futures::stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
        let frame = receiver.recv().await?;
        Some((Ok(multipart_part(&frame)), (receiver, guard)))
    })
}

/// Running HTTP server
pub struct StreamServer {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl StreamServer {
    /// Bind `addr` and start serving
    pub async fn bind(
        addr: SocketAddr,
        access: Arc<AccessControl>,
        channel: StreamChannel,
    ) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| RemoteCamError::server(format!("Failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ServerState::new(access, channel));
        let app = router(state.clone());
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!("MJPEG server listening on http://{}", local_addr);
        Ok(Self {
            local_addr,
            state,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Open stream connections
    pub fn clients(&self) -> usize {
        self.state.clients()
    }

    /// Stop accepting and wait briefly for open connections
    ///
    /// Close the stream channel first so open streams can end.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => info!("MJPEG server stopped"),
            Ok(Ok(Err(e))) => error!("MJPEG server error: {}", e),
            Ok(Err(e)) => error!("MJPEG server task failed: {}", e),
            Err(_) => {
                warn!("MJPEG server did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
