//! Test donor server lifecycle management
//!
//! The donors use a blocking HTTP client, so the axum server runs on its own
//! thread with its own tokio runtime. Each test gets an isolated server whose
//! content can be changed between polls.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::net::TcpListener;

/// What the che endpoint currently serves.
#[derive(Debug, Clone)]
pub struct CheFile {
    pub body: Vec<u8>,
    pub etag: String,
    pub last_modified: String,
    /// Serve without `ETag` and `Last-Modified`.
    pub omit_validators: bool,
}

/// Headers of one request received by the server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Default)]
struct ServerState {
    che: Option<CheFile>,
    listing: String,
    files: HashMap<String, Vec<u8>>,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<ServerState>>;

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

impl ServerState {
    fn record(&mut self, path: String, headers: &HeaderMap) {
        self.requests.push(RecordedRequest {
            path,
            if_none_match: header_string(headers, header::IF_NONE_MATCH),
            if_modified_since: header_string(headers, header::IF_MODIFIED_SINCE),
            user_agent: header_string(headers, header::USER_AGENT),
        });
    }
}

async fn che_file(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    state.record("/che/dump.zip".to_string(), &headers);
    let Some(che) = state.che.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if header_string(&headers, header::IF_NONE_MATCH).as_deref() == Some(che.etag.as_str()) {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    if che.omit_validators {
        return che.body.into_response();
    }
    (
        [
            (header::ETAG, che.etag),
            (header::LAST_MODIFIED, che.last_modified),
        ],
        che.body,
    )
        .into_response()
}

async fn zavod_listing(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    state.record("/zavod/".to_string(), &headers);
    state.listing.clone().into_response()
}

async fn zavod_file(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    state.record(format!("/zavod/{}", name), &headers);
    match state.files.get(&name) {
        Some(body) => body.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn make_app(state: SharedState) -> Router {
    Router::new()
        .route("/che/dump.zip", get(che_file))
        .route("/zavod/", get(zavod_listing))
        .route("/zavod/{name}", get(zavod_file))
        .with_state(state)
}

/// Test donor server on a random local port
///
/// When dropped, the server gracefully shuts down and its thread is joined.
pub struct DonorServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    state: SharedState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DonorServer {
    /// Spawns a new server with nothing to serve yet.
    ///
    /// # Panics
    ///
    /// Panics if the runtime can't be built or the port can't be bound.
    pub fn spawn() -> Self {
        let state = SharedState::default();
        let app = make_app(state.clone());
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Failed to build tokio runtime");
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("Failed to bind to random port");
                addr_tx
                    .send(listener.local_addr().expect("Failed to get local address"))
                    .expect("Test thread went away");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        shutdown_rx.await.ok();
                    })
                    .await
                    .expect("Server failed");
            });
        });

        // The listener is bound before the address is sent, so it is ready.
        let addr = addr_rx.recv().expect("Server thread died before binding");
        Self {
            base_url: format!("http://{}", addr),
            state,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn che_url(&self) -> String {
        format!("{}/che/dump.zip", self.base_url)
    }

    pub fn zavod_url(&self) -> String {
        format!("{}/zavod/", self.base_url)
    }

    pub fn set_che(&self, che: Option<CheFile>) {
        self.state.lock().unwrap().che = che;
    }

    pub fn set_listing(&self, listing: impl Into<String>) {
        self.state.lock().unwrap().listing = listing.into();
    }

    pub fn put_file(&self, name: &str, body: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), body);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn last_request(&self) -> RecordedRequest {
        self.requests().pop().expect("No request received")
    }
}

impl Drop for DonorServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
