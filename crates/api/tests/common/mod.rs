#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::Value;
use sourcepin_api::config::ServerConfig;
use sourcepin_api::router::build_app_router;
use sourcepin_api::state::AppState;
use sourcepin_core::types::DeploymentMode;
use sourcepin_events::RetryPolicy;
use sourcepin_git::{CommitIdentity, GitVersion};
use sourcepin_pipeline::{AdjustPipeline, AdjustProvider, CommandProvider, RepoProvider};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const PUBLIC_WS_URL: &str = "ws://pin.test";

/// Test server configuration rooted in a scratch directory.
pub fn test_config(root: &Path, aligners: AdjustPipeline) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_ws_url: PUBLIC_WS_URL.to_string(),
        cors_origins: Vec::new(),
        request_timeout_secs: 60,
        deployment_mode: DeploymentMode::Production,
        work_dir: root.join("work"),
        log_dir: root.join("logs"),
        log_retention: Duration::from_secs(3600),
        log_sweep_interval: Duration::from_secs(60),
        shutdown_grace: Duration::from_secs(30),
        identity: CommitIdentity::default(),
        repo_provider: RepoProvider::Local {
            root: root.join("repos"),
        },
        aligners,
        callback_retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
        },
    }
}

/// A running application plus the scratch directory it lives in.
pub struct TestApp {
    pub root: TempDir,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

/// Build the full application router with all middleware layers.
pub async fn build_test_app(aligners: AdjustPipeline) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path(), aligners);
    let git_version = GitVersion::detect().await.unwrap();
    let state = AppState::build(config.clone(), git_version).await.unwrap();
    let router = build_app_router(state.clone(), &config);
    TestApp {
        root,
        state,
        router,
    }
}

/// A single shell-script alignment provider for build type `maven`.
pub fn shell_aligner(script: &str) -> AdjustPipeline {
    AdjustPipeline::new(Some("maven".to_string())).with_provider(
        "maven",
        AdjustProvider::Command(CommandProvider::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
        )),
    )
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Serve `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

// ---------------------------------------------------------------------------
// Callback target
// ---------------------------------------------------------------------------

/// Local HTTP endpoint recording every callback payload it receives.
pub struct CallbackTarget {
    pub url: String,
    received: mpsc::UnboundedReceiver<Value>,
}

impl CallbackTarget {
    pub async fn start() -> Self {
        async fn record(
            State(tx): State<mpsc::UnboundedSender<Value>>,
            Json(payload): Json<Value>,
        ) -> StatusCode {
            let _ = tx.send(payload);
            StatusCode::OK
        }

        let (tx, received) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/done", post(record).put(record))
            .with_state(tx);
        let addr = serve(app).await;
        Self {
            url: format!("http://{addr}/done"),
            received,
        }
    }

    /// Next payload, failing the test after a generous timeout.
    pub async fn next(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(60), self.received.recv())
            .await
            .expect("callback arrives")
            .expect("callback target is running")
    }
}

// ---------------------------------------------------------------------------
// Git fixtures
// ---------------------------------------------------------------------------

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args([
            "-c",
            "user.name=Fixture",
            "-c",
            "user.email=fixture@localhost",
            "-c",
            "commit.gpgSign=false",
            "-c",
            "tag.gpgSign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Upstream repository with one commit on `main`, tagged `v1.0`.
/// Returns its `file://` URL.
pub fn upstream(root: &Path) -> String {
    let dir: PathBuf = root.join("upstream");
    std::fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init", "-q"]);
    git(&dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(dir.join("pom.xml"), "<version>1.0</version>\n").unwrap();
    git(&dir, &["add", "-A"]);
    git(&dir, &["commit", "-q", "-m", "Release 1.0"]);
    git(&dir, &["tag", "-a", "v1.0", "-m", "1.0"]);
    format!("file://{}", dir.display())
}
