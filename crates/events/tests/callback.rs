//! Callback delivery against a throwaway local HTTP server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::{json, Value};
use sourcepin_core::request::{CallbackMethod, CallbackSpec};
use sourcepin_events::{CallbackDelivery, RetryPolicy, WebhookError};

#[derive(Default)]
struct Target {
    hits: AtomicU32,
    succeed_after: u32,
    seen: Mutex<Vec<(Method, Option<String>, Value)>>,
    hit_times: Mutex<Vec<Instant>>,
}

async fn receive(
    State(target): State<Arc<Target>>,
    method: Method,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let hit = target.hits.fetch_add(1, Ordering::SeqCst) + 1;
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    target.seen.lock().unwrap().push((method, auth, body));
    target.hit_times.lock().unwrap().push(Instant::now());
    if target.succeed_after > 0 && hit >= target.succeed_after {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Serve `target` on an ephemeral port and return its URL.
async fn serve(target: Arc<Target>) -> String {
    let app = Router::new()
        .route("/callback", any(receive))
        .with_state(target);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/callback")
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 9,
        initial_delay: Duration::from_millis(2),
    }
}

// ---------------------------------------------------------------------------
// Test: a target that always fails is tried exactly max_attempts times
// ---------------------------------------------------------------------------

#[tokio::test]
async fn always_failing_target_is_retried_nine_times() {
    let target = Arc::new(Target::default());
    let url = serve(target.clone()).await;
    let delivery = CallbackDelivery::new(fast_policy()).unwrap();
    let callback = CallbackSpec {
        url,
        method: CallbackMethod::Post,
        auth_header: None,
    };

    let err = delivery
        .deliver(&callback, &json!({"callback": {"status": "SUCCESS"}}))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        WebhookError::Exhausted { attempts: 9, ref last } if matches!(**last, WebhookError::HttpStatus(500))
    );
    assert_eq!(target.hits.load(Ordering::SeqCst), 9);

    let times = target.hit_times.lock().unwrap();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = fast_policy().delays();
    for (gap, delay) in gaps.iter().zip(expected.iter()) {
        assert!(gap >= delay, "gap {gap:?} shorter than backoff {delay:?}");
    }
}

// ---------------------------------------------------------------------------
// Test: delivery stops at the first success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delivery_stops_after_first_success() {
    let target = Arc::new(Target {
        succeed_after: 3,
        ..Default::default()
    });
    let url = serve(target.clone()).await;
    let delivery = CallbackDelivery::new(fast_policy()).unwrap();
    let callback = CallbackSpec {
        url,
        method: CallbackMethod::Post,
        auth_header: None,
    };

    delivery.deliver(&callback, &json!({"ok": true})).await.unwrap();

    assert_eq!(target.hits.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Test: method, auth header and payload are passed through
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uses_requested_method_and_auth_header() {
    let target = Arc::new(Target {
        succeed_after: 1,
        ..Default::default()
    });
    let url = serve(target.clone()).await;
    let delivery = CallbackDelivery::new(fast_policy()).unwrap();
    let callback = CallbackSpec {
        url,
        method: CallbackMethod::Put,
        auth_header: Some("Bearer s3cret".to_string()),
    };
    let payload = json!({"tag": "pull-1-root", "callback": {"status": "SUCCESS", "id": "abc"}});

    delivery.deliver(&callback, &payload).await.unwrap();

    let seen = target.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Method::PUT);
    assert_eq!(seen[0].1.as_deref(), Some("Bearer s3cret"));
    assert_eq!(seen[0].2, payload);
}

// ---------------------------------------------------------------------------
// Test: transport errors are retried like bad statuses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_target_exhausts_attempts() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let delivery = CallbackDelivery::new(RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
    })
    .unwrap();
    let callback = CallbackSpec {
        url: format!("http://{addr}/gone"),
        method: CallbackMethod::Post,
        auth_header: None,
    };

    let err = delivery.deliver(&callback, &json!({})).await.unwrap_err();
    assert_matches!(err, WebhookError::Exhausted { attempts: 3, .. });
}
