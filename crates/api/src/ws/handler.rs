use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use sourcepin_core::types::JobId;

use crate::state::AppState;

/// How long the writer may take to flush the final frames after the
/// client or the job has gone away.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /ws/{job_id} -- stream a job's log.
///
/// The log written so far is replayed first, then live lines follow until
/// the job ends, at which point the server closes the connection. A
/// finished job replays its durable log and closes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, JobId::from(job_id), state))
}

/// Manage a single connection after upgrade.
///
/// Splits the socket into a sink and a stream, then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a writer that drains the connection channel into the sink.
///   3. Spawns a forwarder that moves log lines into the channel.
///   4. Reads inbound frames until the client or the log goes away.
async fn handle_socket(socket: WebSocket, job_id: JobId, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = state.ws_manager.add(conn_id.clone(), job_id.clone()).await;
    let watchers = state.ws_manager.watchers(&job_id).await;
    tracing::info!(
        conn_id = %conn_id,
        job_id = %job_id,
        watchers = watchers,
        "Log stream connected"
    );

    let mut subscription = state.logs.subscribe(&job_id).await;
    let (mut sink, mut stream) = socket.split();

    let writer_conn_id = conn_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %writer_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut forwarder = tokio::spawn(async move {
        while let Some(line) = subscription.next_line().await {
            if tx.send(Message::Text(line.into())).is_err() {
                return;
            }
        }
        let _ = tx.send(Message::Close(None));
    });

    loop {
        tokio::select! {
            _ = &mut forwarder => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    // Dropping the forwarder drops the subscription, which detaches it
    // from the hub.
    forwarder.abort();
    state.ws_manager.remove(&conn_id).await;
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, writer).await;
    tracing::info!(conn_id = %conn_id, job_id = %job_id, "Log stream disconnected");
}
