use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{forbidden, AppResult},
    fanout::{FanoutError, Subscription},
    routes::auth::Viewer,
    state::AppState,
};

pub fn router() -> Router {
    Router::new()
        .route("/queue",        get(queue_ws))
        .route("/chat",         get(chat_ws))
        .route("/playback",     get(playback_ws))
        .route("/tickets/:id",  get(ticket_ws))
}

async fn queue_ws(ws: WebSocketUpgrade, Extension(st): Extension<AppState>) -> impl IntoResponse {
    let sub = st.engine.subscribe_queue();
    ws.on_upgrade(move |s| pump(s, sub, "queue"))
}

async fn chat_ws(ws: WebSocketUpgrade, Extension(st): Extension<AppState>) -> impl IntoResponse {
    let sub = st.chat.subscribe();
    ws.on_upgrade(move |s| pump(s, sub, "chat"))
}

async fn playback_ws(ws: WebSocketUpgrade, Extension(st): Extension<AppState>) -> impl IntoResponse {
    let sub = st.playback.subscribe();
    ws.on_upgrade(move |s| pump(s, sub, "playback"))
}

async fn ticket_ws(
    ws: WebSocketUpgrade,
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let ticket = st.engine.ticket(id)?;
    if ticket.submitted_by != who && !st.moderation.is_moderator(&who) {
        return Err(forbidden("not your ticket"));
    }
    let sub = st.engine.monitor_ticket(id)?;
    Ok(ws.on_upgrade(move |s| pump(s, sub, "ticket")))
}

/* ---------------- per connection ---------------- */

/// Forwards one subscription to the socket until either side ends.
/// Dropping `sub` on the way out unsubscribes it.
async fn pump<T>(sock: WebSocket, mut sub: Subscription<T>, topic: &'static str)
where
    T: Clone + Serialize + Send + 'static,
{
    let (mut tx, mut rx) = sock.split();
    tracing::debug!(topic, subscriber = sub.id(), "observer connected");

    loop {
        tokio::select! {
            item = sub.recv() => match item {
                Some(Ok(v)) => {
                    let text = match serde_json::to_string(&v) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(topic, error = %e, "cannot encode update");
                            break;
                        }
                    };
                    if tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(FanoutError::Overflow)) => {
                    let frame = CloseFrame { code: close_code::AGAIN, reason: "subscriber too slow".into() };
                    let _ = tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = rx.next() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(topic, subscriber = sub.id(), "observer gone");
}
