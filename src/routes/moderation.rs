//! routes/moderation.rs
//! Every handler passes the caller through; `Moderation` decides whether
//! they may act.
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    routing::{delete, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    bans::Ban,
    chat::{ChatMessage, ChatSettings},
    error::AppResult,
    model::{Identity, QueueEntry, QueueSnapshot},
    moderation::BanRequest,
    queue::EnqueueTicket,
    routes::auth::Viewer,
    state::AppState,
};

#[derive(Deserialize)]
struct ForceInput {
    media:    String,
    #[serde(default)]
    position: Option<usize>,
}

#[derive(Deserialize)]
struct MoveInput {
    position: usize,
}

#[derive(Deserialize)]
struct Toggle {
    enabled: bool,
}

pub fn router() -> Router {
    Router::new()
        .route("/mod/enqueue",             post(force_enqueue))
        .route("/mod/tickets/:id/force",   post(force_ticket))
        .route("/mod/queue/:id",           delete(remove_entry))
        .route("/mod/queue/:id/move",      post(reorder))
        .route("/mod/enqueuing",           put(set_enqueuing))
        .route("/mod/chat/messages/:id",   delete(remove_message))
        .route("/mod/chat/settings",       put(chat_settings))
        .route("/mod/bans",                post(ban).get(list_bans))
        .route("/mod/bans/:identity",      delete(unban))
}

async fn force_enqueue(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(p): Json<ForceInput>,
) -> AppResult<Json<QueueEntry>> {
    Ok(Json(st.moderation.force_enqueue(&who, &p.media, p.position).await?))
}

async fn force_ticket(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EnqueueTicket>> {
    Ok(Json(st.moderation.force_enqueue_ticket(&who, id)?))
}

async fn remove_entry(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<QueueEntry>> {
    Ok(Json(st.moderation.remove_entry(&who, id)?))
}

async fn reorder(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Path(id): Path<Uuid>,
    Json(p): Json<MoveInput>,
) -> AppResult<Json<QueueSnapshot>> {
    Ok(Json(st.moderation.reorder(&who, id, p.position)?))
}

async fn set_enqueuing(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(p): Json<Toggle>,
) -> AppResult<StatusCode> {
    st.moderation.set_enqueuing_enabled(&who, p.enabled)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_message(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ChatMessage>> {
    Ok(Json(st.moderation.remove_chat_message(&who, id)?))
}

async fn chat_settings(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(p): Json<ChatSettings>,
) -> AppResult<Json<ChatSettings>> {
    Ok(Json(st.moderation.set_chat_settings(&who, p)?))
}

async fn ban(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(p): Json<BanRequest>,
) -> AppResult<(StatusCode, Json<Ban>)> {
    Ok((StatusCode::CREATED, Json(st.moderation.ban(&who, p).await?)))
}

async fn list_bans(Extension(st): Extension<AppState>, Viewer(who): Viewer) -> AppResult<Json<Vec<Ban>>> {
    Ok(Json(st.moderation.bans(&who)?))
}

async fn unban(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Path(identity): Path<String>,
) -> AppResult<Json<Ban>> {
    Ok(Json(st.moderation.unban(&who, &Identity::new(identity)).await?))
}
