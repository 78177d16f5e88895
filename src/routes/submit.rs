//! routes/submit.rs
use axum::{
    extract::{Extension, Json, Path},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    chat::{ChatMessage, ChatSnapshot},
    error::{AppErr, AppResult},
    gate::{Action, Challenge, ChallengeResponse, Proof, Puzzle},
    model::QueueSnapshot,
    queue::EnqueueTicket,
    routes::auth::Viewer,
    state::AppState,
};

#[derive(Deserialize)]
struct EnqueueInput {
    media: String,
    #[serde(default)]
    proof: Option<Proof>,
}

#[derive(Deserialize)]
struct ChallengeInput {
    action: Action,
}

#[derive(Serialize)]
struct Unlocked {
    action: Action,
}

#[derive(Deserialize)]
struct ChatInput {
    text: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/queue",                get(queue))
        .route("/enqueue",              post(enqueue))
        .route("/tickets/:id",          get(ticket))
        .route("/tickets/:id/proof",    post(ticket_proof))
        .route("/pow/puzzle",           post(puzzle))
        .route("/challenges",           post(challenge))
        .route("/challenges/answer",    post(answer_challenge))
        .route("/chat",                 get(chat).post(send_chat))
}

/* ---------------- queue / tickets ---------------- */

async fn queue(Extension(st): Extension<AppState>) -> Json<QueueSnapshot> {
    Json(st.engine.snapshot())
}

// admission outcome rides on the ticket, not the status code
async fn enqueue(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(p): Json<EnqueueInput>,
) -> AppResult<Json<EnqueueTicket>> {
    Ok(Json(st.engine.enqueue(&who, &p.media, p.proof).await?))
}

async fn ticket(
    Extension(st): Extension<AppState>,
    Viewer(_): Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EnqueueTicket>> {
    Ok(Json(st.engine.ticket(id)?))
}

async fn ticket_proof(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Path(id): Path<Uuid>,
    Json(proof): Json<Proof>,
) -> AppResult<Json<EnqueueTicket>> {
    Ok(Json(st.engine.submit_ticket_proof(&who, id, proof).await?))
}

/* ---------------- admission ---------------- */

async fn puzzle(Extension(st): Extension<AppState>, Viewer(who): Viewer) -> Json<Puzzle> {
    Json(st.gate.issue_puzzle(&who))
}

async fn challenge(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(p): Json<ChallengeInput>,
) -> Json<Challenge> {
    Json(st.gate.issue_challenge(&who, p.action))
}

async fn answer_challenge(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(resp): Json<ChallengeResponse>,
) -> AppResult<Json<Unlocked>> {
    let action = st.gate.submit_activity_challenge(&who, &resp).map_err(AppErr::Rejected)?;
    Ok(Json(Unlocked { action }))
}

/* ---------------- chat ---------------- */

async fn chat(Extension(st): Extension<AppState>) -> Json<Arc<ChatSnapshot>> {
    Json(st.chat.snapshot())
}

async fn send_chat(
    Extension(st): Extension<AppState>,
    Viewer(who): Viewer,
    Json(p): Json<ChatInput>,
) -> AppResult<Json<ChatMessage>> {
    Ok(Json(st.chat.send(&who, &p.text)?))
}
