use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::fmt::Display;

use crate::gate::{Challenge, Rejection};

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Rejected: {0}")]
    Rejected(Rejection),

    #[error("Activity challenge required")]
    ChallengeRequired(Challenge),

    #[error("Internal: {0}")]
    Internal(String),

    #[error("Config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("DB: {0}")]
    Db(#[from] sqlx::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppErr {
    pub fn status(&self) -> StatusCode {
        match self {
            AppErr::Validation(_) => StatusCode::BAD_REQUEST,
            AppErr::NotFound(_) => StatusCode::NOT_FOUND,
            AppErr::Forbidden(_) => StatusCode::FORBIDDEN,
            AppErr::RateLimited | AppErr::Rejected(Rejection::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            AppErr::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppErr::ChallengeRequired(_) => StatusCode::PRECONDITION_REQUIRED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let code = self.status();
        let body = match &self {
            AppErr::ChallengeRequired(ch) => json!({"error": self.to_string(), "challenge": ch}),
            _ => json!({"error": self.to_string()}),
        };
        if code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (code, Json(body)).into_response()
    }
}

/* ── 小助手：把任何 error 轉成 Validation / NotFound / Forbidden ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Validation(e.to_string()) }
pub fn not_found<E: Display>(e: E) -> AppErr { AppErr::NotFound(e.to_string()) }
pub fn forbidden<E: Display>(e: E) -> AppErr { AppErr::Forbidden(e.to_string()) }
