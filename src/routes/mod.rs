use axum::Router;

pub mod auth;
pub mod moderation;
pub mod submit;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .nest("/api",  submit::router().merge(moderation::router()))
        .nest("/ws",   ws::router())
}
