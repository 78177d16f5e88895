//! Media metadata resolution, an external collaborator.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};

use crate::model::{MediaRef, MediaReference};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("media not found")]
    NotFound,
    #[error("resolver unavailable: {0}")]
    Unavailable(String),
}

impl ResolveError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool { matches!(self, ResolveError::Unavailable(_)) }
}

#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, media: &MediaRef) -> Result<MediaReference, ResolveError>;
}

/* ---------------- HTTP ---------------- */

#[derive(Deserialize)]
struct ResolveBody {
    title:         String,
    duration_secs: f64,
    thumbnail:     Option<String>,
}

/// Calls `{base}/resolve?ref=<media ref>` and expects
/// `{"title", "duration_secs", "thumbnail"}` back.
pub struct HttpResolver {
    client:   Client,
    base_url: String,
}

impl HttpResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl MediaResolver for HttpResolver {
    async fn resolve(&self, media: &MediaRef) -> Result<MediaReference, ResolveError> {
        let url = format!("{}/resolve", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[("ref", media.as_str())])
            .send()
            .await
            .map_err(|e| ResolveError::Unavailable(format!("request error: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(ResolveError::NotFound),
            s if !s.is_success() => return Err(ResolveError::Unavailable(format!("status {s}"))),
            _ => {}
        }

        let body: ResolveBody = resp
            .json()
            .await
            .map_err(|e| ResolveError::Unavailable(format!("parse error: {e}")))?;
        let duration = Duration::try_from_secs_f64(body.duration_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(ResolveError::NotFound)?;
        Ok(MediaReference {
            reference: media.clone(),
            title: body.title,
            duration,
            thumbnail: body.thumbnail,
        })
    }
}

/* ---------------- in-memory ---------------- */

/// Fixed catalogue. Used when no resolver URL is configured, and in tests.
#[derive(Default)]
pub struct StaticResolver {
    catalogue: RwLock<HashMap<MediaRef, MediaReference>>,
}

impl StaticResolver {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, media: MediaReference) {
        self.catalogue.write().insert(media.reference.clone(), media);
    }

    pub fn with(self, raw: &str, title: &str, duration: Duration) -> Self {
        if let Ok(reference) = MediaRef::parse(raw) {
            self.insert(MediaReference {
                reference,
                title: title.to_string(),
                duration,
                thumbnail: None,
            });
        }
        self
    }
}

#[async_trait]
impl MediaResolver for StaticResolver {
    async fn resolve(&self, media: &MediaRef) -> Result<MediaReference, ResolveError> {
        self.catalogue.read().get(media).cloned().ok_or(ResolveError::NotFound)
    }
}
