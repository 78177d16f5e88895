use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey,
                   Header, Validation};
use serde::{Deserialize, Serialize};

use crate::model::Identity;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims { pub sub:String, pub exp:i64 }

/// Local tooling and tests only; real tokens come from the identity provider.
pub fn sign(who:&Identity, secret:&str, ttl_secs:i64) -> Result<String, jsonwebtoken::errors::Error> {
    let c = Claims { sub: who.as_str().into(), exp: Utc::now().timestamp()+ttl_secs };
    encode(&Header::default(), &c, &EncodingKey::from_secret(secret.as_bytes()))
}

pub fn verify(token:&str, secret:&str) -> Option<Identity> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()),
                     &Validation::new(Algorithm::HS256))
        .ok()
        .filter(|d| !d.claims.sub.is_empty())
        .map(|d| Identity(d.claims.sub))
}
