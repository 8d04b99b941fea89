//! Session identity resolution.
//!
//! Two policies, chosen in config and never mixed:
//! - `explicit` — the request body carries `session_id`; missing or blank is a 400
//! - `cookie` — the id lives in a cookie; a fresh one is minted on first contact

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use regchat_core::config::{SessionConfig, SessionPolicy};
use thiserror::Error;
use uuid::Uuid;

use super::memory::MAX_SESSION_ID_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub id: String,
    /// True when the id was generated for this request and must be sent back.
    pub minted: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Missing session ID")]
    Missing,

    #[error("Session ID must be at most {max} characters")]
    TooLong { max: usize },
}

#[derive(Debug, Clone)]
pub struct SessionResolver {
    policy: SessionPolicy,
    cookie_name: String,
}

impl SessionResolver {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            policy: config.policy,
            cookie_name: config.cookie_name.trim().to_string(),
        }
    }

    /// Resolve the session for one request.
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        body_session_id: Option<&str>,
    ) -> Result<ResolvedSession, SessionError> {
        match self.policy {
            SessionPolicy::Explicit => {
                let id = body_session_id
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or(SessionError::Missing)?;
                validate_length(id)?;
                Ok(ResolvedSession {
                    id: id.to_string(),
                    minted: false,
                })
            }
            SessionPolicy::Cookie => {
                let existing = cookie_value(headers, &self.cookie_name)
                    .filter(|id| !id.is_empty() && validate_length(id).is_ok());
                Ok(match existing {
                    Some(id) => ResolvedSession { id, minted: false },
                    None => {
                        let id = Uuid::new_v4().to_string();
                        tracing::debug!(session_id = %id, "Minted new session");
                        ResolvedSession { id, minted: true }
                    }
                })
            }
        }
    }

    /// `Set-Cookie` value for a freshly minted session, `None` otherwise.
    pub fn set_cookie(&self, session: &ResolvedSession) -> Option<HeaderValue> {
        if !session.minted || self.policy != SessionPolicy::Cookie {
            return None;
        }
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_name, session.id
        ))
        .ok()
    }
}

fn validate_length(id: &str) -> Result<(), SessionError> {
    if id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(SessionError::TooLong {
            max: MAX_SESSION_ID_LEN,
        });
    }
    Ok(())
}

/// Find `name` in any `Cookie` header (`a=1; b=2`).
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}
