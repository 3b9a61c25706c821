//! Server-side login sessions and the cookie that names them.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::response::Redirect;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use mindful_store::User;

use crate::app::AppState;

/// Ten years; keeps the expiry arithmetic in range.
const MAX_TTL_MINUTES: u64 = 10 * 365 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// In-memory token → session map.  Sessions slide: every successful lookup
/// pushes the expiry out by the TTL.  Restarting the server logs everyone out.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl_minutes: u64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes.min(MAX_TTL_MINUTES) as i64),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session for `user`; returns the opaque token for the cookie.
    pub fn create(&self, user: &User) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id: user.id.clone(),
            username: user.username.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        self.lock().insert(token.clone(), session);
        token
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        self.get_at(token, Utc::now())
    }

    fn get_at(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut sessions = self.lock();
        sessions.retain(|_, session| session.expires_at > now);
        let session = sessions.get_mut(token)?;
        session.expires_at = now + self.ttl;
        Some(session.clone())
    }

    pub fn remove(&self, token: &str) -> bool {
        self.lock().remove(token).is_some()
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Value of the cookie called `name`, if the request carries one.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(name: &str, token: &str, max_age_secs: i64, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}{secure}")
}

pub fn expired_cookie(name: &str, secure: bool) -> String {
    session_cookie(name, "", 0, secure)
}

/// The logged-in user of a request.  Extraction fails with a redirect to the
/// login page, so gated handlers simply take this as an argument.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: String,
    pub username: String,
    pub token: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookie_name = &state.runtime.config.server.session_cookie;
        let token = cookie_value(&parts.headers, cookie_name).ok_or(Redirect::to("/login"))?;
        let session = state.sessions.get(&token).ok_or(Redirect::to("/login"))?;
        Ok(Self {
            user_id: session.user_id,
            username: session.username,
            token,
        })
    }
}
