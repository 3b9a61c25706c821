use std::collections::BTreeMap;

use axum::{Form, Json};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use mindful_store::{HistoryEntry, StoreError, User};

use crate::app::AppState;
use crate::error::AppResult;
use crate::pages;
use crate::password::{hash_password, verify_password};
use crate::session::{CurrentUser, expired_cookie, session_cookie};

pub const USERNAME_EXISTS: &str = "Username already exists. Please log in.";
pub const SIGNUP_SUCCESS: &str = "Signup successful! Please log in.";
pub const INVALID_CREDENTIALS: &str = "Invalid credentials. Please try again.";
pub const MISSING_FIELDS: &str = "Please enter both a username and a password.";

/// Flash messages carried across the post-signup redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Exists,
    Created,
}

impl Notice {
    /// Unknown codes are ignored rather than rejected.
    fn parse(code: &str) -> Option<Self> {
        match code {
            "exists" => Some(Notice::Exists),
            "created" => Some(Notice::Created),
            _ => None,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Notice::Exists => USERNAME_EXISTS,
            Notice::Created => SIGNUP_SUCCESS,
        }
    }

    fn login_redirect(self) -> Redirect {
        match self {
            Notice::Exists => Redirect::to("/login?notice=exists"),
            Notice::Created => Redirect::to("/login?notice=created"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    notice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub bot_response: String,
}

/// Store lookups run on the blocking pool.
async fn find_user(state: &AppState, username: &str) -> anyhow::Result<Option<User>> {
    let users = state.users.clone();
    let username = username.to_string();
    tokio::task::spawn_blocking(move || users.find_by_username(&username)).await?
}

pub async fn index(user: CurrentUser) -> AppResult<Html<String>> {
    Ok(Html(pages::chat_page(&user.username)?))
}

pub async fn signup_form() -> AppResult<Html<String>> {
    Ok(Html(pages::signup_page(None)?))
}

#[instrument(skip_all)]
pub async fn signup(State(state): State<AppState>, Form(form): Form<Credentials>) -> AppResult<Response> {
    let username = form.username.trim().to_string();
    if username.is_empty() || form.password.is_empty() {
        return Ok(Html(pages::signup_page(Some(MISSING_FIELDS))?).into_response());
    }
    if find_user(&state, &username).await?.is_some() {
        return Ok(Notice::Exists.login_redirect().into_response());
    }

    let password = form.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

    let users = state.users.clone();
    let created =
        tokio::task::spawn_blocking(move || users.create(&username, &password_hash)).await?;
    match created {
        Ok(user) => {
            info!(user_id = %user.id, "signup complete");
            Ok(Notice::Created.login_redirect().into_response())
        }
        // Lost a race with a concurrent signup for the same name.
        Err(err) if matches!(err.downcast_ref::<StoreError>(), Some(StoreError::UsernameTaken(_))) => {
            Ok(Notice::Exists.login_redirect().into_response())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn login_form(Query(query): Query<LoginQuery>) -> AppResult<Html<String>> {
    let notice = query.notice.as_deref().and_then(Notice::parse);
    Ok(Html(pages::login_page(notice.map(Notice::message))?))
}

#[instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Form(form): Form<Credentials>) -> AppResult<Response> {
    let user = find_user(&state, form.username.trim()).await?;

    let verified = match &user {
        Some(user) => {
            let password = form.password;
            let stored = user.password_hash.clone();
            tokio::task::spawn_blocking(move || verify_password(&password, &stored)).await?
        }
        None => false,
    };

    let Some(user) = user.filter(|_| verified) else {
        warn!("login failed");
        return Ok(Html(pages::login_page(Some(INVALID_CREDENTIALS))?).into_response());
    };

    let token = state.sessions.create(&user);
    let server = &state.runtime.config.server;
    let cookie = session_cookie(
        &server.session_cookie,
        &token,
        state.sessions.ttl_secs(),
        server.secure_cookies,
    );
    info!(user_id = %user.id, "login");
    Ok(([(SET_COOKIE, cookie)], Redirect::to("/")).into_response())
}

pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> Response {
    state.sessions.remove(&user.token);
    let server = &state.runtime.config.server;
    info!(user_id = %user.user_id, "logout");
    (
        [(SET_COOKIE, expired_cookie(&server.session_cookie, server.secure_cookies))],
        Redirect::to("/login"),
    )
        .into_response()
}

pub async fn history(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<BTreeMap<String, Vec<HistoryEntry>>>> {
    let chat_log = state.runtime.chat_log().clone();
    let history = tokio::task::spawn_blocking(move || chat_log.history_for(&user.user_id)).await??;
    Ok(Json(history))
}

pub async fn chat(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ChatRequest>,
) -> AppResult<Response> {
    if request.message.trim().is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message must not be empty" })),
        )
            .into_response());
    }

    let reply = state
        .runtime
        .handle_turn(&user.user_id, &request.message)
        .await?;
    Ok(Json(ChatResponse {
        bot_response: reply.text,
    })
    .into_response())
}
