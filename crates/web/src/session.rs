//! Per-request session state.
//!
//! A [`SessionStore`] maps a token (usually carried in a cookie) to the
//! application's session data `S`. The engine loads the session before the
//! verb is even resolved and writes it back after a successful handler.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::Error as RequestError;
use crate::log::Logger;
use crate::request::RequestContext;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("invalid session data: {reason}")]
    InvalidData { reason: String },
}

impl SessionError {
    pub fn unavailable<S: ToString>(reason: S) -> Self {
        Self::Unavailable { reason: reason.to_string() }
    }

    pub fn invalid_data<S: ToString>(reason: S) -> Self {
        Self::InvalidData { reason: reason.to_string() }
    }
}

/// Where session data lives between requests.
#[async_trait]
pub trait SessionStore<S>: Send + Sync {
    /// The token identifying the session; empty when the store keeps none.
    fn parse_token(&self, headers: &HeaderMap) -> String;

    async fn get(&self, token: &str) -> Result<Option<S>, SessionError>;

    /// Writes `data` back, `None` included.
    async fn save(&self, token: &str, data: Option<&S>) -> Result<(), SessionError>;

    async fn delete(&self, token: &str) -> Result<(), SessionError>;
}

/// The value of cookie `name` in the request's `Cookie` headers.
pub fn cookie_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// Keeps sessions in process memory; they are gone after a restart.
pub struct InMemorySessionStore<S> {
    cookie: String,
    sessions: RwLock<HashMap<String, S>>,
}

impl<S> InMemorySessionStore<S> {
    pub fn new() -> Self {
        Self::with_cookie_name("session_token")
    }

    pub fn with_cookie_name(cookie: impl Into<String>) -> Self {
        Self { cookie: cookie.into(), sessions: RwLock::new(HashMap::new()) }
    }
}

impl<S> Default for InMemorySessionStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for InMemorySessionStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionStore").field("cookie", &self.cookie).finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> SessionStore<S> for InMemorySessionStore<S>
where
    S: Clone + Send + Sync,
{
    /// The cookie's token, or a fresh random one.
    fn parse_token(&self, headers: &HeaderMap) -> String {
        match cookie_value(headers, &self.cookie) {
            Some(token) => token.to_owned(),
            None => Uuid::new_v4().simple().to_string(),
        }
    }

    async fn get(&self, token: &str) -> Result<Option<S>, SessionError> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn save(&self, token: &str, data: Option<&S>) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        match data {
            Some(data) => {
                sessions.insert(token.to_owned(), data.clone());
            }
            None => {
                sessions.remove(token);
            }
        }
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(token);
        Ok(())
    }
}

/// For servers without sessions: no token, nothing stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sessionless;

#[async_trait]
impl<S: Send + Sync> SessionStore<S> for Sessionless {
    fn parse_token(&self, _headers: &HeaderMap) -> String {
        String::new()
    }

    async fn get(&self, _token: &str) -> Result<Option<S>, SessionError> {
        Ok(None)
    }

    async fn save(&self, _token: &str, _data: Option<&S>) -> Result<(), SessionError> {
        Ok(())
    }

    async fn delete(&self, _token: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

/// The session attached to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session<S> {
    token: String,
    data: Option<S>,
    ended: bool,
}

impl<S> Session<S> {
    pub(crate) fn new(token: String, data: Option<S>) -> Self {
        Self { token, data, ended: false }
    }

    pub(crate) fn empty() -> Self {
        Self::new(String::new(), None)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn data(&self) -> Option<&S> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Option<&mut S> {
        self.data.as_mut()
    }

    pub fn set(&mut self, data: S) {
        self.data = Some(data);
    }

    pub fn take(&mut self) -> Option<S> {
        self.data.take()
    }

    /// Deletes the session from the store once the request succeeds.
    pub fn end(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

/// Attaches the stored session to `ctx`. A store failure is logged and the
/// request goes on without data.
pub(crate) async fn load_session<S>(store: &dyn SessionStore<S>, logger: &dyn Logger, ctx: &mut RequestContext<S>) {
    let token = store.parse_token(ctx.headers());
    let data = match store.get(&token).await {
        Ok(data) => data,
        Err(e) => {
            logger.log_error(&ctx.log_context(), &RequestError::internal(e));
            None
        }
    };
    *ctx.session_mut() = Session::new(token, data);
}

/// Writes the session back and sets (or expires) the cookie. The data is
/// always written; the cookie only when there is a token to carry.
pub(crate) async fn save_session<S>(
    store: &dyn SessionStore<S>,
    logger: &dyn Logger,
    config: &ServerConfig,
    ctx: &mut RequestContext<S>,
) {
    let session = ctx.session();
    let token = session.token().to_owned();
    let (result, cookie) = if session.is_ended() {
        (store.delete(&token).await, format!("{}=; Max-Age=0; Path=/; HttpOnly", config.session_cookie))
    } else {
        let cookie =
            format!("{}={token}; Max-Age={}; Path=/; HttpOnly", config.session_cookie, config.session_max_age_secs);
        (store.save(&token, session.data()).await, cookie)
    };

    if let Err(e) = result {
        logger.log_error(&ctx.log_context(), &RequestError::internal(e));
    }

    if token.is_empty() {
        return;
    }
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            ctx.response_headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => logger.log_error(&ctx.log_context(), &RequestError::internal(e)),
    }
}
