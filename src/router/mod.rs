//! HTTP API.

pub mod admin;
pub mod art;
pub mod create;
pub mod login;
pub mod reviews;
pub mod users;
pub mod verify;

use axum::extract::{FromRequest, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::database::UserKey;
use crate::error::{Result, ServerError};
use crate::user::User;
use crate::{AppState, moderation};

const BEARER: &str = "Bearer ";

/// JSON body checked against its `validator` rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Moderation state as exposed to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanState {
    pub banned_state: bool,
    pub banned_reason: Option<String>,
    pub ban_until: Option<DateTime<Utc>>,
    /// Outcome of the access gate at response time.
    pub restricted: bool,
}

impl From<&User> for BanState {
    fn from(user: &User) -> Self {
        Self {
            banned_state: user.ban.is_some(),
            banned_reason: user.ban.as_ref().map(|ban| ban.reason.clone()),
            ban_until: user.ban.as_ref().and_then(|ban| ban.until),
            restricted: moderation::is_restricted(user),
        }
    }
}

/// Authenticate the bearer token and load its user into request
/// extensions.
///
/// The user is read again on every request so moderation is evaluated at
/// action time.
pub async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let claims = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .and_then(|token| state.token.decode(token).ok())
        .ok_or(ServerError::Unauthorized)?;

    let user = state
        .db
        .find_user(UserKey::Serial(&claims.sub))
        .await?
        .ok_or(ServerError::Unauthorized)?;

    req.extensions_mut().insert::<User>(user);
    Ok(next.run(req).await)
}

/// Reject non-administrators. Must run after [`auth`].
pub async fn admin_only(
    Extension(user): Extension<User>,
    req: Request,
    next: Next,
) -> Result<Response> {
    if !user.is_admin {
        tracing::warn!(user_id = user.id, "administrator route refused");
        return Err(ServerError::Forbidden);
    }

    Ok(next.run(req).await)
}

/// Reject users in timeout. Must run after [`auth`].
pub async fn gate(
    Extension(user): Extension<User>,
    req: Request,
    next: Next,
) -> Result<Response> {
    moderation::ensure_unrestricted(&user)?;
    Ok(next.run(req).await)
}
