use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::{BanState, Valid};
use crate::user::SerialNumber;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(min = 1, message = "Missing 'username' field."))]
    username: String,
    #[validate(length(min = 1, message = "Missing 'password' field."))]
    password: String,
    /// Administrator step-up passcode.
    master_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    serial_number: SerialNumber,
    username: String,
    is_admin: bool,
    #[serde(flatten)]
    moderation: BanState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    token_type: &'static str,
    token: String,
    expires_in: u64,
    user: SessionUser,
}

/// Handler to open a session.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let user = state
        .identity()
        .authenticate(&body.username, &body.password, body.master_key.as_deref())
        .await?;

    let token = state.token.create(user.serial_number.as_str())?;

    Ok(Json(Response {
        token_type: TOKEN_TYPE,
        token,
        expires_in: state.token.expires_in(),
        user: SessionUser {
            moderation: BanState::from(&user),
            serial_number: user.serial_number,
            username: user.username,
            is_admin: user.is_admin,
        },
    }))
}
