use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::Result;
use crate::identity::Registration;
use crate::router::Valid;
use crate::user::SerialNumber;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub message: String,
    pub serial_number: SerialNumber,
    /// `false` when the code must be requested again.
    pub delivered: bool,
}

/// Handler to register user.
///
/// A failed delivery still creates the account, answered with `503` so the
/// client offers a resend.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Registration>,
) -> Result<(StatusCode, Json<Response>)> {
    let registered = state.identity().register(body).await?;

    let (status, message) = if registered.delivered {
        (
            StatusCode::CREATED,
            "Registration successful, check your email for the verification code.",
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Account created but the verification code could not be sent, please request a new one.",
        )
    };

    Ok((
        status,
        Json(Response {
            message: message.to_owned(),
            serial_number: registered.user.serial_number,
            delivered: registered.delivered,
        }),
    ))
}
