//! Error handler for astra.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("this email is already bound to an account")]
    EmailTaken,

    #[error("this username is already taken")]
    UsernameTaken,

    #[error("resource not found")]
    NotFound,

    #[error("account already verified")]
    AlreadyVerified,

    #[error("invalid verification code")]
    InvalidCode,

    #[error("verification code could not be delivered")]
    DeliveryFailed,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account not verified, check your email")]
    NotVerified,

    #[error("administrator passcode required")]
    PasscodeRequired,

    #[error("this email is now bound to another account, contact an administrator")]
    MigrationConflict,

    #[error("account is in timeout")]
    Restricted {
        reason: String,
        until: Option<DateTime<Utc>>,
    },

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("administrators only")]
    Forbidden,
}

impl ServerError {
    /// Failures on our side, answered with a 500.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ServerError::Sql(_) | ServerError::Crypto(_) | ServerError::Token(_)
        )
    }
}

/// Log internal failures where they happen, inside the span of the
/// operation, so the event carries the user it concerns.
pub trait Traced<T> {
    fn traced(self) -> Result<T>;
}

impl<T, E: Into<ServerError>> Traced<T> for std::result::Result<T, E> {
    fn traced(self) -> Result<T> {
        self.map_err(|err| {
            let err = err.into();
            if err.is_internal() {
                tracing::error!(error = %err, "operation failed");
            }
            err
        })
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Update `type` field, a machine readable discriminant.
    pub fn kind(mut self, kind: &str) -> Self {
        self.r#type = Some(kind.into());
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect::<Vec<_>>();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response
                .kind("validation")
                .errors(validation_errors),

            ServerError::EmailTaken => response
                .title("Conflict.")
                .kind("email_taken")
                .status(StatusCode::CONFLICT),

            ServerError::UsernameTaken => response
                .title("Conflict.")
                .kind("username_taken")
                .status(StatusCode::CONFLICT),

            ServerError::AlreadyVerified => response
                .title("Conflict.")
                .kind("already_verified")
                .status(StatusCode::CONFLICT),

            ServerError::NotFound => response
                .title("Not found.")
                .kind("not_found")
                .status(StatusCode::NOT_FOUND),

            ServerError::InvalidCode => response.kind("invalid_code"),

            ServerError::DeliveryFailed => response
                .title("Delivery failed, please request a new code.")
                .kind("delivery_failed")
                .status(StatusCode::SERVICE_UNAVAILABLE),

            ServerError::InvalidCredentials => response
                .title("Invalid credentials.")
                .kind("invalid_credentials")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::NotVerified => response
                .title("Account not verified.")
                .kind("needs_verification")
                .status(StatusCode::FORBIDDEN),

            ServerError::PasscodeRequired => response
                .title("Administrator passcode required.")
                .kind("passcode_required")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::MigrationConflict => response
                .title("Account cannot be migrated.")
                .kind("migration_conflict")
                .status(StatusCode::FORBIDDEN),

            ServerError::Restricted { reason, until } => {
                let until = until
                    .map(|u| u.to_rfc3339())
                    .unwrap_or_else(|| "indefinite".to_owned());
                response
                    .title("Access denied: you are in timeout.")
                    .kind("restricted")
                    .details(&format!("until {until}, reason: {reason}"))
                    .status(StatusCode::FORBIDDEN)
            },

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Forbidden => response
                .title("Access denied.")
                .status(StatusCode::FORBIDDEN),

            ServerError::Sql(_)
            | ServerError::Crypto(_)
            | ServerError::Token(_) => {
                tracing::error!(error = %self, "server returned 500 status");

                ResponseError::default()
            },

            ServerError::Axum(_) => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::ValidationError;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServerError::EmailTaken, StatusCode::CONFLICT),
            (ServerError::UsernameTaken, StatusCode::CONFLICT),
            (ServerError::NotFound, StatusCode::NOT_FOUND),
            (ServerError::InvalidCode, StatusCode::BAD_REQUEST),
            (ServerError::DeliveryFailed, StatusCode::SERVICE_UNAVAILABLE),
            (ServerError::NotVerified, StatusCode::FORBIDDEN),
            (ServerError::MigrationConflict, StatusCode::FORBIDDEN),
            (ServerError::Crypto(CryptoError::Aead), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ServerError::Restricted {
                    reason: "spam".into(),
                    until: None,
                },
                StatusCode::FORBIDDEN,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_validation_fields() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "username",
            ValidationError::new("required")
                .with_message("Missing 'username' field.".into()),
        );
        errors.add("email", ValidationError::new("required"));

        let fields = parse_validation_errors(&errors);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].field, "email");
        assert_eq!(fields[0].message, "required");
        assert_eq!(fields[1].message, "Missing 'username' field.");
    }
}
