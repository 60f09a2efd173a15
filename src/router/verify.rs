//! Account activation.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct VerifyBody {
    #[validate(length(min = 1, message = "Missing 'username' field."))]
    username: String,
    code: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ResendBody {
    email: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_owned(),
        })
    }
}

/// Activate an account with its mailed code.
pub async fn verify(
    State(state): State<AppState>,
    Valid(body): Valid<VerifyBody>,
) -> Result<Json<Message>> {
    state.identity().verify(&body.username, &body.code).await?;

    Ok(Message::new("Account activated, you may now log in."))
}

/// Send a fresh code, the previous one stops working.
pub async fn resend(
    State(state): State<AppState>,
    Valid(body): Valid<ResendBody>,
) -> Result<Json<Message>> {
    state.identity().resend(body.email.as_deref()).await?;

    Ok(Message::new("A new verification code has been sent."))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::tests::state;
    use crate::*;

    async fn register(app: &axum::Router) {
        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/api/v1/auth/register",
            json!({
                "username": "bob",
                "email": "artist@example.com",
                "password": "pw123",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_verify_handler() {
        let (state, outbox) = state();
        let app = app(state);
        register(&app).await;
        let code = outbox.last_code("artist@example.com").unwrap();

        let verify = |code: &str| {
            make_request(
                None,
                app.clone(),
                Method::POST,
                "/api/v1/auth/verify-email",
                json!({ "username": "bob", "code": code }).to_string(),
            )
        };

        let wrong = if code == "999999" { "999998" } else { "999999" };
        assert_eq!(verify(wrong).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(verify(&code).await.status(), StatusCode::OK);
        assert_eq!(verify(&code).await.status(), StatusCode::CONFLICT);

        let response = make_request(
            None,
            app,
            Method::POST,
            "/api/v1/auth/verify-email",
            json!({ "username": "nobody", "code": code }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resend_handler() {
        let (state, outbox) = state();
        let app = app(state);
        register(&app).await;

        let resend = |body: serde_json::Value| {
            make_request(
                None,
                app.clone(),
                Method::POST,
                "/api/v1/auth/resend-code",
                body.to_string(),
            )
        };

        assert_eq!(resend(json!({})).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resend(json!({ "email": "ghost@example.com" })).await.status(),
            StatusCode::NOT_FOUND
        );

        outbox.set_offline(true);
        assert_eq!(
            resend(json!({ "email": "artist@example.com" })).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        outbox.set_offline(false);
        assert_eq!(
            resend(json!({ "email": "artist@example.com" })).await.status(),
            StatusCode::OK
        );
        assert_eq!(outbox.count(), 2);
    }
}
