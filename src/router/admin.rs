//! Administration: user listing, deletion and moderation.

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::database::UserKey;
use crate::error::{Result, ServerError};
use crate::router::users::Profile;
use crate::router::verify::Message;
use crate::router::{BanState, Valid};
use crate::user::{SerialNumber, User};

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct BanBody {
    #[validate(length(max = 500, message = "Reason is too long."))]
    reason: Option<String>,
    /// End of the timeout, indefinite when absent.
    until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decree {
    serial_number: SerialNumber,
    #[serde(flatten)]
    moderation: BanState,
}

impl From<User> for Decree {
    fn from(user: User) -> Self {
        Self {
            moderation: BanState::from(&user),
            serial_number: user.serial_number,
        }
    }
}

/// Every user, emails revealed.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Profile>>> {
    let identity = state.identity();
    let users = state
        .db
        .list_users()
        .await?
        .into_iter()
        .map(|user| {
            let email = identity.reveal_email(&user);
            Profile::new(user, email)
        })
        .collect();

    Ok(Json(users))
}

/// Delete a user with its art and reviews.
pub async fn delete(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> Result<Json<Message>> {
    let user = state
        .db
        .find_user(UserKey::Serial(&serial))
        .await?
        .ok_or(ServerError::NotFound)?;

    if !state.db.delete_user(user.id).await? {
        return Err(ServerError::NotFound);
    }
    tracing::info!(user_id = user.id, "user deleted by administrator");

    Ok(Json(Message {
        message: "User and their creations have been deleted.".to_owned(),
    }))
}

pub async fn ban(
    State(state): State<AppState>,
    Path(serial): Path<String>,
    Valid(body): Valid<BanBody>,
) -> Result<Json<Decree>> {
    let user = state
        .moderator()
        .ban(UserKey::Serial(&serial), body.reason, body.until)
        .await?;

    Ok(Json(user.into()))
}

pub async fn unban(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> Result<Json<Decree>> {
    let user = state.moderator().unban(UserKey::Serial(&serial)).await?;

    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::Duration;
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::moderation::is_restricted;
    use crate::tests::{reload, signed_in, state};
    use crate::*;

    #[tokio::test]
    async fn test_admin_only() {
        let (state, _) = state();
        let (_, token) = signed_in(&state, "bob", false).await;

        let response = make_request(
            Some(&token),
            app(state),
            Method::GET,
            "/api/v1/admin/users",
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ban_and_unban() {
        let (state, _) = state();
        let app = app(state.clone());
        let (_, admin) = signed_in(&state, "root", true).await;
        let (user, _) = signed_in(&state, "bob", false).await;

        let until = Utc::now() + Duration::days(1);
        let path = format!("/api/v1/admin/users/ban/{}", user.serial_number);
        let response = make_request(
            Some(&admin),
            app.clone(),
            Method::POST,
            &path,
            json!({ "reason": "spam", "until": until }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["bannedState"], true);
        assert_eq!(body["bannedReason"], "spam");
        assert_eq!(body["restricted"], true);
        assert!(is_restricted(&reload(&state, &user).await));

        let path = format!("/api/v1/admin/users/unban/{}", user.serial_number);
        let response =
            make_request(Some(&admin), app.clone(), Method::POST, &path, String::new())
                .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(reload(&state, &user).await.ban.is_none());

        let response = make_request(
            Some(&admin),
            app,
            Method::POST,
            "/api/v1/admin/users/ban/999999999999",
            "{}".into(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (state, _) = state();
        let app = app(state.clone());
        let (_, admin) = signed_in(&state, "root", true).await;
        let (user, token) = signed_in(&state, "bob", false).await;

        make_request(
            Some(&token),
            app.clone(),
            Method::POST,
            "/api/v1/art",
            json!({ "title": "sketch", "imageUrl": "sketch.png" }).to_string(),
        )
        .await;

        let response = make_request(
            Some(&admin),
            app.clone(),
            Method::GET,
            "/api/v1/admin/users",
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body[1]["email"], "bob@example.com");

        let path = format!("/api/v1/admin/users/{}", user.serial_number);
        let response =
            make_request(Some(&admin), app.clone(), Method::DELETE, &path, String::new())
                .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.db.count_art(user.serial_number.as_str()).await.unwrap(), 0);

        let response =
            make_request(Some(&admin), app, Method::DELETE, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
