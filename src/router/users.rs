//! Own and public profiles.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;
use crate::database::UserKey;
use crate::error::{Result, ServerError};
use crate::identity::ProfileUpdate;
use crate::router::verify::Message;
use crate::router::{BanState, Valid};
use crate::user::{SerialNumber, User};

/// Profile as seen by its owner.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    id: i64,
    serial_number: SerialNumber,
    username: String,
    email: String,
    is_admin: bool,
    is_verified: bool,
    #[serde(flatten)]
    moderation: BanState,
    created_at: DateTime<Utc>,
}

impl Profile {
    /// `email` is the already revealed address.
    pub fn new(user: User, email: String) -> Self {
        Self {
            id: user.id,
            is_verified: user.is_verified(),
            moderation: BanState::from(&user),
            serial_number: user.serial_number,
            username: user.username,
            email,
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    id: i64,
    username: String,
    serial_number: SerialNumber,
    total_art: i64,
    /// Mean rating received on the user's artworks.
    avg_rating: f64,
    review_count: i64,
}

/// Current user, email decrypted.
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Json<Profile> {
    let email = state.identity().reveal_email(&user);
    Json(Profile::new(user, email))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<ProfileUpdate>,
) -> Result<Json<Message>> {
    state.identity().update_profile(user, body).await?;

    Ok(Json(Message {
        message: "Profile updated.".to_owned(),
    }))
}

/// Public profile, looked up by serial number.
pub async fn public(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> Result<Json<PublicProfile>> {
    let user = state
        .db
        .find_user(UserKey::Serial(&serial))
        .await?
        .ok_or(ServerError::NotFound)?;
    let total_art = state.db.count_art(user.serial_number.as_str()).await?;
    let stats = state.db.review_stats(user.serial_number.as_str()).await?;

    Ok(Json(PublicProfile {
        id: user.id,
        username: user.username,
        serial_number: user.serial_number,
        total_art,
        avg_rating: stats.average,
        review_count: stats.count,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;

    use crate::tests::{reload, signed_in, state};
    use crate::*;

    #[tokio::test]
    async fn test_get_me() {
        let (state, _) = state();
        let (_, token) = signed_in(&state, "bob", false).await;

        let response = make_request(
            Some(&token),
            app(state),
            Method::GET,
            "/api/v1/auth/user",
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["email"], "bob@example.com");
        assert_eq!(body["isVerified"], true);
        assert_eq!(body["restricted"], false);
        assert!(body.get("password").is_none());
    }

    #[tokio::test]
    async fn test_update_profile() {
        let (state, _) = state();
        let app = app(state.clone());
        let (user, token) = signed_in(&state, "bob", false).await;
        signed_in(&state, "alice", false).await;

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::PUT,
            "/api/v1/auth/profile",
            json!({ "username": "alice" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = make_request(
            Some(&token),
            app,
            Method::PUT,
            "/api/v1/auth/profile",
            json!({ "email": "Robert@example.com", "password": "pw456" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let user = reload(&state, &user).await;
        assert_eq!(user.username, "bob");
        assert_eq!(
            user.email.hash(),
            Some(state.crypto.hasher.digest("robert@example.com").as_str())
        );
        assert_eq!(state.identity().reveal_email(&user), "Robert@example.com");
        assert!(state.crypto.pwd.verify_password("pw456", &user.password));
    }

    #[tokio::test]
    async fn test_public_profile() {
        let (state, _) = state();
        let app = app(state.clone());
        let (user, token) = signed_in(&state, "bob", false).await;
        let (_, critic) = signed_in(&state, "alice", false).await;
        let path = format!("/api/v1/auth/user/{}", user.serial_number);

        async fn profile(app: &Router, path: &str) -> serde_json::Value {
            let response =
                make_request(None, app.clone(), Method::GET, path, String::new()).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            serde_json::from_slice(&body).unwrap()
        }

        let body = profile(&app, &path).await;
        assert_eq!(body["totalArt"], 0);
        assert_eq!(body["avgRating"], 0.0);
        assert_eq!(body["reviewCount"], 0);

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::POST,
            "/api/v1/art",
            json!({ "title": "sketch", "imageUrl": "sketch.png" }).to_string(),
        )
        .await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let art: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let reviews = format!("/api/v1/reviews/{}", art["id"]);
        for rating in [4, 5] {
            make_request(
                Some(&critic),
                app.clone(),
                Method::POST,
                &reviews,
                json!({ "content": "nice", "rating": rating }).to_string(),
            )
            .await;
        }

        let body = profile(&app, &path).await;
        assert_eq!(body["username"], "bob");
        assert_eq!(body["totalArt"], 1);
        assert_eq!(body["avgRating"], 4.5);
        assert_eq!(body["reviewCount"], 2);
        assert!(body.get("email").is_none());

        let response = make_request(
            None,
            app,
            Method::GET,
            "/api/v1/auth/user/999999999999",
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
