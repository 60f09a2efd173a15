//! Artwork metadata. Uploading the image itself is left to the storage
//! front.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::gallery::{Art, NewArt};
use crate::router::Valid;
use crate::user::User;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Title must be 1 to 100 characters long."
    ))]
    title: String,
    #[validate(length(max = 2000))]
    description: Option<String>,
    #[validate(length(min = 1, message = "Missing 'imageUrl' field."))]
    image_url: String,
}

/// Publish an artwork. Gated.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Art>)> {
    let art = state
        .db
        .insert_art(NewArt {
            title: body.title,
            description: body.description,
            image_url: body.image_url,
            user_serial: user.serial_number,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(art)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Art>> {
    state
        .db
        .find_art(id)
        .await?
        .map(Json)
        .ok_or(ServerError::NotFound)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;

    use crate::tests::{signed_in, state};
    use crate::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let (state, _) = state();
        let app = app(state.clone());
        let (user, token) = signed_in(&state, "bob", false).await;

        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/api/v1/art",
            json!({ "title": "sketch", "imageUrl": "sketch.png" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::POST,
            "/api/v1/art",
            json!({ "title": "", "imageUrl": "sketch.png" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::POST,
            "/api/v1/art",
            json!({ "title": "sketch", "imageUrl": "sketch.png" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["userSerial"], user.serial_number.as_str());

        let path = format!("/api/v1/art/{}", body["id"]);
        let response =
            make_request(None, app.clone(), Method::GET, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response =
            make_request(None, app, Method::GET, "/api/v1/art/404", String::new())
                .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
