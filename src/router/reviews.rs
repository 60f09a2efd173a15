//! Star ratings on artworks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::gallery::{DEFAULT_RATING, NewReview, Review};
use crate::router::Valid;
use crate::user::User;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 2000,
        message = "Review must be 1 to 2000 characters long."
    ))]
    content: String,
    #[validate(range(min = 1, max = 5, message = "Rating goes from 1 to 5."))]
    rating: Option<i32>,
}

/// Review an artwork. Gated.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(art_id): Path<i64>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Review>)> {
    if state.db.find_art(art_id).await?.is_none() {
        return Err(ServerError::NotFound);
    }

    let review = state
        .db
        .insert_review(NewReview {
            art_id,
            author: user.username,
            author_serial: user.serial_number,
            content: body.content,
            rating: body.rating.unwrap_or(DEFAULT_RATING),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(review)))
}

/// Reviews of an artwork, newest first.
pub async fn list(
    State(state): State<AppState>,
    Path(art_id): Path<i64>,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(state.db.list_reviews(art_id).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;

    use crate::moderation::apply_ban;
    use crate::tests::{signed_in, state};
    use crate::*;

    #[tokio::test]
    async fn test_review_flow() {
        let (state, _) = state();
        let app = app(state.clone());
        let (_, artist) = signed_in(&state, "bob", false).await;
        let (critic, token) = signed_in(&state, "alice", false).await;

        let response = make_request(
            Some(&artist),
            app.clone(),
            Method::POST,
            "/api/v1/art",
            json!({ "title": "sketch", "imageUrl": "sketch.png" }).to_string(),
        )
        .await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let art: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let path = format!("/api/v1/reviews/{}", art["id"]);

        let review = |body: serde_json::Value| {
            make_request(
                Some(&token),
                app.clone(),
                Method::POST,
                &path,
                body.to_string(),
            )
        };

        assert_eq!(
            review(json!({ "content": "nice", "rating": 9 })).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            review(json!({ "content": "nice" })).await.status(),
            StatusCode::CREATED
        );

        // Timed out users cannot review.
        let banned = apply_ban(critic, None, None);
        state.db.save_user(&banned).await.unwrap();
        assert_eq!(
            review(json!({ "content": "again", "rating": 1 })).await.status(),
            StatusCode::FORBIDDEN
        );

        let response =
            make_request(None, app.clone(), Method::GET, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let reviews: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(reviews.as_array().unwrap().len(), 1);
        assert_eq!(reviews[0]["rating"], 5);
        assert_eq!(reviews[0]["author"], "alice");

        let response = make_request(
            Some(&artist),
            app,
            Method::POST,
            "/api/v1/reviews/404",
            json!({ "content": "nice" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
