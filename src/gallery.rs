//! Artwork and review records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::user::SerialNumber;

/// Rating given when a reviewer leaves none.
pub const DEFAULT_RATING: i32 = 5;

/// Uploaded drawing metadata.
#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Art {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub image_url: String,
    #[sqlx(try_from = "String")]
    pub user_serial: SerialNumber,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewArt {
    pub title: String,
    pub description: Option<String>,
    pub image_url: String,
    pub user_serial: SerialNumber,
}

/// Star rating left on an artwork.
#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i64,
    pub art_id: i64,
    pub author: String,
    #[sqlx(try_from = "String")]
    pub author_serial: SerialNumber,
    pub content: String,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewReview {
    pub art_id: i64,
    pub author: String,
    pub author_serial: SerialNumber,
    pub content: String,
    pub rating: i32,
}

/// Aggregate of the reviews left on a user's artworks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReviewStats {
    /// Mean rating rounded to one decimal, `0` without reviews.
    pub average: f64,
    pub count: i64,
}

impl ReviewStats {
    pub fn new(average: Option<f64>, count: i64) -> Self {
        let average = average.unwrap_or_default();
        Self {
            average: (average * 10.0).round() / 10.0,
            count,
        }
    }
}
