//! Storage port and its implementations.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::gallery::{Art, NewArt, NewReview, Review, ReviewStats};
use crate::user::{NewUser, User};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "astra";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Unique keys a [`User`] can be found by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserKey<'a> {
    Id(i64),
    Username(&'a str),
    Serial(&'a str),
    EmailHash(&'a str),
    /// Plaintext address of a row predating email encryption, ignoring case.
    LegacyEmail(&'a str),
}

/// Persistence collaborator.
///
/// Writes are last-write-wins. Uniqueness of usernames and email hashes is
/// enforced here and reported as `UsernameTaken` / `EmailTaken`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a user, assigning its id and serial number.
    async fn insert_user(&self, user: NewUser) -> Result<User>;

    async fn find_user(&self, key: UserKey<'_>) -> Result<Option<User>>;

    /// Overwrite every mutable column of an existing user.
    async fn save_user(&self, user: &User) -> Result<()>;

    /// Delete a user with its art and reviews. `false` if absent.
    async fn delete_user(&self, id: i64) -> Result<bool>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn insert_art(&self, art: NewArt) -> Result<Art>;

    async fn find_art(&self, id: i64) -> Result<Option<Art>>;

    /// Number of artworks uploaded by a user.
    async fn count_art(&self, user_serial: &str) -> Result<i64>;

    async fn insert_review(&self, review: NewReview) -> Result<Review>;

    /// Reviews of an artwork, newest first.
    async fn list_reviews(&self, art_id: i64) -> Result<Vec<Review>>;

    /// Rating aggregate over every review of a user's artworks.
    async fn review_stats(&self, user_serial: &str) -> Result<ReviewStats>;
}
