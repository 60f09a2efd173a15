//! PostgreSQL storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use super::{Storage, UserKey};
use crate::error::{Result, ServerError};
use crate::gallery::{Art, NewArt, NewReview, Review, ReviewStats};
use crate::user::{
    Ban, DEFAULT_BAN_REASON, EmailState, NewUser, SerialNumber, User,
    Verification,
};

/// Rows inserted before serial numbers existed get theirs on first save.
const SAVE_USER_QUERY: &str = r#"UPDATE users
    SET username = $1, email = $2, email_hash = $3, email_iv = $4, password = $5,
        is_admin = $6, is_verified = $7, verification_code = $8,
        banned_state = $9, banned_reason = $10, ban_until = $11,
        serial_number = COALESCE(serial_number, $13)
    WHERE id = $12"#;

const USER_COLUMNS: &str = "id, serial_number, username, email, email_hash, email_iv, password, is_admin, is_verified, verification_code, banned_state, banned_reason, ban_until, created_at";

/// [`Storage`] backed by a postgres pool.
#[derive(Clone)]
pub struct PostgresStore {
    pub pool: PgPool,
}

impl PostgresStore {
    /// Init database connection and run pending migrations.
    pub async fn new(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> std::result::Result<Self, sqlx::Error> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new().max_connections(pool);
        let pool = pool.connect(&addr).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self { pool })
    }
}

/// Flat row of the `users` table.
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    serial_number: Option<String>,
    username: String,
    email: String,
    email_hash: Option<String>,
    email_iv: Option<String>,
    password: String,
    is_admin: bool,
    is_verified: bool,
    verification_code: Option<String>,
    banned_state: bool,
    banned_reason: Option<String>,
    ban_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let email = match (row.email_hash, row.email_iv) {
            (Some(hash), Some(iv)) => EmailState::Managed {
                ciphertext: row.email,
                iv,
                hash,
            },
            _ => EmailState::Legacy {
                plaintext: row.email,
            },
        };

        let verification = if row.is_verified {
            Verification::Verified
        } else {
            Verification::Pending {
                code: row.verification_code,
            }
        };

        let ban = row.banned_state.then(|| Ban {
            reason: row
                .banned_reason
                .unwrap_or_else(|| DEFAULT_BAN_REASON.to_owned()),
            until: row.ban_until,
        });

        User {
            id: row.id,
            serial_number: row
                .serial_number
                .map(SerialNumber::from)
                .unwrap_or_else(|| SerialNumber::from_id(row.id)),
            username: row.username,
            email,
            password: row.password,
            is_admin: row.is_admin,
            verification,
            ban,
            created_at: row.created_at,
        }
    }
}

/// Split an [`EmailState`] into its `(email, email_hash, email_iv)` columns.
fn email_columns(email: &EmailState) -> (&str, Option<&str>, Option<&str>) {
    match email {
        EmailState::Managed {
            ciphertext,
            iv,
            hash,
        } => (ciphertext, Some(hash), Some(iv)),
        EmailState::Legacy { plaintext } => (plaintext, None, None),
    }
}

/// Split a [`Verification`] into its `(is_verified, verification_code)` columns.
fn verification_columns(verification: &Verification) -> (bool, Option<&str>) {
    match verification {
        Verification::Verified => (true, None),
        Verification::Pending { code } => (false, code.as_deref()),
    }
}

/// Map unique violations of `users` onto domain errors.
fn map_unique(err: sqlx::Error) -> ServerError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            match db.constraint() {
                Some("users_username_key") => return ServerError::UsernameTaken,
                Some("users_email_hash_key") => return ServerError::EmailTaken,
                _ => {},
            }
        }
    }

    ServerError::Sql(err)
}

#[async_trait]
impl Storage for PostgresStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let (email, hash, iv) = email_columns(&user.email);
        let (is_verified, code) = verification_columns(&user.verification);

        let mut tx = self.pool.begin().await?;

        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"INSERT INTO users (username, email, email_hash, email_iv, password, is_admin, is_verified, verification_code)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id, created_at"#,
        )
        .bind(&user.username)
        .bind(email)
        .bind(hash)
        .bind(iv)
        .bind(&user.password)
        .bind(user.is_admin)
        .bind(is_verified)
        .bind(code)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique)?;

        let serial = SerialNumber::from_id(id);
        sqlx::query(r#"UPDATE users SET serial_number = $1 WHERE id = $2"#)
            .bind(serial.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(user.persisted(id, created_at))
    }

    async fn find_user(&self, key: UserKey<'_>) -> Result<Option<User>> {
        let (condition, value) = match key {
            UserKey::Id(id) => {
                let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
                let row = sqlx::query_as::<_, UserRow>(&query)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                return Ok(row.map(User::from));
            },
            UserKey::Username(username) => ("username = $1", username),
            UserKey::Serial(serial) => ("serial_number = $1", serial),
            UserKey::EmailHash(hash) => ("email_hash = $1", hash),
            UserKey::LegacyEmail(email) => {
                ("email_hash IS NULL AND LOWER(email) = LOWER($1)", email)
            },
        };

        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {condition} LIMIT 1");
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let (email, hash, iv) = email_columns(&user.email);
        let (is_verified, code) = verification_columns(&user.verification);
        let (reason, until) = match &user.ban {
            Some(ban) => (Some(ban.reason.as_str()), ban.until),
            None => (None, None),
        };

        let result = sqlx::query(SAVE_USER_QUERY)
        .bind(&user.username)
        .bind(email)
        .bind(hash)
        .bind(iv)
        .bind(&user.password)
        .bind(user.is_admin)
        .bind(is_verified)
        .bind(code)
        .bind(user.ban.is_some())
        .bind(reason)
        .bind(until)
        .bind(user.id)
        .bind(user.serial_number.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound);
        }

        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        // Art and reviews follow through `ON DELETE CASCADE`.
        let result = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let rows = sqlx::query_as::<_, UserRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn insert_art(&self, art: NewArt) -> Result<Art> {
        let art = sqlx::query_as::<_, Art>(
            r#"INSERT INTO arts (title, description, image_url, user_serial)
                VALUES ($1, $2, $3, $4)
                RETURNING id, title, description, image_url, user_serial, created_at"#,
        )
        .bind(art.title)
        .bind(art.description)
        .bind(art.image_url)
        .bind(art.user_serial.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(art)
    }

    async fn find_art(&self, id: i64) -> Result<Option<Art>> {
        let art = sqlx::query_as::<_, Art>(
            r#"SELECT id, title, description, image_url, user_serial, created_at
                FROM arts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(art)
    }

    async fn count_art(&self, user_serial: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM arts WHERE user_serial = $1"#)
                .bind(user_serial)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn insert_review(&self, review: NewReview) -> Result<Review> {
        let review = sqlx::query_as::<_, Review>(
            r#"INSERT INTO reviews (art_id, author, author_serial, content, rating)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, art_id, author, author_serial, content, rating, created_at"#,
        )
        .bind(review.art_id)
        .bind(review.author)
        .bind(review.author_serial.as_str())
        .bind(review.content)
        .bind(review.rating)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                ServerError::NotFound
            },
            _ => ServerError::Sql(err),
        })?;

        Ok(review)
    }

    async fn list_reviews(&self, art_id: i64) -> Result<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(
            r#"SELECT id, art_id, author, author_serial, content, rating, created_at
                FROM reviews WHERE art_id = $1 ORDER BY created_at DESC, id DESC"#,
        )
        .bind(art_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reviews)
    }

    async fn review_stats(&self, user_serial: &str) -> Result<ReviewStats> {
        let (average, count): (Option<f64>, i64) = sqlx::query_as(
            r#"SELECT AVG(reviews.rating)::FLOAT8, COUNT(reviews.id)
                FROM reviews JOIN arts ON arts.id = reviews.art_id
                WHERE arts.user_serial = $1"#,
        )
        .bind(user_serial)
        .fetch_one(&self.pool)
        .await?;

        Ok(ReviewStats::new(average, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> UserRow {
        UserRow {
            id: 7,
            serial_number: None,
            username: "bob".into(),
            email: "bob@x.com".into(),
            email_hash: None,
            email_iv: None,
            password: "hash".into(),
            is_admin: false,
            is_verified: false,
            verification_code: None,
            banned_state: false,
            banned_reason: None,
            ban_until: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_legacy_row() {
        let user = User::from(row());
        assert_eq!(user.serial_number.as_str(), "000000000007");
        assert_eq!(
            user.email,
            EmailState::Legacy {
                plaintext: "bob@x.com".into()
            }
        );
        assert_eq!(user.verification, Verification::Pending { code: None });
        assert!(user.needs_migration());
        assert!(user.ban.is_none());
    }

    #[test]
    fn test_managed_banned_row() {
        let user = User::from(UserRow {
            serial_number: Some("000000000007".into()),
            email: "cafe".into(),
            email_hash: Some("beef".into()),
            email_iv: Some("00".into()),
            is_verified: true,
            verification_code: Some("123456".into()),
            banned_state: true,
            ..row()
        });

        assert_eq!(user.email.hash(), Some("beef"));
        assert!(user.is_verified());
        assert_eq!(user.verification_code(), None);
        assert_eq!(
            user.ban,
            Some(Ban {
                reason: DEFAULT_BAN_REASON.into(),
                until: None,
            })
        );

        let (email, hash, iv) = email_columns(&user.email);
        assert_eq!((email, hash, iv), ("cafe", Some("beef"), Some("00")));
        assert_eq!(verification_columns(&user.verification), (true, None));
    }

    #[test]
    fn test_save_backfills_serial() {
        // Derived on read, then persisted by the next save.
        let user = User::from(row());
        assert_eq!(user.serial_number, SerialNumber::from_id(7));
        assert!(SAVE_USER_QUERY.contains("serial_number = COALESCE(serial_number, $13)"));
    }
}
