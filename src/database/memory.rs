//! In-process storage, for development and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{Storage, UserKey};
use crate::error::{Result, ServerError};
use crate::gallery::{Art, NewArt, NewReview, Review, ReviewStats};
use crate::user::{EmailState, NewUser, User};

#[derive(Default)]
struct Tables {
    last_user: i64,
    last_art: i64,
    last_review: i64,
    users: BTreeMap<i64, User>,
    arts: BTreeMap<i64, Art>,
    reviews: BTreeMap<i64, Review>,
}

impl Tables {
    /// Check unique columns against every user but `id`.
    fn check_unique(
        &self,
        id: Option<i64>,
        username: &str,
        email_hash: Option<&str>,
    ) -> Result<()> {
        let others = self.users.values().filter(|u| Some(u.id) != id);

        for other in others {
            if email_hash.is_some() && other.email.hash() == email_hash {
                return Err(ServerError::EmailTaken);
            }
            if other.username == username {
                return Err(ServerError::UsernameTaken);
            }
        }

        Ok(())
    }
}

/// [`Storage`] kept in memory behind a lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    #[cfg(test)]
    broken: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryStore {
    /// Make every `save_user` fail as if the database went away.
    pub fn set_broken(&self, broken: bool) {
        self.broken
            .store(broken, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;
        tables.check_unique(None, &user.username, user.email.hash())?;

        tables.last_user += 1;
        let user = user.persisted(tables.last_user, Utc::now());
        tables.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_user(&self, key: UserKey<'_>) -> Result<Option<User>> {
        let tables = self.tables.read().await;

        let user = match key {
            UserKey::Id(id) => tables.users.get(&id),
            UserKey::Username(username) => {
                tables.users.values().find(|u| u.username == username)
            },
            UserKey::Serial(serial) => tables
                .users
                .values()
                .find(|u| u.serial_number.as_str() == serial),
            UserKey::EmailHash(hash) => {
                tables.users.values().find(|u| u.email.hash() == Some(hash))
            },
            UserKey::LegacyEmail(email) => {
                let email = email.to_lowercase();
                tables.users.values().find(|u| match &u.email {
                    EmailState::Legacy { plaintext } => {
                        plaintext.to_lowercase() == email
                    },
                    EmailState::Managed { .. } => false,
                })
            },
        };

        Ok(user.cloned())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        #[cfg(test)]
        if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ServerError::Sql(sqlx::Error::PoolClosed));
        }

        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user.id) {
            return Err(ServerError::NotFound);
        }
        tables.check_unique(Some(user.id), &user.username, user.email.hash())?;

        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.users.remove(&id) else {
            return Ok(false);
        };

        let serial = user.serial_number;
        tables.arts.retain(|_, art| art.user_serial != serial);
        let arts = tables.arts.keys().copied().collect::<Vec<_>>();
        tables.reviews.retain(|_, review| {
            review.author_serial != serial && arts.contains(&review.art_id)
        });

        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn insert_art(&self, art: NewArt) -> Result<Art> {
        let mut tables = self.tables.write().await;
        tables.last_art += 1;

        let art = Art {
            id: tables.last_art,
            title: art.title,
            description: art.description,
            image_url: art.image_url,
            user_serial: art.user_serial,
            created_at: Utc::now(),
        };
        tables.arts.insert(art.id, art.clone());

        Ok(art)
    }

    async fn find_art(&self, id: i64) -> Result<Option<Art>> {
        Ok(self.tables.read().await.arts.get(&id).cloned())
    }

    async fn count_art(&self, user_serial: &str) -> Result<i64> {
        let tables = self.tables.read().await;
        let count = tables
            .arts
            .values()
            .filter(|art| art.user_serial.as_str() == user_serial)
            .count();

        Ok(count as i64)
    }

    async fn insert_review(&self, review: NewReview) -> Result<Review> {
        let mut tables = self.tables.write().await;
        if !tables.arts.contains_key(&review.art_id) {
            return Err(ServerError::NotFound);
        }
        tables.last_review += 1;

        let review = Review {
            id: tables.last_review,
            art_id: review.art_id,
            author: review.author,
            author_serial: review.author_serial,
            content: review.content,
            rating: review.rating,
            created_at: Utc::now(),
        };
        tables.reviews.insert(review.id, review.clone());

        Ok(review)
    }

    async fn list_reviews(&self, art_id: i64) -> Result<Vec<Review>> {
        let tables = self.tables.read().await;

        // Ids grow with time.
        Ok(tables
            .reviews
            .values()
            .rev()
            .filter(|review| review.art_id == art_id)
            .cloned()
            .collect())
    }

    async fn review_stats(&self, user_serial: &str) -> Result<ReviewStats> {
        let tables = self.tables.read().await;
        let ratings = tables
            .reviews
            .values()
            .filter(|review| {
                tables
                    .arts
                    .get(&review.art_id)
                    .is_some_and(|art| art.user_serial.as_str() == user_serial)
            })
            .map(|review| review.rating)
            .collect::<Vec<_>>();

        let count = ratings.len() as i64;
        let average = (count > 0)
            .then(|| ratings.iter().sum::<i32>() as f64 / count as f64);

        Ok(ReviewStats::new(average, count))
    }
}
