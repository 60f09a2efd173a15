//! Identity & verification manager.
//!
//! Owns the transformation between a plaintext email and its stored
//! derivatives, and the lifecycle of the six-digit code gating account
//! activation.

use std::sync::Arc;

use serde::Deserialize;
use validator::{Validate, ValidateEmail, ValidationError, ValidationErrors};

use crate::crypto::{Crypto, verification_code};
use crate::database::{Storage, UserKey};
use crate::error::{Result, ServerError, Traced};
use crate::mail::Mailer;
use crate::user::{EmailState, NewUser, User, Verification};

/// Shown in place of an email that cannot be decrypted.
pub const EMAIL_PLACEHOLDER: &str = "[unavailable]";

/// Registration form. Every field is required.
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct Registration {
    /// Checked once trimmed, see [`check_username`].
    pub username: Option<String>,
    pub email: Option<String>,
    #[validate(length(max = 255))]
    pub password: Option<String>,
}

/// Outcome of a successful registration.
#[derive(Debug)]
pub struct Registered {
    pub user: User,
    /// Whether the verification code left through the mail collaborator.
    pub delivered: bool,
}

/// Profile edition, absent fields are left untouched.
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub password: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn check_username(username: &str, errors: &mut ValidationErrors) {
    if !(2..=32).contains(&username.chars().count()) {
        errors.add(
            "username",
            ValidationError::new("length")
                .with_message("Username must be 2 to 32 characters long.".into()),
        );
    }
}

fn check_email(email: &str, errors: &mut ValidationErrors) {
    if !email.validate_email() {
        errors.add(
            "email",
            ValidationError::new("email")
                .with_message("Invalid 'email' field.".into()),
        );
    }
}

/// Identity & verification manager.
#[derive(Clone)]
pub struct IdentityManager {
    store: Arc<dyn Storage>,
    crypto: Arc<Crypto>,
    mail: Arc<dyn Mailer>,
}

impl IdentityManager {
    /// Create a new [`IdentityManager`].
    pub fn new(
        store: Arc<dyn Storage>,
        crypto: Arc<Crypto>,
        mail: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            crypto,
            mail,
        }
    }

    /// Send a code, recording the outcome.
    async fn send_code(&self, email: &str, code: &str) -> bool {
        let delivered = self.mail.deliver(email, code).await;
        let outcome = if delivered { "sent" } else { "failed" };
        metrics::counter!("verification_codes_total", "outcome" => outcome)
            .increment(1);

        delivered
    }

    /// Account bound to `email`, either through its lookup hash or, for rows
    /// predating encryption, through the plaintext address.
    async fn email_owner(&self, email: &str) -> Result<Option<User>> {
        let hash = self.crypto.hasher.digest(email);
        if let Some(user) = self
            .store
            .find_user(UserKey::EmailHash(&hash))
            .await
            .traced()?
        {
            return Ok(Some(user));
        }

        self.store
            .find_user(UserKey::LegacyEmail(email))
            .await
            .traced()
    }

    /// Create an unverified account and mail it a verification code.
    ///
    /// A failed delivery does not undo the registration.
    #[tracing::instrument(skip_all, fields(username = ?form.username))]
    pub async fn register(&self, form: Registration) -> Result<Registered> {
        let username = non_blank(form.username.as_deref());
        let email = non_blank(form.email.as_deref());
        let password = form.password.as_deref().filter(|p| !p.is_empty());

        let mut errors = ValidationErrors::new();
        for (field, value) in [
            ("username", username),
            ("email", email),
            ("password", password),
        ] {
            if value.is_none() {
                errors.add(
                    field,
                    ValidationError::new("required")
                        .with_message(format!("Missing '{field}' field.").into()),
                );
            }
        }
        if let Some(username) = username {
            check_username(username, &mut errors);
        }
        if let Some(email) = email {
            check_email(email, &mut errors);
        }

        let (Some(username), Some(email), Some(password)) =
            (username, email, password)
        else {
            return Err(errors.into());
        };
        if !errors.is_empty() {
            return Err(errors.into());
        }

        if self.email_owner(email).await?.is_some() {
            return Err(ServerError::EmailTaken);
        }
        let taken = self
            .store
            .find_user(UserKey::Username(username))
            .await
            .traced()?
            .is_some();
        if taken {
            return Err(ServerError::UsernameTaken);
        }

        let code = verification_code();
        let user = self
            .store
            .insert_user(NewUser {
                username: username.to_owned(),
                email: EmailState::seal(email, &self.crypto).traced()?,
                password: self.crypto.pwd.hash_password(password).traced()?,
                is_admin: false,
                verification: Verification::Pending {
                    code: Some(code.clone()),
                },
            })
            .await
            .traced()?;

        let delivered = self.send_code(email, &code).await;
        if delivered {
            tracing::info!(user_id = user.id, "user registered");
        } else {
            tracing::warn!(
                user_id = user.id,
                "user registered but verification code was not delivered"
            );
        }

        Ok(Registered { user, delivered })
    }

    /// Activate the account of `username` with the code it was mailed.
    #[tracing::instrument(skip(self, code))]
    pub async fn verify(&self, username: &str, code: &str) -> Result<User> {
        let mut user = self
            .store
            .find_user(UserKey::Username(username))
            .await
            .traced()?
            .ok_or(ServerError::NotFound)?;

        match user.verification_code() {
            _ if user.is_verified() => return Err(ServerError::AlreadyVerified),
            Some(expected) if expected == code => {},
            _ => return Err(ServerError::InvalidCode),
        }

        user.verification = Verification::Verified;
        self.store.save_user(&user).await.traced()?;

        tracing::info!(user_id = user.id, "account verified");

        Ok(user)
    }

    /// Issue a new code for the pending account bound to `email`,
    /// invalidating the previous one.
    #[tracing::instrument(skip_all, fields(user_id = tracing::field::Empty))]
    pub async fn resend(&self, email: Option<&str>) -> Result<()> {
        let Some(email) = non_blank(email) else {
            let mut errors = ValidationErrors::new();
            errors.add(
                "email",
                ValidationError::new("required")
                    .with_message("Missing 'email' field.".into()),
            );
            return Err(errors.into());
        };

        let hash = self.crypto.hasher.digest(email);
        let mut user = self
            .store
            .find_user(UserKey::EmailHash(&hash))
            .await
            .traced()?
            .ok_or(ServerError::NotFound)?;
        tracing::Span::current().record("user_id", user.id);
        if user.is_verified() {
            return Err(ServerError::AlreadyVerified);
        }

        let code = verification_code();
        user.verification = Verification::Pending {
            code: Some(code.clone()),
        };
        self.store.save_user(&user).await.traced()?;

        if !self.send_code(email, &code).await {
            tracing::warn!(user_id = user.id, "verification code was not resent");
            return Err(ServerError::DeliveryFailed);
        }

        Ok(())
    }

    /// Check credentials, migrating legacy rows on success.
    ///
    /// Unknown users and wrong passwords are indistinguishable.
    /// Administrators must also present the step-up passcode.
    #[tracing::instrument(
        skip(self, password, passcode),
        fields(user_id = tracing::field::Empty)
    )]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        passcode: Option<&str>,
    ) -> Result<User> {
        let user = self
            .store
            .find_user(UserKey::Username(username))
            .await
            .traced()?
            .ok_or(ServerError::InvalidCredentials)?;
        tracing::Span::current().record("user_id", user.id);

        if !self.crypto.pwd.verify_password(password, &user.password) {
            return Err(ServerError::InvalidCredentials);
        }

        let user = if user.needs_migration() {
            let user = user.migrate(&self.crypto).traced()?;
            match self.store.save_user(&user).await.traced() {
                Ok(()) => {},
                Err(ServerError::EmailTaken) => {
                    tracing::warn!(
                        user_id = user.id,
                        "legacy email is bound to another account, migration skipped"
                    );
                    return Err(ServerError::MigrationConflict);
                },
                Err(err) => return Err(err),
            }

            metrics::counter!("legacy_migrations_total").increment(1);
            tracing::info!(user_id = user.id, "legacy user migrated");

            user
        } else {
            user
        };

        if !user.is_verified() && !user.is_admin {
            return Err(ServerError::NotVerified);
        }

        if user.is_admin && !self.crypto.check_passcode(passcode) {
            tracing::warn!(user_id = user.id, "administrator passcode rejected");
            return Err(ServerError::PasscodeRequired);
        }

        Ok(user)
    }

    /// Apply a profile edition, re-deriving the email columns and password
    /// hash when they change.
    #[tracing::instrument(skip_all, fields(user_id = user.id))]
    pub async fn update_profile(
        &self,
        mut user: User,
        update: ProfileUpdate,
    ) -> Result<User> {
        if let Some(username) = non_blank(update.username.as_deref()) {
            if username != user.username {
                let mut errors = ValidationErrors::new();
                check_username(username, &mut errors);
                if !errors.is_empty() {
                    return Err(errors.into());
                }

                let taken = self
                    .store
                    .find_user(UserKey::Username(username))
                    .await
                    .traced()?
                    .is_some_and(|other| other.id != user.id);
                if taken {
                    return Err(ServerError::UsernameTaken);
                }
                user.username = username.to_owned();
            }
        }

        if let Some(email) = non_blank(update.email.as_deref()) {
            let mut errors = ValidationErrors::new();
            check_email(email, &mut errors);
            if !errors.is_empty() {
                return Err(errors.into());
            }

            let taken = self
                .email_owner(email)
                .await?
                .is_some_and(|other| other.id != user.id);
            if taken {
                return Err(ServerError::EmailTaken);
            }
            user.email = EmailState::seal(email, &self.crypto).traced()?;
        }

        if let Some(password) = update.password.as_deref().filter(|p| !p.is_empty()) {
            user.password = self.crypto.pwd.hash_password(password).traced()?;
        }

        self.store.save_user(&user).await.traced()?;

        Ok(user)
    }

    /// Plaintext email for display, or [`EMAIL_PLACEHOLDER`] when it cannot
    /// be decrypted.
    pub fn reveal_email(&self, user: &User) -> String {
        user.email.reveal(&self.crypto).unwrap_or_else(|err| {
            tracing::warn!(user_id = user.id, error = %err, "email could not be decrypted");
            EMAIL_PLACEHOLDER.to_owned()
        })
    }
}
