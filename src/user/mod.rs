//! User record and its state machines.
//!
//! The three stored email columns are folded into [`EmailState`], the
//! verified flag and pending code into [`Verification`], and the three ban
//! columns into an optional [`Ban`], so that impossible combinations cannot
//! be represented.

mod serial;

pub use serial::*;

use chrono::{DateTime, Utc};

use crate::crypto::{Crypto, CryptoError};

/// Reason stored when a moderator gives none.
pub const DEFAULT_BAN_REASON: &str = "No reason provided";

/// How the user's email is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmailState {
    /// Encrypted address plus its lookup hash.
    Managed {
        ciphertext: String,
        iv: String,
        hash: String,
    },
    /// Row predating email encryption: the address is stored in clear.
    Legacy { plaintext: String },
}

impl EmailState {
    /// Seal a plaintext address into the managed representation.
    pub fn seal(email: &str, crypto: &Crypto) -> Result<Self, CryptoError> {
        let sealed = crypto.symmetric.encrypt(email)?;
        Ok(EmailState::Managed {
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            hash: crypto.hasher.digest(email),
        })
    }

    /// Lookup hash, absent for legacy rows.
    pub fn hash(&self) -> Option<&str> {
        match self {
            EmailState::Managed { hash, .. } => Some(hash),
            EmailState::Legacy { .. } => None,
        }
    }

    /// Recover the plaintext address.
    pub fn reveal(&self, crypto: &Crypto) -> Result<String, CryptoError> {
        match self {
            EmailState::Managed { ciphertext, iv, .. } => {
                crypto.symmetric.decrypt(ciphertext, iv)
            },
            EmailState::Legacy { plaintext } => Ok(plaintext.clone()),
        }
    }
}

/// Account activation state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// Waiting for the owner to prove control of the address.
    /// Legacy rows may have no code at all.
    Pending { code: Option<String> },
}

/// Active moderation decree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ban {
    pub reason: String,
    /// `None` means indefinite.
    pub until: Option<DateTime<Utc>>,
}

/// User as saved on database.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: i64,
    pub serial_number: SerialNumber,
    pub username: String,
    pub email: EmailState,
    pub password: String,
    pub is_admin: bool,
    pub verification: Verification,
    pub ban: Option<Ban>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Verified
    }

    /// Pending verification code, if any.
    pub fn verification_code(&self) -> Option<&str> {
        match &self.verification {
            Verification::Pending { code } => code.as_deref(),
            Verification::Verified => None,
        }
    }

    /// Whether this row must be converted on next successful login.
    pub fn needs_migration(&self) -> bool {
        matches!(
            (&self.email, &self.verification),
            (EmailState::Legacy { plaintext }, Verification::Pending { .. })
                if !plaintext.is_empty()
        )
    }

    /// Convert a legacy unverified row into a managed, verified one.
    ///
    /// Rows that do not need it are returned untouched.
    pub fn migrate(mut self, crypto: &Crypto) -> Result<Self, CryptoError> {
        if !self.needs_migration() {
            return Ok(self);
        }

        if let EmailState::Legacy { plaintext } = &self.email {
            self.email = EmailState::seal(plaintext, crypto)?;
            self.verification = Verification::Verified;
        }

        Ok(self)
    }
}

/// User about to be inserted; `id` and serial number are assigned by storage.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: EmailState,
    pub password: String,
    pub is_admin: bool,
    pub verification: Verification,
}

impl NewUser {
    /// Attach storage-assigned identity.
    pub fn persisted(self, id: i64, created_at: DateTime<Utc>) -> User {
        User {
            id,
            serial_number: SerialNumber::from_id(id),
            username: self.username,
            email: self.email,
            password: self.password,
            is_admin: self.is_admin,
            verification: self.verification,
            ban: None,
            created_at,
        }
    }
}
