//! Cryptographic logics.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::config::{Argon2 as ArgonConfig, Secrets};

const NONCE_SIZE: usize = 12;
const KEY_LENGTH: usize = 32;
const MIN_SALT_LENGTH: usize = 8;

type HmacSha256 = Hmac<Sha256>;
type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("ciphertext was rejected by the cipher")]
    Aead,
    #[error("argon2 error: {0}")]
    Argon2(String),

    #[error("hex is not valid")]
    Hex(#[from] hex::FromHexError),
    #[error("iv length is {value} while {excepted} is excepted")]
    IvLength { value: usize, excepted: usize },
    #[error("decrypted data is not utf8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("salt length is {value} while at least {excepted} is excepted")]
    SaltLength { value: usize, excepted: usize },
    #[error("invalid hmac key length")]
    HmacKey,
}

/// Cryptographic manager.
pub struct Crypto {
    pub symmetric: SymmetricCipher,
    pub pwd: PasswordManager,
    pub hasher: Hasher,
    passcode: Option<Vec<u8>>,
}

impl Crypto {
    /// Create a new [`Crypto`] from process secrets.
    pub fn new(config: Option<ArgonConfig>, secrets: &Secrets) -> Result<Self> {
        let key = SymmetricKey::derive_from_password(
            secrets.key.as_bytes(),
            secrets.salt.as_bytes(),
        )?;
        let symmetric = SymmetricCipher::new(key);
        let pwd = PasswordManager::new(config)?;
        let hasher = Hasher::new(secrets.salt.as_bytes())?;
        let passcode = secrets
            .admin_passcode
            .as_deref()
            .map(|code| hasher.mac(code));

        Ok(Self {
            symmetric,
            pwd,
            hasher,
            passcode,
        })
    }

    /// Check the administrator step-up passcode in constant time.
    ///
    /// Always `false` when no passcode is configured.
    pub fn check_passcode(&self, given: Option<&str>) -> bool {
        match (&self.passcode, given) {
            (Some(expected), Some(given)) => self.hasher.verify(given, expected),
            _ => false,
        }
    }
}

/// Draw a six-digit verification code uniformly from `100000..=999999`.
pub fn verification_code() -> String {
    OsRng.gen_range(100_000..=999_999_u32).to_string()
}

/// SymmetricKey holds a fixed-size key protected by Zeroizing.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_LENGTH]>);

impl SymmetricKey {
    /// Derive key from a password + salt using Argon2id.
    pub fn derive_from_password(
        password: impl AsRef<[u8]>,
        salt: impl AsRef<[u8]>,
    ) -> Result<Self> {
        let salt = salt.as_ref();
        if salt.len() < MIN_SALT_LENGTH {
            return Err(CryptoError::SaltLength {
                value: salt.len(),
                excepted: MIN_SALT_LENGTH,
            });
        }

        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            Params::default(),
        );
        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        argon2
            .hash_password_into(password.as_ref(), salt, &mut *key)
            .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self(key))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Hex-encoded ciphertext and the nonce used to produce it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: String,
}

/// SymmetricCipher provides encrypt/decrypt operations with AES-256-GCM.
///
/// Every call draws a fresh 96-bit nonce, so sealing the same plaintext
/// twice never yields the same pair.
pub struct SymmetricCipher {
    key: SymmetricKey,
}

impl SymmetricCipher {
    /// Create a new [`SymmetricCipher`].
    pub fn new(key: SymmetricKey) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
    }

    /// Encrypt `plaintext` returning hex ciphertext and hex iv.
    pub fn encrypt(&self, plaintext: impl AsRef<[u8]>) -> Result<Sealed> {
        let mut iv = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
            .map_err(|_| CryptoError::Aead)?;

        Ok(Sealed {
            ciphertext: hex::encode(ciphertext),
            iv: hex::encode(iv),
        })
    }

    /// Decrypt hex `ciphertext` with its hex `iv`.
    ///
    /// Fails on malformed hex, a wrong-size iv or any tampering.
    pub fn decrypt(
        &self,
        ciphertext: impl AsRef<[u8]>,
        iv: impl AsRef<[u8]>,
    ) -> Result<String> {
        let iv = hex::decode(iv)?;
        if iv.len() != NONCE_SIZE {
            return Err(CryptoError::IvLength {
                value: iv.len(),
                excepted: NONCE_SIZE,
            });
        }
        let ciphertext = hex::decode(ciphertext)?;

        let plain = self
            .cipher()
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| CryptoError::Aead)?;

        Ok(String::from_utf8(plain)?)
    }
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// A malformed stored hash counts as a mismatch.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> bool {
        PasswordHash::new(phc_hash)
            .map(|parsed| {
                self.argon2()
                    .verify_password(password.as_ref(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

/// Keyed one-way hash used as an equality lookup key.
pub struct Hasher(HmacSha256);

impl Hasher {
    /// Create a new [`Hasher`] keyed with `pepper`.
    pub fn new(pepper: impl AsRef<[u8]>) -> Result<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(pepper.as_ref())
            .map_err(|_| CryptoError::HmacKey)?;
        Ok(Self(mac))
    }

    fn mac(&self, data: impl AsRef<[u8]>) -> Vec<u8> {
        let mut mac = self.0.clone();
        mac.update(data.as_ref());
        mac.finalize().into_bytes().to_vec()
    }

    fn verify(&self, data: impl AsRef<[u8]>, expected: &[u8]) -> bool {
        let mut mac = self.0.clone();
        mac.update(data.as_ref());
        mac.verify_slice(expected).is_ok()
    }

    /// Digest an email address. Case is ignored.
    pub fn digest(&self, email: &str) -> String {
        hex::encode(self.mac(email.to_lowercase()))
    }
}
