use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::StoredToken;

const ARGON2_MEMORY: u32 = 19 * 1024; // KiB
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;
const ARGON2_OUTPUT_LEN: usize = 32;

const SALT_BYTES: usize = 32;
const SECRET_BYTES: usize = 18;

type HmacSha256 = Hmac<Sha256>;

/// Argon2id hashing for account passwords and activation tokens.
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    pub fn new() -> Result<Self> {
        let params = Params::new(
            ARGON2_MEMORY,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .map_err(|e| Error::Config(format!("invalid argon2 params: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| Error::internal(format!("failed to hash credential: {e}")))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, secret: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::internal(format!("invalid hash format: {e}")))?;

        match self.argon2.verify_password(secret.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::internal(format!("failed to verify credential: {e}"))),
        }
    }
}

/// Random URL-safe secret for generated passwords and activation tokens.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Issues and checks bearer tokens. The tag is an HMAC over
/// `user_id:salt:expires_at` under the process-wide key.
pub struct TokenSigner {
    key: Vec<u8>,
    seed: String,
    ttl: Duration,
}

impl TokenSigner {
    #[must_use]
    pub fn new(key: &str, seed: &str, ttl: Duration) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
            seed: seed.to_string(),
            ttl,
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Config(format!("invalid token key: {e}")))
    }

    fn material(user_id: Uuid, salt: &str, expires_at: &DateTime<Utc>) -> String {
        format!(
            "{user_id}:{salt}:{}",
            expires_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }

    fn salt(&self) -> String {
        let mut random = [0u8; SALT_BYTES];
        rand::thread_rng().fill(&mut random);
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_bytes());
        hasher.update(random);
        hex::encode(hasher.finalize())
    }

    pub fn tag(&self, user_id: Uuid, salt: &str, expires_at: &DateTime<Utc>) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(Self::material(user_id, salt, expires_at).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn issue(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<StoredToken> {
        let salt = self.salt();
        let expires_at = now + self.ttl;
        Ok(StoredToken {
            tag: self.tag(user_id, &salt, &expires_at)?,
            user_id,
            salt,
            valid_from: now,
            expires_at,
        })
    }

    /// Returns true if the stored tag was produced by this key.
    pub fn verify(&self, token: &StoredToken) -> Result<bool> {
        let Ok(provided) = hex::decode(&token.tag) else {
            return Ok(false);
        };
        let mut mac = self.mac()?;
        mac.update(Self::material(token.user_id, &token.salt, &token.expires_at).as_bytes());
        Ok(mac.verify_slice(&provided).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-key", "seed", Duration::hours(12))
    }

    #[test]
    fn test_password_verification() {
        let hasher = CredentialHasher::new().unwrap();
        let hash = hasher.hash("hunter2").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("hunter2", &hash).unwrap());
        assert!(!hasher.verify("hunter3", &hash).unwrap());
    }

    #[test]
    fn test_token_tag_verifies() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.issue(Uuid::new_v4(), now).unwrap();

        assert_eq!(token.expires_at - token.valid_from, Duration::hours(12));
        assert_eq!(token.tag.len(), 64);
        assert!(signer.verify(&token).unwrap());
    }

    #[test]
    fn test_tampered_token_fails() {
        let signer = signer();
        let token = signer.issue(Uuid::new_v4(), Utc::now()).unwrap();

        let extended = StoredToken {
            expires_at: token.expires_at + Duration::days(1),
            ..token.clone()
        };
        assert!(!signer.verify(&extended).unwrap());

        let other_key = TokenSigner::new("other-key", "seed", Duration::hours(12));
        assert!(!other_key.verify(&token).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let signer = signer();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let a = signer.issue(user, now).unwrap();
        let b = signer.issue(user, now).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.tag, b.tag);
    }
}
