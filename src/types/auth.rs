use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Password credential of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: Uuid,
    pub password_hash: String,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A bearer token as persisted. The tag is what clients present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub tag: String,
    pub user_id: Uuid,
    pub salt: String,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_token_validity_window() {
        let now = Utc::now();
        let token = StoredToken {
            tag: "ab".into(),
            user_id: Uuid::new_v4(),
            salt: "s".into(),
            valid_from: now,
            expires_at: now + Duration::seconds(1),
        };
        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::seconds(2)));
        assert!(!token.is_valid_at(now - Duration::seconds(1)));
    }
}
