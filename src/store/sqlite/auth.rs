use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::{SqliteStore, constraint_error, datetime_at, format_datetime, uuid_at};
use crate::error::{Error, Result};
use crate::store::AuthStore;
use crate::types::{ActivationToken, Credential, StoredToken};

fn row_to_token(row: &Row<'_>) -> rusqlite::Result<StoredToken> {
    Ok(StoredToken {
        tag: row.get(0)?,
        user_id: uuid_at(row, 1)?,
        salt: row.get(2)?,
        valid_from: datetime_at(row, 3)?,
        expires_at: datetime_at(row, 4)?,
    })
}

impl AuthStore for SqliteStore {
    fn set_credential(&self, credential: &Credential) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO auth_credentials (user_id, password_hash, valid_from, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET password_hash = excluded.password_hash,
                 valid_from = excluded.valid_from, expires_at = excluded.expires_at",
                params![
                    credential.user_id.to_string(),
                    credential.password_hash,
                    format_datetime(&credential.valid_from),
                    format_datetime(&credential.expires_at),
                ],
            )
            .map_err(|e| constraint_error(e, "credential"))?;
        Ok(())
    }

    fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>> {
        self.conn()
            .query_row(
                "SELECT user_id, password_hash, valid_from, expires_at
                 FROM auth_credentials WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| {
                    Ok(Credential {
                        user_id: uuid_at(row, 0)?,
                        password_hash: row.get(1)?,
                        valid_from: datetime_at(row, 2)?,
                        expires_at: datetime_at(row, 3)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_token(&self, token: &StoredToken) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO auth_tokens (tag, user_id, salt, valid_from, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    token.tag,
                    token.user_id.to_string(),
                    token.salt,
                    format_datetime(&token.valid_from),
                    format_datetime(&token.expires_at),
                ],
            )
            .map_err(|e| constraint_error(e, "token"))?;
        Ok(())
    }

    fn get_token(&self, tag: &str) -> Result<Option<StoredToken>> {
        self.conn()
            .query_row(
                "SELECT tag, user_id, salt, valid_from, expires_at FROM auth_tokens WHERE tag = ?1",
                params![tag],
                row_to_token,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_tokens(&self) -> Result<Vec<StoredToken>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT tag, user_id, salt, valid_from, expires_at FROM auth_tokens")?;
        let rows = stmt.query_map([], row_to_token)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, tag: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM auth_tokens WHERE tag = ?1", params![tag])?;
        Ok(rows > 0)
    }

    fn delete_user_tokens(&self, user_id: Uuid) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM auth_tokens WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(rows)
    }

    fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        // RFC 3339 timestamps in UTC compare correctly as text.
        let rows = self.conn().execute(
            "DELETE FROM auth_tokens WHERE expires_at <= ?1",
            params![format_datetime(&now)],
        )?;
        Ok(rows)
    }

    fn set_activation(&self, activation: &ActivationToken) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO auth_activations (user_id, token_hash, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET token_hash = excluded.token_hash,
                 expires_at = excluded.expires_at",
                params![
                    activation.user_id.to_string(),
                    activation.token_hash,
                    format_datetime(&activation.expires_at),
                ],
            )
            .map_err(|e| constraint_error(e, "activation"))?;
        Ok(())
    }

    fn get_activation(&self, user_id: Uuid) -> Result<Option<ActivationToken>> {
        self.conn()
            .query_row(
                "SELECT user_id, token_hash, expires_at FROM auth_activations WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| {
                    Ok(ActivationToken {
                        user_id: uuid_at(row, 0)?,
                        token_hash: row.get(1)?,
                        expires_at: datetime_at(row, 2)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn delete_activation(&self, user_id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM auth_activations WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::sqlite::tests::{create_test_store, seed_team, seed_user};

    #[test]
    fn test_token_round_trip_and_purge() {
        let (_temp, store) = create_test_store();
        let team = seed_team(&store, "ops");
        let user = seed_user(&store, &team, "alice");
        let now = Utc::now();

        let live = StoredToken {
            tag: "live".into(),
            user_id: user.id,
            salt: "s1".into(),
            valid_from: now,
            expires_at: now + Duration::hours(1),
        };
        let stale = StoredToken {
            tag: "stale".into(),
            expires_at: now - Duration::seconds(1),
            ..live.clone()
        };
        store.create_token(&live).unwrap();
        store.create_token(&stale).unwrap();
        assert!(matches!(store.create_token(&live), Err(Error::Conflict(_))));

        assert_eq!(store.purge_expired_tokens(now).unwrap(), 1);
        assert!(store.get_token("stale").unwrap().is_none());
        assert_eq!(store.get_token("live").unwrap().unwrap().user_id, user.id);

        assert_eq!(store.delete_user_tokens(user.id).unwrap(), 1);
        assert!(store.list_tokens().unwrap().is_empty());
    }

    #[test]
    fn test_credential_upsert() {
        let (_temp, store) = create_test_store();
        let team = seed_team(&store, "ops");
        let user = seed_user(&store, &team, "alice");
        let now = Utc::now();

        let mut credential = Credential {
            user_id: user.id,
            password_hash: "first".into(),
            valid_from: now,
            expires_at: now + Duration::days(1),
        };
        store.set_credential(&credential).unwrap();
        credential.password_hash = "second".into();
        store.set_credential(&credential).unwrap();

        let fetched = store.get_credential(user.id).unwrap().unwrap();
        assert_eq!(fetched.password_hash, "second");
    }
}
