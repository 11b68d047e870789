mod auth;
mod catalog;
mod inventory;
mod jobs;
mod permission;
mod tree;
mod workflow;

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, Row};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.conn()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn datetime_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(parse_datetime(&row.get::<_, String>(idx)?))
}

fn opt_datetime_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .map(|s| parse_datetime(&s)))
}

fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e| conversion_error(idx, e))
}

fn json_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::from)
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|id| id.to_string())
}

/// Maps unique and foreign key violations onto a conflict.
fn constraint_error(err: rusqlite::Error, what: &str) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Error::conflict(format!("{what} conflicts with existing data"))
        }
        _ => Error::Database(err),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::store::{CatalogStore, InventoryStore, TreeStore};
    use crate::types::{Capability, Metric, MonitoringSystem, RepositoryRecord, Team, Unit, User};

    pub(crate) fn create_test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    /// Runs raw SQL, e.g. to take a table away and make writes fail.
    pub(crate) fn execute_sql(store: &SqliteStore, sql: &str) {
        store.conn().execute_batch(sql).unwrap();
    }

    pub(crate) fn seed_team(store: &SqliteStore, name: &str) -> Team {
        let team = Team {
            id: Uuid::new_v4(),
            name: name.to_string(),
            ldap_id: None,
            is_system: false,
        };
        store.create_team(&team).unwrap();
        team
    }

    pub(crate) fn seed_user(store: &SqliteStore, team: &Team, uid: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            uid: uid.to_string(),
            first_name: "Test".into(),
            last_name: "User".into(),
            employee_number: None,
            mail_address: format!("{uid}@example.org"),
            team_id: team.id,
            is_active: true,
            is_system: false,
            is_deleted: false,
            is_admin: false,
            created_at: Utc::now(),
        };
        store.create_user(&user).unwrap();
        user
    }

    pub(crate) fn seed_repository(store: &SqliteStore, team: &Team, name: &str) -> RepositoryRecord {
        let repository = RepositoryRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            team_id: team.id,
            is_active: true,
            is_deleted: false,
            rollback_level: None,
            created_at: Utc::now(),
        };
        store.create_repository(&repository).unwrap();
        repository
    }

    /// Monitoring system `mon-A` with capability `cpu.idle` on `view`.
    pub(crate) fn seed_capability(store: &SqliteStore, contact: &User, view: &str) -> Capability {
        if store.get_unit("%").unwrap().is_none() {
            store
                .create_unit(&Unit {
                    unit: "%".into(),
                    name: "percent".into(),
                })
                .unwrap();
            store
                .create_metric(&Metric {
                    path: "cpu.idle".into(),
                    unit: "%".into(),
                    description: "idle cpu share".into(),
                })
                .unwrap();
        }
        let monitoring = MonitoringSystem {
            id: Uuid::new_v4(),
            name: format!("mon-{view}"),
            mode: "public".into(),
            contact_id: contact.id,
            team_id: contact.team_id,
            callback: None,
        };
        store.create_monitoring(&monitoring).unwrap();
        let capability = Capability {
            id: Uuid::new_v4(),
            name: Capability::canonical_name(&monitoring.name, view, "cpu.idle"),
            monitoring_id: monitoring.id,
            metric: "cpu.idle".into(),
            view: view.to_string(),
            thresholds: 1,
        };
        store.create_capability(&capability).unwrap();
        capability
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = create_test_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "inventory_teams",
            "inventory_users",
            "inventory_nodes",
            "soma_repositories",
            "soma_tree_objects",
            "soma_properties",
            "soma_checks",
            "soma_check_instances",
            "soma_instance_configs",
            "soma_workflow_history",
            "soma_jobs",
            "soma_grants",
            "auth_tokens",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_temp, store) = create_test_store();
        store.initialize().unwrap();
    }
}
