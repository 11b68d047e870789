use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::{SqliteStore, constraint_error, parsed_at, uuid_at};
use crate::error::{Error, Result};
use crate::store::CatalogStore;
use crate::tree::{CapabilityEntry, TreeCatalog};
use crate::types::*;

const MONITORING_COLUMNS: &str = "id, name, mode, contact_id, team_id, callback";
const CAPABILITY_COLUMNS: &str = "id, name, monitoring_id, metric, view, thresholds";

fn row_to_monitoring(row: &Row<'_>) -> rusqlite::Result<MonitoringSystem> {
    Ok(MonitoringSystem {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        mode: row.get(2)?,
        contact_id: uuid_at(row, 3)?,
        team_id: uuid_at(row, 4)?,
        callback: row.get(5)?,
    })
}

fn row_to_capability(row: &Row<'_>) -> rusqlite::Result<Capability> {
    Ok(Capability {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        monitoring_id: uuid_at(row, 2)?,
        metric: row.get(3)?,
        view: row.get(4)?,
        thresholds: row.get(5)?,
    })
}

fn row_to_level(row: &Row<'_>) -> rusqlite::Result<Level> {
    Ok(Level {
        name: row.get(0)?,
        short_name: row.get(1)?,
        numeric: row.get(2)?,
    })
}

fn row_to_validity(row: &Row<'_>) -> rusqlite::Result<Validity> {
    Ok(Validity {
        system_property: row.get(0)?,
        entity: row.get(1)?,
        direct: row.get(2)?,
        inherited: row.get(3)?,
    })
}

fn row_to_attribute(row: &Row<'_>) -> rusqlite::Result<Attribute> {
    Ok(Attribute {
        name: row.get(0)?,
        cardinality: parsed_at(row, 1)?,
    })
}

impl SqliteStore {
    fn delete_keyed(&self, sql: &str, key: &str, what: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute(sql, params![key])
            .map_err(|e| constraint_error(e, what))?;
        Ok(rows > 0)
    }
}

impl CatalogStore for SqliteStore {
    // Lookup catalogues

    fn add_lookup(&self, kind: LookupKind, name: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_lookups (kind, name) VALUES (?1, ?2)",
                params![kind.as_str(), name],
            )
            .map_err(|e| constraint_error(e, kind.as_str()))?;
        Ok(())
    }

    fn list_lookup(&self, kind: LookupKind) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM soma_lookups WHERE kind = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![kind.as_str()], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn has_lookup(&self, kind: LookupKind, name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM soma_lookups WHERE kind = ?1 AND name = ?2",
                params![kind.as_str(), name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn remove_lookup(&self, kind: LookupKind, name: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM soma_lookups WHERE kind = ?1 AND name = ?2",
            params![kind.as_str(), name],
        )?;
        Ok(rows > 0)
    }

    // Units

    fn create_unit(&self, unit: &Unit) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_units (unit, name) VALUES (?1, ?2)",
                params![unit.unit, unit.name],
            )
            .map_err(|e| constraint_error(e, "unit"))?;
        Ok(())
    }

    fn get_unit(&self, unit: &str) -> Result<Option<Unit>> {
        self.conn()
            .query_row(
                "SELECT unit, name FROM soma_units WHERE unit = ?1",
                params![unit],
                |row| {
                    Ok(Unit {
                        unit: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_units(&self) -> Result<Vec<Unit>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT unit, name FROM soma_units ORDER BY unit")?;
        let rows = stmt.query_map([], |row| {
            Ok(Unit {
                unit: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_unit(&self, unit: &str) -> Result<bool> {
        self.delete_keyed("DELETE FROM soma_units WHERE unit = ?1", unit, "unit")
    }

    // Providers

    fn create_provider(&self, provider: &Provider) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_providers (name, prefix) VALUES (?1, ?2)",
                params![provider.name, provider.prefix],
            )
            .map_err(|e| constraint_error(e, "provider"))?;
        Ok(())
    }

    fn get_provider(&self, name: &str) -> Result<Option<Provider>> {
        self.conn()
            .query_row(
                "SELECT name, prefix FROM soma_providers WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Provider {
                        name: row.get(0)?,
                        prefix: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_providers(&self) -> Result<Vec<Provider>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name, prefix FROM soma_providers ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Provider {
                name: row.get(0)?,
                prefix: row.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_provider(&self, name: &str) -> Result<bool> {
        self.delete_keyed("DELETE FROM soma_providers WHERE name = ?1", name, "provider")
    }

    // Metrics

    fn create_metric(&self, metric: &Metric) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_metrics (path, unit, description) VALUES (?1, ?2, ?3)",
                params![metric.path, metric.unit, metric.description],
            )
            .map_err(|e| constraint_error(e, "metric"))?;
        Ok(())
    }

    fn get_metric(&self, path: &str) -> Result<Option<Metric>> {
        self.conn()
            .query_row(
                "SELECT path, unit, description FROM soma_metrics WHERE path = ?1",
                params![path],
                |row| {
                    Ok(Metric {
                        path: row.get(0)?,
                        unit: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_metrics(&self) -> Result<Vec<Metric>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT path, unit, description FROM soma_metrics ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            Ok(Metric {
                path: row.get(0)?,
                unit: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_metric(&self, path: &str) -> Result<bool> {
        self.delete_keyed("DELETE FROM soma_metrics WHERE path = ?1", path, "metric")
    }

    // Levels

    fn create_level(&self, level: &Level) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_levels (name, short_name, numeric) VALUES (?1, ?2, ?3)",
                params![level.name, level.short_name, level.numeric],
            )
            .map_err(|e| constraint_error(e, "level"))?;
        Ok(())
    }

    fn get_level(&self, name: &str) -> Result<Option<Level>> {
        self.conn()
            .query_row(
                "SELECT name, short_name, numeric FROM soma_levels WHERE name = ?1",
                params![name],
                row_to_level,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_levels(&self) -> Result<Vec<Level>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name, short_name, numeric FROM soma_levels ORDER BY numeric")?;
        let rows = stmt.query_map([], row_to_level)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_level(&self, name: &str) -> Result<bool> {
        self.delete_keyed("DELETE FROM soma_levels WHERE name = ?1", name, "level")
    }

    // Service attributes

    fn create_attribute(&self, attribute: &Attribute) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_attributes (name, cardinality) VALUES (?1, ?2)",
                params![attribute.name, attribute.cardinality.as_str()],
            )
            .map_err(|e| constraint_error(e, "attribute"))?;
        Ok(())
    }

    fn get_attribute(&self, name: &str) -> Result<Option<Attribute>> {
        self.conn()
            .query_row(
                "SELECT name, cardinality FROM soma_attributes WHERE name = ?1",
                params![name],
                row_to_attribute,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_attributes(&self) -> Result<Vec<Attribute>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name, cardinality FROM soma_attributes ORDER BY name")?;
        let rows = stmt.query_map([], row_to_attribute)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_attribute(&self, name: &str) -> Result<bool> {
        self.delete_keyed("DELETE FROM soma_attributes WHERE name = ?1", name, "attribute")
    }

    // Validity

    fn create_validity(&self, validity: &Validity) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_validity (system_property, entity, direct, inherited)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    validity.system_property,
                    validity.entity,
                    validity.direct,
                    validity.inherited,
                ],
            )
            .map_err(|e| constraint_error(e, "validity"))?;
        Ok(())
    }

    fn list_validity(&self) -> Result<Vec<Validity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT system_property, entity, direct, inherited FROM soma_validity
             ORDER BY system_property, entity",
        )?;
        let rows = stmt.query_map([], row_to_validity)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_validity(&self, system_property: &str) -> Result<bool> {
        self.delete_keyed(
            "DELETE FROM soma_validity WHERE system_property = ?1",
            system_property,
            "validity",
        )
    }

    // Monitoring systems

    fn create_monitoring(&self, monitoring: &MonitoringSystem) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_monitoring_systems (id, name, mode, contact_id, team_id, callback)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    monitoring.id.to_string(),
                    monitoring.name,
                    monitoring.mode,
                    monitoring.contact_id.to_string(),
                    monitoring.team_id.to_string(),
                    monitoring.callback,
                ],
            )
            .map_err(|e| constraint_error(e, "monitoring system"))?;
        Ok(())
    }

    fn get_monitoring(&self, id: Uuid) -> Result<Option<MonitoringSystem>> {
        self.conn()
            .query_row(
                &format!("SELECT {MONITORING_COLUMNS} FROM soma_monitoring_systems WHERE id = ?1"),
                params![id.to_string()],
                row_to_monitoring,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_monitoring(&self) -> Result<Vec<MonitoringSystem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MONITORING_COLUMNS} FROM soma_monitoring_systems ORDER BY name"
        ))?;
        let rows = stmt.query_map([], row_to_monitoring)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_monitoring(&self, id: Uuid) -> Result<bool> {
        self.delete_keyed(
            "DELETE FROM soma_monitoring_systems WHERE id = ?1",
            &id.to_string(),
            "monitoring system",
        )
    }

    // Capabilities

    fn create_capability(&self, capability: &Capability) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_capabilities (id, name, monitoring_id, metric, view, thresholds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    capability.id.to_string(),
                    capability.name,
                    capability.monitoring_id.to_string(),
                    capability.metric,
                    capability.view,
                    capability.thresholds,
                ],
            )
            .map_err(|e| constraint_error(e, "capability"))?;
        Ok(())
    }

    fn get_capability(&self, id: Uuid) -> Result<Option<Capability>> {
        self.conn()
            .query_row(
                &format!("SELECT {CAPABILITY_COLUMNS} FROM soma_capabilities WHERE id = ?1"),
                params![id.to_string()],
                row_to_capability,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_capabilities(&self) -> Result<Vec<Capability>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAPABILITY_COLUMNS} FROM soma_capabilities ORDER BY name"
        ))?;
        let rows = stmt.query_map([], row_to_capability)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_capability(&self, id: Uuid) -> Result<bool> {
        self.delete_keyed(
            "DELETE FROM soma_capabilities WHERE id = ?1",
            &id.to_string(),
            "capability",
        )
    }

    fn ensure_custom_property(&self, repository_id: Uuid, name: &str) -> Result<Uuid> {
        let conn = self.conn();
        let existing = conn
            .query_row(
                "SELECT id FROM soma_custom_properties WHERE repository_id = ?1 AND name = ?2",
                params![repository_id.to_string(), name],
                |row| uuid_at(row, 0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO soma_custom_properties (id, repository_id, name) VALUES (?1, ?2, ?3)",
            params![id.to_string(), repository_id.to_string(), name],
        )
        .map_err(|e| constraint_error(e, "custom property"))?;
        Ok(id)
    }

    fn load_tree_catalog(&self) -> Result<TreeCatalog> {
        let validity = self.list_validity()?;
        let attributes = self.list_attributes()?;
        let levels = self.list_levels()?.into_iter().map(|l| l.name);

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.monitoring_id, c.metric, c.view, c.thresholds, m.name
             FROM soma_capabilities c
             JOIN soma_monitoring_systems m ON m.id = c.monitoring_id",
        )?;
        let capabilities = stmt
            .query_map([], |row| {
                Ok(CapabilityEntry {
                    capability: row_to_capability(row)?,
                    monitoring: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(TreeCatalog::new()
            .with_validity(validity)
            .with_attributes(attributes)
            .with_capabilities(capabilities)
            .with_levels(levels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::tests::{create_test_store, seed_team, seed_user};

    #[test]
    fn test_lookup_catalogue() {
        let (_temp, store) = create_test_store();
        store.add_lookup(LookupKind::Environment, "staging").unwrap();

        assert!(store.has_lookup(LookupKind::Environment, "staging").unwrap());
        assert!(!store.has_lookup(LookupKind::View, "staging").unwrap());
        assert!(matches!(
            store.add_lookup(LookupKind::Environment, "staging"),
            Err(Error::Conflict(_))
        ));

        assert!(store.remove_lookup(LookupKind::Environment, "staging").unwrap());
        assert!(store.list_lookup(LookupKind::Environment).unwrap().is_empty());
    }

    #[test]
    fn test_metric_requires_unit() {
        let (_temp, store) = create_test_store();
        let metric = Metric {
            path: "cpu.idle".into(),
            unit: "%".into(),
            description: "idle cpu".into(),
        };
        assert!(matches!(store.create_metric(&metric), Err(Error::Conflict(_))));

        store
            .create_unit(&Unit {
                unit: "%".into(),
                name: "percent".into(),
            })
            .unwrap();
        store.create_metric(&metric).unwrap();
        assert!(matches!(store.delete_unit("%"), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_tree_catalog_loads_capabilities() {
        let (_temp, store) = create_test_store();
        let team = seed_team(&store, "ops");
        let user = seed_user(&store, &team, "alice");

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
                description: "idle cpu".into(),
            })
            .unwrap();
        let monitoring = MonitoringSystem {
            id: Uuid::new_v4(),
            name: "mon-A".into(),
            mode: "public".into(),
            contact_id: user.id,
            team_id: team.id,
            callback: None,
        };
        store.create_monitoring(&monitoring).unwrap();
        let capability = Capability {
            id: Uuid::new_v4(),
            name: Capability::canonical_name("mon-A", "internal", "cpu.idle"),
            monitoring_id: monitoring.id,
            metric: "cpu.idle".into(),
            view: "internal".into(),
            thresholds: 3,
        };
        store.create_capability(&capability).unwrap();
        store
            .create_level(&Level {
                name: "warning".into(),
                short_name: "warn".into(),
                numeric: 1,
            })
            .unwrap();

        let catalog = store.load_tree_catalog().unwrap();
        let entry = catalog.capability(capability.id).unwrap();
        assert_eq!(entry.canonical_name(), "mon-A.internal.cpu.idle");
        assert!(catalog.knows_level("warning"));
        assert!(!catalog.knows_level("critical"));
    }

    #[test]
    fn test_custom_property_is_created_once() {
        let (_temp, store) = create_test_store();
        let team = seed_team(&store, "ops");
        let repository = RepositoryRecord {
            id: Uuid::new_v4(),
            name: "repo".into(),
            team_id: team.id,
            is_active: true,
            is_deleted: false,
            rollback_level: None,
            created_at: chrono::Utc::now(),
        };
        crate::store::TreeStore::create_repository(&store, &repository).unwrap();

        let first = store.ensure_custom_property(repository.id, "rack").unwrap();
        let second = store.ensure_custom_property(repository.id, "rack").unwrap();
        assert_eq!(first, second);
    }
}
