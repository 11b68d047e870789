use chrono::Utc;
use rusqlite::{OptionalExtension, Row, Transaction, params};
use uuid::Uuid;

use super::inventory::row_to_node;
use super::{
    SqliteStore, constraint_error, datetime_at, format_datetime, json_at, opt_id, opt_uuid_at,
    parsed_at, to_json, uuid_at,
};
use crate::error::{Error, Result};
use crate::store::{ObjectRow, RepositorySnapshot, TreeStore};
use crate::tree::{
    Action, ActionKind, ActionPayload, CheckConfig, CheckInstance, ElementDetail, ObjectSnapshot,
    ObjectState, ObjectType, Property,
};
use crate::types::RepositoryRecord;
use crate::workflow::WorkflowStatus;

const REPOSITORY_COLUMNS: &str =
    "id, name, team_id, is_active, is_deleted, rollback_level, created_at";

const OBJECT_SELECT: &str = "SELECT o.id, o.repository_id, o.bucket_id, o.parent_id, \
     o.object_type, o.name, o.team_id, o.state, o.environment, \
     n.id, n.asset_id, n.name, n.team_id, n.server_id, n.is_online, n.is_deleted, n.created_at \
     FROM soma_tree_objects o \
     LEFT JOIN inventory_nodes n ON n.id = o.id AND o.object_type = 'node'";

fn row_to_repository(row: &Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        team_id: uuid_at(row, 2)?,
        is_active: row.get(3)?,
        is_deleted: row.get(4)?,
        rollback_level: row.get(5)?,
        created_at: datetime_at(row, 6)?,
    })
}

fn row_to_object(row: &Row<'_>) -> rusqlite::Result<ObjectRow> {
    let node_id: Option<String> = row.get(9)?;
    Ok(ObjectRow {
        id: uuid_at(row, 0)?,
        repository_id: uuid_at(row, 1)?,
        bucket_id: opt_uuid_at(row, 2)?,
        parent_id: opt_uuid_at(row, 3)?,
        object_type: parsed_at(row, 4)?,
        name: row.get(5)?,
        team_id: uuid_at(row, 6)?,
        state: parsed_at(row, 7)?,
        environment: row.get(8)?,
        node: match node_id {
            Some(_) => Some(row_to_node(row, 9)?),
            None => None,
        },
    })
}

fn query_payloads<T: serde::de::DeserializeOwned>(
    conn: &rusqlite::Connection,
    sql: &str,
    key: &str,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![key], |row| json_at(row, 0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn environment_of(object: &ObjectSnapshot) -> Option<&str> {
    match &object.detail {
        ElementDetail::Bucket { environment } => Some(environment.as_str()),
        _ => None,
    }
}

fn insert_object(tx: &Transaction<'_>, repository_id: Uuid, object: &ObjectSnapshot) -> Result<()> {
    tx.execute(
        "INSERT INTO soma_tree_objects (id, repository_id, bucket_id, parent_id, object_type,
         name, team_id, state, environment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            object.id.to_string(),
            repository_id.to_string(),
            opt_id(object.bucket_id),
            opt_id(object.parent),
            object.object_type.as_str(),
            object.name,
            object.team_id.to_string(),
            object.state.as_str(),
            environment_of(object),
        ],
    )
    .map_err(|e| constraint_error(e, "tree object"))?;
    Ok(())
}

fn insert_property(tx: &Transaction<'_>, repository_id: Uuid, property: &Property) -> Result<()> {
    tx.execute(
        "INSERT INTO soma_properties (instance_id, source_instance_id, repository_id, object_id,
         inherited, property_type, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            property.instance_id.to_string(),
            property.source_instance_id.to_string(),
            repository_id.to_string(),
            property.object_id.to_string(),
            property.inherited,
            property.value.property_type().as_str(),
            to_json(property)?,
        ],
    )
    .map_err(|e| constraint_error(e, "property"))?;
    Ok(())
}

fn insert_check(tx: &Transaction<'_>, repository_id: Uuid, check: &CheckConfig) -> Result<()> {
    tx.execute(
        "INSERT INTO soma_checks (config_id, repository_id, object_id, inherited, name, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            check.id.to_string(),
            repository_id.to_string(),
            check.object_id.to_string(),
            check.inherited,
            check.name,
            to_json(check)?,
        ],
    )
    .map_err(|e| constraint_error(e, "check configuration"))?;
    Ok(())
}

/// A re-created instance continues the version sequence of its
/// predecessor.
fn next_version(tx: &Transaction<'_>, instance: &CheckInstance) -> Result<CheckInstance> {
    let last_version: Option<u32> = tx.query_row(
        "SELECT MAX(version) FROM soma_instance_configs WHERE instance_id = ?1",
        params![instance.id.to_string()],
        |row| row.get(0),
    )?;
    let mut instance = instance.clone();
    if let Some(last) = last_version {
        instance.version = instance.version.max(last + 1);
    }
    Ok(instance)
}

/// Writes a new instance configuration in `awaiting_computation`.
fn insert_instance_config(tx: &Transaction<'_>, instance: &CheckInstance) -> Result<()> {
    let now = format_datetime(&Utc::now());
    tx.execute(
        "INSERT INTO soma_instance_configs (id, instance_id, version, config_id, repository_id,
         capability_id, status, deployment, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            instance.instance_config_id.to_string(),
            instance.id.to_string(),
            instance.version,
            instance.config_id.to_string(),
            instance.repository_id.to_string(),
            instance.capability_id.to_string(),
            WorkflowStatus::AwaitingComputation.as_str(),
            to_json(&instance.deployment)?,
            now,
        ],
    )
    .map_err(|e| constraint_error(e, "instance configuration"))?;
    tx.execute(
        "INSERT INTO soma_workflow_history (instance_config_id, from_status, to_status, forced, at)
         VALUES (?1, NULL, ?2, 0, ?3)",
        params![
            instance.instance_config_id.to_string(),
            WorkflowStatus::AwaitingComputation.as_str(),
            now,
        ],
    )?;
    Ok(())
}

fn apply_action(tx: &Transaction<'_>, repository_id: Uuid, action: &Action) -> Result<()> {
    match (&action.kind, &action.payload) {
        (ActionKind::ObjectCreated, ActionPayload::Object(object)) => {
            insert_object(tx, repository_id, object)?;
        }
        (ActionKind::ObjectUpdated, ActionPayload::Object(object)) => {
            tx.execute(
                "UPDATE soma_tree_objects SET parent_id = ?2, bucket_id = ?3, state = ?4, name = ?5
                 WHERE id = ?1",
                params![
                    object.id.to_string(),
                    opt_id(object.parent),
                    opt_id(object.bucket_id),
                    object.state.as_str(),
                    object.name,
                ],
            )?;
        }
        (ActionKind::ObjectDeleted, ActionPayload::Object(object)) => {
            tx.execute(
                "DELETE FROM soma_tree_objects WHERE id = ?1",
                params![object.id.to_string()],
            )?;
        }
        (ActionKind::PropertyNew, ActionPayload::Property(property)) => {
            insert_property(tx, repository_id, property)?;
        }
        (ActionKind::PropertyUpdate, ActionPayload::Property(property)) => {
            tx.execute(
                "UPDATE soma_properties SET payload = ?2 WHERE instance_id = ?1",
                params![property.instance_id.to_string(), to_json(property)?],
            )?;
        }
        (ActionKind::PropertyDelete, ActionPayload::Property(property)) => {
            tx.execute(
                "DELETE FROM soma_properties WHERE instance_id = ?1",
                params![property.instance_id.to_string()],
            )?;
        }
        (ActionKind::CheckNew, ActionPayload::Check(check)) => {
            insert_check(tx, repository_id, check)?;
        }
        (ActionKind::CheckUpdate, ActionPayload::Check(check)) => {
            tx.execute(
                "UPDATE soma_checks SET name = ?3, payload = ?4
                 WHERE config_id = ?1 AND object_id = ?2",
                params![
                    check.id.to_string(),
                    check.object_id.to_string(),
                    check.name,
                    to_json(check)?,
                ],
            )?;
        }
        (ActionKind::CheckDelete, ActionPayload::Check(check)) => {
            tx.execute(
                "DELETE FROM soma_checks WHERE config_id = ?1 AND object_id = ?2",
                params![check.id.to_string(), check.object_id.to_string()],
            )?;
        }
        (
            ActionKind::CheckInstanceNew | ActionKind::CheckInstanceUpdate,
            ActionPayload::Instance(instance),
        ) => {
            // Upsert: a deleted instance comes back under its derived id.
            let instance = next_version(tx, instance)?;
            tx.execute(
                "INSERT INTO soma_check_instances (id, repository_id, config_id, object_id,
                 capability_id, current_config_id, version, hash, is_deleted, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)
                 ON CONFLICT(id) DO UPDATE SET current_config_id = excluded.current_config_id,
                 version = excluded.version, hash = excluded.hash, is_deleted = 0,
                 payload = excluded.payload",
                params![
                    instance.id.to_string(),
                    repository_id.to_string(),
                    instance.config_id.to_string(),
                    instance.object_id.to_string(),
                    instance.capability_id.to_string(),
                    instance.instance_config_id.to_string(),
                    instance.version,
                    instance.hash,
                    to_json(&instance)?,
                ],
            )?;
            insert_instance_config(tx, &instance)?;
        }
        (ActionKind::CheckInstanceDelete, ActionPayload::Instance(instance)) => {
            tx.execute(
                "UPDATE soma_check_instances SET is_deleted = 1 WHERE id = ?1",
                params![instance.id.to_string()],
            )?;
        }
        (kind, _) => {
            return Err(Error::internal(format!(
                "action {} carries a mismatched payload",
                kind.as_str()
            )));
        }
    }
    Ok(())
}

impl TreeStore for SqliteStore {
    fn create_repository(&self, repository: &RepositoryRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO soma_repositories (id, name, team_id, is_active, is_deleted, rollback_level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                repository.id.to_string(),
                repository.name,
                repository.team_id.to_string(),
                repository.is_active,
                repository.is_deleted,
                repository.rollback_level,
                format_datetime(&repository.created_at),
            ],
        )
        .map_err(|e| constraint_error(e, "repository"))?;
        tx.execute(
            "INSERT INTO soma_tree_objects (id, repository_id, object_type, name, team_id, state)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5)",
            params![
                repository.id.to_string(),
                ObjectType::Repository.as_str(),
                repository.name,
                repository.team_id.to_string(),
                ObjectState::Standalone.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_repository(&self, id: Uuid) -> Result<Option<RepositoryRecord>> {
        self.conn()
            .query_row(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM soma_repositories WHERE id = ?1"),
                params![id.to_string()],
                row_to_repository,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_repository_by_name(&self, name: &str) -> Result<Option<RepositoryRecord>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REPOSITORY_COLUMNS} FROM soma_repositories
                     WHERE name = ?1 AND is_deleted = 0"
                ),
                params![name],
                row_to_repository,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM soma_repositories WHERE is_deleted = 0 ORDER BY name"
        ))?;
        let rows = stmt.query_map([], row_to_repository)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Flags the repository deleted and drops its root object. The name is
    /// released for reuse.
    fn delete_repository(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let rows = tx.execute(
            "UPDATE soma_repositories SET is_deleted = 1, is_active = 0, name = name || '.' || id
             WHERE id = ?1 AND is_deleted = 0",
            params![id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM soma_tree_objects WHERE repository_id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn locate_object(&self, id: Uuid) -> Result<Option<ObjectRow>> {
        self.conn()
            .query_row(
                &format!("{OBJECT_SELECT} WHERE o.id = ?1"),
                params![id.to_string()],
                row_to_object,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_objects(
        &self,
        repository_id: Uuid,
        object_type: Option<ObjectType>,
    ) -> Result<Vec<ObjectRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{OBJECT_SELECT} WHERE o.repository_id = ?1 AND (?2 IS NULL OR o.object_type = ?2)
             ORDER BY o.seq"
        ))?;
        let rows = stmt.query_map(
            params![repository_id.to_string(), object_type.map(ObjectType::as_str)],
            row_to_object,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn load_repository(&self, id: Uuid) -> Result<Option<RepositorySnapshot>> {
        let Some(repository) = self.get_repository(id)? else {
            return Ok(None);
        };
        let objects = self.list_objects(id, None)?;

        let conn = self.conn();
        let key = id.to_string();
        let properties = query_payloads(
            &conn,
            "SELECT payload FROM soma_properties WHERE repository_id = ?1 AND inherited = 0
             ORDER BY seq",
            &key,
        )?;
        let checks = query_payloads(
            &conn,
            "SELECT payload FROM soma_checks WHERE repository_id = ?1 AND inherited = 0
             ORDER BY seq",
            &key,
        )?;
        let instances = query_payloads(
            &conn,
            "SELECT payload FROM soma_check_instances WHERE repository_id = ?1 AND is_deleted = 0
             ORDER BY id",
            &key,
        )?;

        Ok(Some(RepositorySnapshot {
            repository,
            objects,
            properties,
            checks,
            instances,
        }))
    }

    fn persist_actions(&self, repository_id: Uuid, actions: &[Action]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for action in actions {
            apply_action(&tx, repository_id, action)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn persist_rebuild(
        &self,
        repository_id: Uuid,
        properties: &[Property],
        checks: &[CheckConfig],
        actions: &[Action],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM soma_properties WHERE repository_id = ?1 AND inherited = 1",
            params![repository_id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM soma_checks WHERE repository_id = ?1 AND inherited = 1",
            params![repository_id.to_string()],
        )?;
        for property in properties.iter().filter(|p| p.inherited) {
            insert_property(&tx, repository_id, property)?;
        }
        for check in checks.iter().filter(|c| c.inherited) {
            insert_check(&tx, repository_id, check)?;
        }
        for action in actions {
            apply_action(&tx, repository_id, action)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_properties(&self, object_id: Uuid) -> Result<Vec<Property>> {
        query_payloads(
            &self.conn(),
            "SELECT payload FROM soma_properties WHERE object_id = ?1 ORDER BY seq",
            &object_id.to_string(),
        )
    }

    fn list_check_configs(&self, repository_id: Uuid) -> Result<Vec<CheckConfig>> {
        query_payloads(
            &self.conn(),
            "SELECT payload FROM soma_checks WHERE repository_id = ?1 AND inherited = 0
             ORDER BY name",
            &repository_id.to_string(),
        )
    }

    fn get_check_config(&self, id: Uuid) -> Result<Option<CheckConfig>> {
        self.conn()
            .query_row(
                "SELECT payload FROM soma_checks WHERE config_id = ?1 AND inherited = 0",
                params![id.to_string()],
                |row| json_at(row, 0),
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_instances(&self, repository_id: Option<Uuid>) -> Result<Vec<CheckInstance>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payload FROM soma_check_instances
             WHERE is_deleted = 0 AND (?1 IS NULL OR repository_id = ?1)
             ORDER BY repository_id, id",
        )?;
        let rows = stmt.query_map(params![opt_id(repository_id)], |row| json_at(row, 0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_instance(&self, id: Uuid) -> Result<Option<CheckInstance>> {
        self.conn()
            .query_row(
                "SELECT payload FROM soma_check_instances WHERE id = ?1",
                params![id.to_string()],
                |row| json_at(row, 0),
            )
            .optional()
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;
    use crate::store::WorkflowStore;
    use crate::store::sqlite::tests::{create_test_store, seed_team};
    use crate::tree::{PropertySpec, PropertyValue, Tree, TreeCatalog, TreeOperation};

    fn repository(store: &SqliteStore) -> RepositoryRecord {
        let team = seed_team(store, "ops");
        let repository = RepositoryRecord {
            id: Uuid::new_v4(),
            name: "web".into(),
            team_id: team.id,
            is_active: true,
            is_deleted: false,
            rollback_level: None,
            created_at: Utc::now(),
        };
        store.create_repository(&repository).unwrap();
        repository
    }

    fn run(tree: &mut Tree, op: TreeOperation, rx: &mut UnboundedReceiver<Action>) -> Vec<Action> {
        assert!(tree.apply(op));
        let mut out = Vec::new();
        while let Ok(action) = rx.try_recv() {
            out.push(action);
        }
        out
    }

    #[test]
    fn test_repository_has_root_object() {
        let (_temp, store) = create_test_store();
        let repository = repository(&store);

        let root = store.locate_object(repository.id).unwrap().unwrap();
        assert_eq!(root.object_type, ObjectType::Repository);
        assert!(root.parent_id.is_none());
        assert_eq!(
            store.get_repository_by_name("web").unwrap().unwrap().id,
            repository.id
        );
    }

    #[test]
    fn test_persisted_actions_reload() {
        let (_temp, store) = create_test_store();
        let repository = repository(&store);
        let (actions, mut rx) = unbounded_channel();
        let (errors, _errors_rx) = unbounded_channel();
        let mut tree = Tree::new(&repository, Arc::new(TreeCatalog::new()), actions, errors);

        let bucket = Uuid::new_v4();
        let group = Uuid::new_v4();
        let mut emitted = run(
            &mut tree,
            TreeOperation::CreateBucket {
                id: bucket,
                name: "web-prod".into(),
                environment: "production".into(),
                team_id: repository.team_id,
            },
            &mut rx,
        );
        emitted.extend(run(
            &mut tree,
            TreeOperation::CreateGroup {
                id: group,
                bucket_id: bucket,
                name: "frontends".into(),
                team_id: repository.team_id,
            },
            &mut rx,
        ));
        emitted.extend(run(
            &mut tree,
            TreeOperation::AddProperty {
                object: bucket,
                spec: PropertySpec {
                    instance_id: None,
                    view: "any".into(),
                    inheritance: true,
                    children_only: false,
                    value: PropertyValue::System {
                        name: "dns_zone".into(),
                        value: "example.org".into(),
                    },
                },
            },
            &mut rx,
        ));
        store.persist_actions(repository.id, &emitted).unwrap();

        let snapshot = store.load_repository(repository.id).unwrap().unwrap();
        assert_eq!(snapshot.objects.len(), 3);
        let bucket_row = snapshot.objects.iter().find(|o| o.id == bucket).unwrap();
        assert_eq!(bucket_row.environment.as_deref(), Some("production"));
        let group_row = snapshot.objects.iter().find(|o| o.id == group).unwrap();
        assert_eq!(group_row.bucket_id, Some(bucket));
        assert_eq!(group_row.parent_id, Some(bucket));

        assert_eq!(snapshot.properties.len(), 1);
        assert_eq!(snapshot.properties[0].object_id, bucket);
        // The group's inherited copy is stored but not replayed.
        assert_eq!(store.list_properties(group).unwrap().len(), 1);
    }

    #[test]
    fn test_instance_actions_open_workflow() {
        let (_temp, store) = create_test_store();
        let repository = repository(&store);
        let instance = CheckInstance {
            id: Uuid::new_v4(),
            instance_config_id: Uuid::new_v4(),
            config_id: Uuid::new_v4(),
            repository_id: repository.id,
            object_id: Uuid::new_v4(),
            object_type: ObjectType::Group,
            capability_id: Uuid::new_v4(),
            view: "internal".into(),
            service_source_id: None,
            service_name: None,
            hash: "h1".into(),
            version: 0,
            deployment: serde_json::json!({}),
        };
        let action = |kind, instance: &CheckInstance| Action {
            kind,
            repository_id: repository.id,
            object_type: ObjectType::Group,
            object_id: instance.object_id,
            inherited: false,
            payload: ActionPayload::Instance(instance.clone()),
        };

        store
            .persist_actions(repository.id, &[action(ActionKind::CheckInstanceNew, &instance)])
            .unwrap();
        let config = store
            .get_instance_config(instance.instance_config_id)
            .unwrap()
            .unwrap();
        assert_eq!(config.status, WorkflowStatus::AwaitingComputation);
        assert_eq!(store.list_history(config.id).unwrap().len(), 1);

        store
            .persist_actions(repository.id, &[action(ActionKind::CheckInstanceDelete, &instance)])
            .unwrap();
        assert!(store.list_instances(Some(repository.id)).unwrap().is_empty());

        // Re-creation continues the version sequence.
        let again = CheckInstance {
            instance_config_id: Uuid::new_v4(),
            ..instance.clone()
        };
        store
            .persist_actions(repository.id, &[action(ActionKind::CheckInstanceNew, &again)])
            .unwrap();
        let stored = store.get_instance(instance.id).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(store.list_instance_versions(instance.id).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let (_temp, store) = create_test_store();
        let repository = repository(&store);
        let object = ObjectSnapshot {
            id: Uuid::new_v4(),
            name: "web-prod".into(),
            object_type: ObjectType::Bucket,
            team_id: repository.team_id,
            state: ObjectState::Standalone,
            parent: Some(repository.id),
            bucket_id: None,
            detail: ElementDetail::Bucket {
                environment: "production".into(),
            },
        };
        let created = Action {
            kind: ActionKind::ObjectCreated,
            repository_id: repository.id,
            object_type: ObjectType::Bucket,
            object_id: object.id,
            inherited: false,
            payload: ActionPayload::Object(object),
        };

        let result = store.persist_actions(repository.id, &[created.clone(), created]);
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(
            store
                .list_objects(repository.id, Some(ObjectType::Bucket))
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn test_rebuild_is_one_transaction() {
        let (_temp, store) = create_test_store();
        let repository = repository(&store);
        let group = Uuid::new_v4();
        let inherited = Property {
            instance_id: Uuid::new_v4(),
            source_instance_id: Uuid::new_v4(),
            object_id: group,
            object_type: ObjectType::Group,
            source_object_id: Uuid::new_v4(),
            source_type: ObjectType::Bucket,
            view: "any".into(),
            inherited: true,
            inheritance: true,
            children_only: false,
            value: PropertyValue::System {
                name: "dns_zone".into(),
                value: "example.org".into(),
            },
        };
        store
            .persist_rebuild(repository.id, &[inherited.clone()], &[], &[])
            .unwrap();
        assert_eq!(store.list_properties(group).unwrap().len(), 1);

        let object = ObjectSnapshot {
            id: Uuid::new_v4(),
            name: "web-prod".into(),
            object_type: ObjectType::Bucket,
            team_id: repository.team_id,
            state: ObjectState::Standalone,
            parent: Some(repository.id),
            bucket_id: None,
            detail: ElementDetail::Bucket {
                environment: "production".into(),
            },
        };
        let created = Action {
            kind: ActionKind::ObjectCreated,
            repository_id: repository.id,
            object_type: ObjectType::Bucket,
            object_id: object.id,
            inherited: false,
            payload: ActionPayload::Object(object),
        };
        let original = inherited.instance_id;
        let replacement = Property {
            instance_id: Uuid::new_v4(),
            ..inherited
        };

        let result = store.persist_rebuild(
            repository.id,
            &[replacement],
            &[],
            &[created.clone(), created],
        );
        assert!(matches!(result, Err(Error::Conflict(_))));
        let kept = store.list_properties(group).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].instance_id, original);
        assert!(
            store
                .list_objects(repository.id, Some(ObjectType::Bucket))
                .unwrap()
                .is_empty()
        );
    }
}
