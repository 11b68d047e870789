use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::{
    SqliteStore, datetime_at, format_datetime, json_at, opt_id, opt_uuid_at, parsed_at, uuid_at,
};
use crate::error::{Error, Result};
use crate::store::{Transition, WorkflowStore};
use crate::workflow::{InstanceConfig, NextStep, WorkflowHistory, WorkflowStatus};

const CONFIG_SELECT: &str = "SELECT ic.id, ic.instance_id, ic.version, ic.config_id, \
     ic.repository_id, c.monitoring_id, ic.status, ic.next_step, ic.attempts, ic.forced, \
     ic.deployment, ic.created_at, ic.updated_at \
     FROM soma_instance_configs ic \
     LEFT JOIN soma_capabilities c ON c.id = ic.capability_id";

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<InstanceConfig> {
    let next: Option<String> = row.get(7)?;
    Ok(InstanceConfig {
        id: uuid_at(row, 0)?,
        instance_id: uuid_at(row, 1)?,
        version: row.get(2)?,
        config_id: uuid_at(row, 3)?,
        repository_id: uuid_at(row, 4)?,
        monitoring_id: opt_uuid_at(row, 5)?,
        status: parsed_at(row, 6)?,
        next: next
            .map(|s| s.parse::<NextStep>())
            .transpose()
            .map_err(|e| super::conversion_error(7, e))?,
        attempts: row.get(8)?,
        forced: row.get(9)?,
        deployment: json_at(row, 10)?,
        created_at: datetime_at(row, 11)?,
        updated_at: datetime_at(row, 12)?,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<WorkflowHistory> {
    let from: Option<String> = row.get(1)?;
    Ok(WorkflowHistory {
        instance_config_id: uuid_at(row, 0)?,
        from: from
            .map(|s| s.parse::<WorkflowStatus>())
            .transpose()
            .map_err(|e| super::conversion_error(1, e))?,
        to: parsed_at(row, 2)?,
        forced: row.get(3)?,
        actor: opt_uuid_at(row, 4)?,
        at: datetime_at(row, 5)?,
    })
}

impl WorkflowStore for SqliteStore {
    fn get_instance_config(&self, id: Uuid) -> Result<Option<InstanceConfig>> {
        self.conn()
            .query_row(
                &format!("{CONFIG_SELECT} WHERE ic.id = ?1"),
                params![id.to_string()],
                row_to_config,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_instance_versions(&self, instance_id: Uuid) -> Result<Vec<InstanceConfig>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{CONFIG_SELECT} WHERE ic.instance_id = ?1 ORDER BY ic.version"
        ))?;
        let rows = stmt.query_map(params![instance_id.to_string()], row_to_config)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_instance_configs(&self, status: Option<WorkflowStatus>) -> Result<Vec<InstanceConfig>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{CONFIG_SELECT} WHERE (?1 IS NULL OR ic.status = ?1) ORDER BY ic.created_at, ic.id"
        ))?;
        let rows = stmt.query_map(params![status.map(WorkflowStatus::as_str)], row_to_config)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_monitoring_configs(
        &self,
        monitoring_id: Uuid,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<InstanceConfig>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{CONFIG_SELECT} WHERE c.monitoring_id = ?1 ORDER BY ic.created_at, ic.id"
        ))?;
        let rows = stmt.query_map(params![monitoring_id.to_string()], row_to_config)?;
        let configs = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(configs
            .into_iter()
            .filter(|c| statuses.contains(&c.status))
            .collect())
    }

    fn transition(&self, transition: &Transition) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let at = format_datetime(&transition.at);

        let rows = tx.execute(
            "UPDATE soma_instance_configs
             SET status = ?3, updated_at = ?4,
                 forced = CASE WHEN ?5 THEN 1 ELSE forced END,
                 attempts = attempts + CASE WHEN ?6 THEN 1 ELSE 0 END
             WHERE id = ?1 AND status = ?2",
            params![
                transition.instance_config_id.to_string(),
                transition.from.as_str(),
                transition.to.as_str(),
                at,
                transition.forced,
                transition.bump_attempts,
            ],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO soma_workflow_history (instance_config_id, from_status, to_status, forced, actor, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                transition.instance_config_id.to_string(),
                transition.from.as_str(),
                transition.to.as_str(),
                transition.forced,
                opt_id(transition.actor),
                at,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn set_next_step(&self, id: Uuid, next: Option<NextStep>) -> Result<()> {
        self.conn().execute(
            "UPDATE soma_instance_configs SET next_step = ?2 WHERE id = ?1",
            params![id.to_string(), next.map(NextStep::as_str)],
        )?;
        Ok(())
    }

    fn workflow_summary(&self) -> Result<Vec<(WorkflowStatus, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM soma_instance_configs GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([], |row| Ok((parsed_at(row, 0)?, row.get(1)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_history(&self, instance_config_id: Uuid) -> Result<Vec<WorkflowHistory>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT instance_config_id, from_status, to_status, forced, actor, at
             FROM soma_workflow_history WHERE instance_config_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![instance_config_id.to_string()], row_to_history)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::TreeStore;
    use crate::store::sqlite::tests::{create_test_store, seed_team};
    use crate::tree::{Action, ActionKind, ActionPayload, CheckInstance, ObjectType};
    use crate::types::RepositoryRecord;

    fn seeded_config(store: &SqliteStore) -> Uuid {
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

        let instance = CheckInstance {
            id: Uuid::new_v4(),
            instance_config_id: Uuid::new_v4(),
            config_id: Uuid::new_v4(),
            repository_id: repository.id,
            object_id: Uuid::new_v4(),
            object_type: ObjectType::Node,
            capability_id: Uuid::new_v4(),
            view: "internal".into(),
            service_source_id: None,
            service_name: None,
            hash: "h".into(),
            version: 0,
            deployment: serde_json::json!({"interval": 60}),
        };
        store
            .persist_actions(
                repository.id,
                &[Action {
                    kind: ActionKind::CheckInstanceNew,
                    repository_id: repository.id,
                    object_type: ObjectType::Node,
                    object_id: instance.object_id,
                    inherited: false,
                    payload: ActionPayload::Instance(instance.clone()),
                }],
            )
            .unwrap();
        instance.instance_config_id
    }

    fn step(id: Uuid, from: WorkflowStatus, to: WorkflowStatus) -> Transition {
        Transition {
            instance_config_id: id,
            from,
            to,
            forced: false,
            actor: None,
            bump_attempts: false,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let (_temp, store) = create_test_store();
        let id = seeded_config(&store);

        assert!(
            store
                .transition(&step(id, WorkflowStatus::AwaitingComputation, WorkflowStatus::Computed))
                .unwrap()
        );
        // A second writer starting from the old state loses.
        assert!(
            !store
                .transition(&step(id, WorkflowStatus::AwaitingComputation, WorkflowStatus::Computed))
                .unwrap()
        );

        let config = store.get_instance_config(id).unwrap().unwrap();
        assert_eq!(config.status, WorkflowStatus::Computed);
        assert_eq!(config.deployment["interval"], 60);

        let history = store.list_history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from, Some(WorkflowStatus::AwaitingComputation));
        assert_eq!(history[1].to, WorkflowStatus::Computed);
    }

    #[test]
    fn test_forced_and_retry_flags() {
        let (_temp, store) = create_test_store();
        let id = seeded_config(&store);

        let mut forced = step(id, WorkflowStatus::AwaitingComputation, WorkflowStatus::Active);
        forced.forced = true;
        forced.actor = Some(Uuid::new_v4());
        assert!(store.transition(&forced).unwrap());

        let mut retry = step(id, WorkflowStatus::Active, WorkflowStatus::DeprovisionInProgress);
        retry.bump_attempts = true;
        assert!(store.transition(&retry).unwrap());

        let config = store.get_instance_config(id).unwrap().unwrap();
        assert!(config.forced);
        assert_eq!(config.attempts, 1);
        assert!(store.list_history(id).unwrap()[1].forced);
    }

    #[test]
    fn test_summary_and_next_step() {
        let (_temp, store) = create_test_store();
        let id = seeded_config(&store);

        store.set_next_step(id, Some(NextStep::Deprovision)).unwrap();
        let config = store.get_instance_config(id).unwrap().unwrap();
        assert_eq!(config.next, Some(NextStep::Deprovision));
        assert!(config.monitoring_id.is_none());

        let summary = store.workflow_summary().unwrap();
        assert_eq!(summary, vec![(WorkflowStatus::AwaitingComputation, 1)]);
        assert_eq!(
            store
                .list_instance_configs(Some(WorkflowStatus::AwaitingComputation))
                .unwrap()
                .len(),
            1
        );
    }
}
