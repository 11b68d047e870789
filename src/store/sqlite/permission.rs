use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::{
    SqliteStore, constraint_error, datetime_at, format_datetime, opt_id, opt_uuid_at, parsed_at,
    uuid_at,
};
use crate::error::{Error, Result};
use crate::store::PermissionStore;
use crate::types::*;

const ACTION_SELECT: &str = "SELECT a.id, a.name, a.section_id, s.name, s.category \
     FROM soma_actions a JOIN soma_sections s ON s.id = a.section_id";

const MAP_SELECT: &str = "SELECT m.id, m.permission_id, p.category, m.section_id, s.name, \
     m.action_id, a.name \
     FROM soma_permission_maps m \
     JOIN soma_permissions p ON p.id = m.permission_id \
     JOIN soma_sections s ON s.id = m.section_id \
     LEFT JOIN soma_actions a ON a.id = m.action_id";

const GRANT_COLUMNS: &str = "id, recipient_type, recipient_id, permission_id, category, \
     object_type, object_id, created_at, created_by";

fn row_to_section(row: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        category: row.get(2)?,
    })
}

fn row_to_action(row: &Row<'_>) -> rusqlite::Result<SectionAction> {
    Ok(SectionAction {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        section_id: uuid_at(row, 2)?,
        section_name: row.get(3)?,
        category: row.get(4)?,
    })
}

fn row_to_permission(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        category: row.get(2)?,
    })
}

fn row_to_map(row: &Row<'_>) -> rusqlite::Result<PermissionMap> {
    Ok(PermissionMap {
        id: uuid_at(row, 0)?,
        permission_id: uuid_at(row, 1)?,
        category: row.get(2)?,
        section_id: uuid_at(row, 3)?,
        section_name: row.get(4)?,
        action_id: opt_uuid_at(row, 5)?,
        action_name: row.get(6)?,
    })
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<Grant> {
    Ok(Grant {
        id: uuid_at(row, 0)?,
        recipient_type: parsed_at(row, 1)?,
        recipient_id: uuid_at(row, 2)?,
        permission_id: uuid_at(row, 3)?,
        category: row.get(4)?,
        object_type: row.get(5)?,
        object_id: opt_uuid_at(row, 6)?,
        created_at: datetime_at(row, 7)?,
        created_by: opt_uuid_at(row, 8)?,
    })
}

impl SqliteStore {
    fn delete_by_id(&self, table: &str, id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            &format!("DELETE FROM {table} WHERE id = ?1"),
            params![id.to_string()],
        )?;
        Ok(rows > 0)
    }
}

impl PermissionStore for SqliteStore {
    // Categories

    fn create_category(&self, category: &Category) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_categories (name, created_at) VALUES (?1, ?2)",
                params![category.name, format_datetime(&category.created_at)],
            )
            .map_err(|e| constraint_error(e, "category"))?;
        Ok(())
    }

    fn get_category(&self, name: &str) -> Result<Option<Category>> {
        self.conn()
            .query_row(
                "SELECT name, created_at FROM soma_categories WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Category {
                        name: row.get(0)?,
                        created_at: datetime_at(row, 1)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name, created_at FROM soma_categories ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                name: row.get(0)?,
                created_at: datetime_at(row, 1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_category(&self, name: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM soma_categories WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }

    // Sections

    fn create_section(&self, section: &Section) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_sections (id, name, category) VALUES (?1, ?2, ?3)",
                params![section.id.to_string(), section.name, section.category],
            )
            .map_err(|e| constraint_error(e, "section"))?;
        Ok(())
    }

    fn get_section(&self, id: Uuid) -> Result<Option<Section>> {
        self.conn()
            .query_row(
                "SELECT id, name, category FROM soma_sections WHERE id = ?1",
                params![id.to_string()],
                row_to_section,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_section_by_name(&self, name: &str) -> Result<Option<Section>> {
        self.conn()
            .query_row(
                "SELECT id, name, category FROM soma_sections WHERE name = ?1",
                params![name],
                row_to_section,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_sections(&self, category: Option<&str>) -> Result<Vec<Section>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, category FROM soma_sections
             WHERE (?1 IS NULL OR category = ?1) ORDER BY category, name",
        )?;
        let rows = stmt.query_map(params![category], row_to_section)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_section(&self, id: Uuid) -> Result<bool> {
        self.delete_by_id("soma_sections", id)
    }

    // Actions

    fn create_action(&self, action: &SectionAction) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_actions (id, name, section_id) VALUES (?1, ?2, ?3)",
                params![action.id.to_string(), action.name, action.section_id.to_string()],
            )
            .map_err(|e| constraint_error(e, "action"))?;
        Ok(())
    }

    fn get_action(&self, id: Uuid) -> Result<Option<SectionAction>> {
        self.conn()
            .query_row(
                &format!("{ACTION_SELECT} WHERE a.id = ?1"),
                params![id.to_string()],
                row_to_action,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_actions(&self, section_id: Option<Uuid>) -> Result<Vec<SectionAction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{ACTION_SELECT} WHERE (?1 IS NULL OR a.section_id = ?1) ORDER BY s.name, a.name"
        ))?;
        let rows = stmt.query_map(params![opt_id(section_id)], row_to_action)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_action(&self, id: Uuid) -> Result<bool> {
        self.delete_by_id("soma_actions", id)
    }

    // Permissions

    fn create_permission(&self, permission: &Permission) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_permissions (id, name, category) VALUES (?1, ?2, ?3)",
                params![permission.id.to_string(), permission.name, permission.category],
            )
            .map_err(|e| constraint_error(e, "permission"))?;
        Ok(())
    }

    fn get_permission(&self, id: Uuid) -> Result<Option<Permission>> {
        self.conn()
            .query_row(
                "SELECT id, name, category FROM soma_permissions WHERE id = ?1",
                params![id.to_string()],
                row_to_permission,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_permission_by_name(&self, category: &str, name: &str) -> Result<Option<Permission>> {
        self.conn()
            .query_row(
                "SELECT id, name, category FROM soma_permissions WHERE category = ?1 AND name = ?2",
                params![category, name],
                row_to_permission,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_permissions(&self, category: Option<&str>) -> Result<Vec<Permission>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, category FROM soma_permissions
             WHERE (?1 IS NULL OR category = ?1) ORDER BY category, name",
        )?;
        let rows = stmt.query_map(params![category], row_to_permission)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_permission(&self, id: Uuid) -> Result<bool> {
        self.delete_by_id("soma_permissions", id)
    }

    // Permission maps

    fn create_permission_map(&self, map: &PermissionMap) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_permission_maps (id, permission_id, section_id, action_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    map.id.to_string(),
                    map.permission_id.to_string(),
                    map.section_id.to_string(),
                    opt_id(map.action_id),
                ],
            )
            .map_err(|e| constraint_error(e, "permission mapping"))?;
        Ok(())
    }

    fn list_permission_maps(&self, permission_id: Uuid) -> Result<Vec<PermissionMap>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{MAP_SELECT} WHERE m.permission_id = ?1 ORDER BY s.name"
        ))?;
        let rows = stmt.query_map(params![permission_id.to_string()], row_to_map)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_permission_map(&self, id: Uuid) -> Result<bool> {
        self.delete_by_id("soma_permission_maps", id)
    }

    // Grants

    fn create_grant(&self, grant: &Grant) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO soma_grants (id, recipient_type, recipient_id, permission_id, category,
                 object_type, object_id, created_at, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    grant.id.to_string(),
                    grant.recipient_type.as_str(),
                    grant.recipient_id.to_string(),
                    grant.permission_id.to_string(),
                    grant.category,
                    grant.object_type,
                    opt_id(grant.object_id),
                    format_datetime(&grant.created_at),
                    opt_id(grant.created_by),
                ],
            )
            .map_err(|e| constraint_error(e, "grant"))?;
        Ok(())
    }

    fn get_grant(&self, id: Uuid) -> Result<Option<Grant>> {
        self.conn()
            .query_row(
                &format!("SELECT {GRANT_COLUMNS} FROM soma_grants WHERE id = ?1"),
                params![id.to_string()],
                row_to_grant,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_grants(&self) -> Result<Vec<Grant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GRANT_COLUMNS} FROM soma_grants ORDER BY category, created_at"
        ))?;
        let rows = stmt.query_map([], row_to_grant)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_grants_for(
        &self,
        user_id: Uuid,
        team_id: Uuid,
        is_admin: bool,
    ) -> Result<Vec<Grant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GRANT_COLUMNS} FROM soma_grants
             WHERE (recipient_type = 'user' AND recipient_id = ?1)
                OR (recipient_type = 'team' AND recipient_id = ?2)
                OR (?3 AND recipient_type = 'admin' AND recipient_id = ?1)"
        ))?;
        let rows = stmt.query_map(
            params![user_id.to_string(), team_id.to_string(), is_admin],
            row_to_grant,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_grant(&self, id: Uuid) -> Result<bool> {
        self.delete_by_id("soma_grants", id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::sqlite::tests::create_test_store;

    fn category(store: &SqliteStore, name: &str) {
        store
            .create_category(&Category {
                name: name.into(),
                created_at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn test_map_resolves_names() {
        let (_temp, store) = create_test_store();
        category(&store, "repository");

        let section = Section {
            id: Uuid::new_v4(),
            name: "bucket".into(),
            category: "repository".into(),
        };
        store.create_section(&section).unwrap();
        let action = SectionAction {
            id: Uuid::new_v4(),
            name: "add".into(),
            section_id: section.id,
            section_name: String::new(),
            category: String::new(),
        };
        store.create_action(&action).unwrap();
        let permission = Permission {
            id: Uuid::new_v4(),
            name: "bucket-admin".into(),
            category: "repository".into(),
        };
        store.create_permission(&permission).unwrap();
        store
            .create_permission_map(&PermissionMap {
                id: Uuid::new_v4(),
                permission_id: permission.id,
                category: String::new(),
                section_id: section.id,
                section_name: String::new(),
                action_id: Some(action.id),
                action_name: None,
            })
            .unwrap();

        let maps = store.list_permission_maps(permission.id).unwrap();
        assert_eq!(maps.len(), 1);
        assert!(maps[0].covers("bucket", "add"));
        assert!(!maps[0].covers("bucket", "remove"));
        assert_eq!(maps[0].category, "repository");

        let fetched = store.get_action(action.id).unwrap().unwrap();
        assert_eq!(fetched.section_name, "bucket");
    }

    #[test]
    fn test_category_removal_cascades() {
        let (_temp, store) = create_test_store();
        category(&store, "monitoring");

        let permission = Permission {
            id: Uuid::new_v4(),
            name: "deploy".into(),
            category: "monitoring".into(),
        };
        store.create_permission(&permission).unwrap();
        let grant = Grant {
            id: Uuid::new_v4(),
            recipient_type: RecipientType::Team,
            recipient_id: Uuid::new_v4(),
            permission_id: permission.id,
            category: "monitoring".into(),
            object_type: Some("monitoring".into()),
            object_id: Some(Uuid::new_v4()),
            created_at: Utc::now(),
            created_by: None,
        };
        store.create_grant(&grant).unwrap();

        assert!(store.delete_category("monitoring").unwrap());
        assert!(store.get_permission(permission.id).unwrap().is_none());
        assert!(store.get_grant(grant.id).unwrap().is_none());
    }

    #[test]
    fn test_grants_for_subject() {
        let (_temp, store) = create_test_store();
        category(&store, "global");
        let permission = Permission {
            id: Uuid::new_v4(),
            name: "reader".into(),
            category: "global".into(),
        };
        store.create_permission(&permission).unwrap();

        let user = Uuid::new_v4();
        let team = Uuid::new_v4();
        let grant = |recipient_type, recipient_id| Grant {
            id: Uuid::new_v4(),
            recipient_type,
            recipient_id,
            permission_id: permission.id,
            category: "global".into(),
            object_type: None,
            object_id: None,
            created_at: Utc::now(),
            created_by: None,
        };
        store.create_grant(&grant(RecipientType::User, user)).unwrap();
        store.create_grant(&grant(RecipientType::Team, team)).unwrap();
        store.create_grant(&grant(RecipientType::Admin, user)).unwrap();
        store
            .create_grant(&grant(RecipientType::User, Uuid::new_v4()))
            .unwrap();

        assert_eq!(store.list_grants_for(user, team, false).unwrap().len(), 2);
        assert_eq!(store.list_grants_for(user, team, true).unwrap().len(), 3);
    }
}
