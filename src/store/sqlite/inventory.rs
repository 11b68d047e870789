use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::{
    SqliteStore, constraint_error, datetime_at, format_datetime, opt_id, opt_uuid_at, uuid_at,
};
use crate::error::{Error, Result};
use crate::store::InventoryStore;
use crate::types::*;

const TEAM_COLUMNS: &str = "id, name, ldap_id, is_system";
const USER_COLUMNS: &str = "id, uid, first_name, last_name, employee_number, mail_address, \
     team_id, is_active, is_system, is_deleted, is_admin, created_at";
const SERVER_COLUMNS: &str = "id, asset_id, datacenter, location, name, is_online, is_deleted";
const NODE_COLUMNS: &str = "id, asset_id, name, team_id, server_id, is_online, is_deleted, created_at";

fn row_to_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        ldap_id: row.get(2)?,
        is_system: row.get(3)?,
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        uid: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        employee_number: row.get(4)?,
        mail_address: row.get(5)?,
        team_id: uuid_at(row, 6)?,
        is_active: row.get(7)?,
        is_system: row.get(8)?,
        is_deleted: row.get(9)?,
        is_admin: row.get(10)?,
        created_at: datetime_at(row, 11)?,
    })
}

fn row_to_oncall(row: &Row<'_>) -> rusqlite::Result<Oncall> {
    Ok(Oncall {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        number: row.get(2)?,
    })
}

fn row_to_server(row: &Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        id: uuid_at(row, 0)?,
        asset_id: row.get(1)?,
        datacenter: row.get(2)?,
        location: row.get(3)?,
        name: row.get(4)?,
        is_online: row.get(5)?,
        is_deleted: row.get(6)?,
    })
}

pub(super) fn row_to_node(row: &Row<'_>, offset: usize) -> rusqlite::Result<NodeRecord> {
    Ok(NodeRecord {
        id: uuid_at(row, offset)?,
        asset_id: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        team_id: uuid_at(row, offset + 3)?,
        server_id: opt_uuid_at(row, offset + 4)?,
        is_online: row.get(offset + 5)?,
        is_deleted: row.get(offset + 6)?,
        created_at: datetime_at(row, offset + 7)?,
    })
}

impl InventoryStore for SqliteStore {
    // Team operations

    fn create_team(&self, team: &Team) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO inventory_teams (id, name, ldap_id, is_system) VALUES (?1, ?2, ?3, ?4)",
                params![team.id.to_string(), team.name, team.ldap_id, team.is_system],
            )
            .map_err(|e| constraint_error(e, "team"))?;
        Ok(())
    }

    fn get_team(&self, id: Uuid) -> Result<Option<Team>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TEAM_COLUMNS} FROM inventory_teams WHERE id = ?1"),
            params![id.to_string()],
            row_to_team,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_team_by_name(&self, name: &str) -> Result<Option<Team>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TEAM_COLUMNS} FROM inventory_teams WHERE name = ?1"),
            params![name],
            row_to_team,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_teams(&self) -> Result<Vec<Team>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {TEAM_COLUMNS} FROM inventory_teams ORDER BY name"))?;
        let rows = stmt.query_map([], row_to_team)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_team(&self, team: &Team) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE inventory_teams SET name = ?2, ldap_id = ?3 WHERE id = ?1",
                params![team.id.to_string(), team.name, team.ldap_id],
            )
            .map_err(|e| constraint_error(e, "team"))?;
        Ok(())
    }

    fn delete_team(&self, id: Uuid) -> Result<bool> {
        let rows = self
            .conn()
            .execute(
                "DELETE FROM inventory_teams WHERE id = ?1 AND is_system = 0",
                params![id.to_string()],
            )
            .map_err(|e| constraint_error(e, "team"))?;
        Ok(rows > 0)
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO inventory_users (id, uid, first_name, last_name, employee_number,
                 mail_address, team_id, is_active, is_system, is_deleted, is_admin, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    user.id.to_string(),
                    user.uid,
                    user.first_name,
                    user.last_name,
                    user.employee_number,
                    user.mail_address,
                    user.team_id.to_string(),
                    user.is_active,
                    user.is_system,
                    user.is_deleted,
                    user.is_admin,
                    format_datetime(&user.created_at),
                ],
            )
            .map_err(|e| constraint_error(e, "user"))?;
        Ok(())
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM inventory_users WHERE id = ?1"),
            params![id.to_string()],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_uid(&self, uid: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM inventory_users WHERE uid = ?1"),
            params![uid],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM inventory_users WHERE is_deleted = 0 ORDER BY uid"
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE inventory_users SET first_name = ?2, last_name = ?3, employee_number = ?4,
                 mail_address = ?5, team_id = ?6, is_active = ?7, is_admin = ?8
                 WHERE id = ?1",
                params![
                    user.id.to_string(),
                    user.first_name,
                    user.last_name,
                    user.employee_number,
                    user.mail_address,
                    user.team_id.to_string(),
                    user.is_active,
                    user.is_admin,
                ],
            )
            .map_err(|e| constraint_error(e, "user"))?;
        Ok(())
    }

    /// Users are flagged deleted, never removed, so audit references stay
    /// valid.
    fn delete_user(&self, id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE inventory_users SET is_deleted = 1, is_active = 0
             WHERE id = ?1 AND is_system = 0 AND is_deleted = 0",
            params![id.to_string()],
        )?;
        Ok(rows > 0)
    }

    // Oncall operations

    fn create_oncall(&self, oncall: &Oncall) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO inventory_oncall (id, name, number) VALUES (?1, ?2, ?3)",
                params![oncall.id.to_string(), oncall.name, oncall.number],
            )
            .map_err(|e| constraint_error(e, "oncall duty"))?;
        Ok(())
    }

    fn get_oncall(&self, id: Uuid) -> Result<Option<Oncall>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, number FROM inventory_oncall WHERE id = ?1",
            params![id.to_string()],
            row_to_oncall,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_oncalls(&self) -> Result<Vec<Oncall>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, number FROM inventory_oncall ORDER BY name")?;
        let rows = stmt.query_map([], row_to_oncall)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_oncall(&self, oncall: &Oncall) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE inventory_oncall SET name = ?2, number = ?3 WHERE id = ?1",
                params![oncall.id.to_string(), oncall.name, oncall.number],
            )
            .map_err(|e| constraint_error(e, "oncall duty"))?;
        Ok(())
    }

    fn delete_oncall(&self, id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM inventory_oncall WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(rows > 0)
    }

    // Server operations

    fn create_server(&self, server: &Server) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO inventory_servers (id, asset_id, datacenter, location, name, is_online, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    server.id.to_string(),
                    server.asset_id,
                    server.datacenter,
                    server.location,
                    server.name,
                    server.is_online,
                    server.is_deleted,
                ],
            )
            .map_err(|e| constraint_error(e, "server"))?;
        Ok(())
    }

    fn get_server(&self, id: Uuid) -> Result<Option<Server>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SERVER_COLUMNS} FROM inventory_servers WHERE id = ?1"),
            params![id.to_string()],
            row_to_server,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_servers(&self) -> Result<Vec<Server>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SERVER_COLUMNS} FROM inventory_servers WHERE is_deleted = 0 ORDER BY name"
        ))?;
        let rows = stmt.query_map([], row_to_server)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_server(&self, server: &Server) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE inventory_servers SET datacenter = ?2, location = ?3, name = ?4, is_online = ?5
                 WHERE id = ?1",
                params![
                    server.id.to_string(),
                    server.datacenter,
                    server.location,
                    server.name,
                    server.is_online,
                ],
            )
            .map_err(|e| constraint_error(e, "server"))?;
        Ok(())
    }

    fn delete_server(&self, id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE inventory_servers SET is_deleted = 1, is_online = 0
             WHERE id = ?1 AND is_deleted = 0",
            params![id.to_string()],
        )?;
        Ok(rows > 0)
    }

    // Node operations

    fn create_node(&self, node: &NodeRecord) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO inventory_nodes (id, asset_id, name, team_id, server_id, is_online,
                 is_deleted, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    node.id.to_string(),
                    node.asset_id,
                    node.name,
                    node.team_id.to_string(),
                    opt_id(node.server_id),
                    node.is_online,
                    node.is_deleted,
                    format_datetime(&node.created_at),
                ],
            )
            .map_err(|e| constraint_error(e, "node"))?;
        Ok(())
    }

    fn get_node(&self, id: Uuid) -> Result<Option<NodeRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM inventory_nodes WHERE id = ?1"),
            params![id.to_string()],
            |row| row_to_node(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM inventory_nodes WHERE is_deleted = 0 ORDER BY name"
        ))?;
        let rows = stmt.query_map([], |row| row_to_node(row, 0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_node(&self, node: &NodeRecord) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE inventory_nodes SET name = ?2, team_id = ?3, server_id = ?4, is_online = ?5
                 WHERE id = ?1",
                params![
                    node.id.to_string(),
                    node.name,
                    node.team_id.to_string(),
                    opt_id(node.server_id),
                    node.is_online,
                ],
            )
            .map_err(|e| constraint_error(e, "node"))?;
        Ok(())
    }

    fn delete_node(&self, id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE inventory_nodes SET is_deleted = 1, is_online = 0
             WHERE id = ?1 AND is_deleted = 0",
            params![id.to_string()],
        )?;
        Ok(rows > 0)
    }
}
