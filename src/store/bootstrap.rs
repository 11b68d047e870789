use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{AuthStore, CatalogStore, InventoryStore, PermissionStore, Store};
use crate::error::{Error, Result};
use crate::types::*;

pub const ROOT_UID: &str = "root";
pub const SYSTEM_TEAM: &str = "system";

const DEFAULT_LEVELS: &[(&str, &str, u16)] =
    &[("ok", "ok", 0), ("warning", "warn", 1), ("critical", "crit", 2)];

pub fn is_bootstrapped(store: &dyn Store) -> Result<bool> {
    Ok(store.get_user_by_uid(ROOT_UID)?.is_some())
}

/// Creates a category together with its `:grant` sibling and the system
/// permission named after it.
pub fn add_category(store: &dyn Store, name: &str) -> Result<()> {
    if is_grant_category(name) {
        return Err(Error::validation(format!(
            "category names may not end in {GRANT_SUFFIX}"
        )));
    }

    let now = Utc::now();
    store.create_category(&Category {
        name: name.to_string(),
        created_at: now,
    })?;
    if name != SELF_CATEGORY {
        store.create_category(&Category {
            name: grant_category(name),
            created_at: now,
        })?;
    }
    if store.get_category(SYSTEM_CATEGORY)?.is_some() {
        store.create_permission(&Permission {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category: SYSTEM_CATEGORY.to_string(),
        })?;
    }
    Ok(())
}

/// Initializes an empty installation: system team, root account, default
/// catalogues and the built-in permission model. Returns the root user id.
pub fn bootstrap(
    store: &dyn Store,
    root_credential: impl FnOnce(Uuid) -> Result<Credential>,
) -> Result<Uuid> {
    if is_bootstrapped(store)? {
        return Err(Error::conflict("installation is already bootstrapped"));
    }

    let team = Team {
        id: Uuid::new_v4(),
        name: SYSTEM_TEAM.to_string(),
        ldap_id: None,
        is_system: true,
    };
    store.create_team(&team)?;

    let root = User {
        id: Uuid::new_v4(),
        uid: ROOT_UID.to_string(),
        first_name: "Charlie".into(),
        last_name: "Root".into(),
        employee_number: None,
        mail_address: "root@localhost".into(),
        team_id: team.id,
        is_active: true,
        is_system: true,
        is_deleted: false,
        is_admin: true,
        created_at: Utc::now(),
    };
    store.create_user(&root)?;
    store.set_credential(&root_credential(root.id)?)?;

    for kind in LookupKind::ALL {
        for name in kind.defaults() {
            store.add_lookup(kind, name)?;
        }
    }
    for (name, short_name, numeric) in DEFAULT_LEVELS {
        store.create_level(&Level {
            name: (*name).to_string(),
            short_name: (*short_name).to_string(),
            numeric: *numeric,
        })?;
    }

    // The system category must exist before the permissions filed into it.
    add_category(store, SYSTEM_CATEGORY)?;
    for category in BUILTIN_CATEGORIES.iter().filter(|c| **c != SYSTEM_CATEGORY) {
        add_category(store, category)?;
    }

    for (category, section_name, actions) in BUILTIN_SECTIONS {
        let section = Section {
            id: Uuid::new_v4(),
            name: (*section_name).to_string(),
            category: (*category).to_string(),
        };
        store.create_section(&section)?;
        for action in *actions {
            store.create_action(&SectionAction {
                id: Uuid::new_v4(),
                name: (*action).to_string(),
                section_id: section.id,
                section_name: section.name.clone(),
                category: section.category.clone(),
            })?;
        }
    }

    let omnipotence = Permission {
        id: Uuid::new_v4(),
        name: OMNIPOTENCE.to_string(),
        category: SYSTEM_CATEGORY.to_string(),
    };
    store.create_permission(&omnipotence)?;
    store.create_grant(&Grant {
        id: Uuid::new_v4(),
        recipient_type: RecipientType::User,
        recipient_id: root.id,
        permission_id: omnipotence.id,
        category: SYSTEM_CATEGORY.to_string(),
        object_type: None,
        object_id: None,
        created_at: Utc::now(),
        created_by: None,
    })?;

    info!(root = %root.id, "installation bootstrapped");
    Ok(root.id)
}
