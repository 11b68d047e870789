use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

pub const GRANT_SUFFIX: &str = ":grant";
pub const OMNIPOTENCE: &str = "omnipotence";
pub const SYSTEM_CATEGORY: &str = "system";
pub const SELF_CATEGORY: &str = "self";

/// Categories every installation starts with. Each one except `self` and
/// `omnipotence` also gets a `:grant` sibling at bootstrap.
pub const BUILTIN_CATEGORIES: &[&str] = &[
    "global",
    "system",
    "permission",
    "operation",
    "identity",
    "self",
    "repository",
    "team",
    "monitoring",
];

/// Categories whose grants must name the object they are scoped to.
pub const SCOPED_CATEGORIES: &[&str] = &["repository", "team", "monitoring"];

/// Built-in sections and the actions they expose, grouped by category.
pub const BUILTIN_SECTIONS: &[(&str, &str, &[&str])] = &[
    ("global", "entity", &["list", "show", "add", "remove"]),
    ("global", "environment", &["list", "show", "add", "remove"]),
    ("global", "state", &["list", "show", "add", "remove"]),
    ("global", "predicate", &["list", "show", "add", "remove"]),
    ("global", "status", &["list", "show", "add", "remove"]),
    ("global", "mode", &["list", "show", "add", "remove"]),
    ("global", "datacenter", &["list", "show", "add", "remove"]),
    ("global", "view", &["list", "show", "add", "remove"]),
    ("global", "unit", &["list", "show", "add", "remove"]),
    ("global", "provider", &["list", "show", "add", "remove"]),
    ("global", "metric", &["list", "show", "add", "remove"]),
    ("global", "level", &["list", "show", "add", "remove"]),
    ("global", "attribute", &["list", "show", "add", "remove"]),
    ("global", "validity", &["list", "show", "add", "remove"]),
    ("global", "monitoringsystem", &["list", "show", "add", "remove"]),
    ("global", "capability", &["list", "show", "add", "remove"]),
    ("global", "repository-index", &["list"]),
    ("global", "node-index", &["list", "show"]),
    ("global", "instance", &["list", "show", "versions"]),
    (
        "permission",
        "category",
        &["list", "show", "add", "remove"],
    ),
    ("permission", "section", &["list", "show", "add", "remove"]),
    ("permission", "action", &["list", "show", "add", "remove"]),
    (
        "permission",
        "permission",
        &["list", "show", "add", "remove", "map", "unmap"],
    ),
    ("permission", "right", &["list", "grant", "revoke"]),
    (
        "identity",
        "team",
        &["list", "show", "add", "remove", "update"],
    ),
    (
        "identity",
        "user",
        &["list", "show", "add", "remove", "update", "activation"],
    ),
    (
        "identity",
        "oncall",
        &["list", "show", "add", "remove", "update"],
    ),
    (
        "identity",
        "server",
        &["list", "show", "add", "remove", "update"],
    ),
    ("operation", "workflow", &["summary", "list", "retry", "set"]),
    ("operation", "system", &["shutdown"]),
    ("operation", "job-admin", &["list", "show"]),
    ("self", "job", &["list", "show", "wait"]),
    ("self", "authenticate", &["logout", "password"]),
    ("team", "repository-lifecycle", &["add", "remove"]),
    ("team", "node", &["add", "update", "remove"]),
    (
        "repository",
        "repository",
        &["show", "rebuild", "repair", "freeze", "tree"],
    ),
    (
        "repository",
        "bucket",
        &["list", "show", "add", "remove", "tree"],
    ),
    (
        "repository",
        "group",
        &["list", "show", "add", "remove", "member", "tree"],
    ),
    (
        "repository",
        "cluster",
        &["list", "show", "add", "remove", "member", "tree"],
    ),
    (
        "repository",
        "node-config",
        &["list", "show", "assign", "unassign", "tree"],
    ),
    ("repository", "property", &["add", "update", "remove"]),
    (
        "repository",
        "check-config",
        &["list", "show", "add", "update", "remove"],
    ),
    ("monitoring", "deployment", &["poll", "claim", "result"]),
];

/// Returns the `:grant` sibling of a category.
#[must_use]
pub fn grant_category(category: &str) -> String {
    format!("{category}{GRANT_SUFFIX}")
}

#[must_use]
pub fn is_grant_category(category: &str) -> bool {
    category.ends_with(GRANT_SUFFIX)
}

/// Strips a `:grant` suffix if present.
#[must_use]
pub fn base_category(category: &str) -> &str {
    category.strip_suffix(GRANT_SUFFIX).unwrap_or(category)
}

#[must_use]
pub fn requires_scope(category: &str) -> bool {
    SCOPED_CATEGORIES.contains(&base_category(category))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub id: Uuid,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionAction {
    pub id: Uuid,
    pub name: String,
    pub section_id: Uuid,
    pub section_name: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub category: String,
}

/// Maps a permission onto a whole section, or onto one action of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionMap {
    pub id: Uuid,
    pub permission_id: Uuid,
    pub category: String,
    pub section_id: Uuid,
    pub section_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
}

impl PermissionMap {
    /// Returns true if this mapping covers `(section, action)`.
    #[must_use]
    pub fn covers(&self, section: &str, action: &str) -> bool {
        self.section_name == section
            && self
                .action_name
                .as_deref()
                .is_none_or(|mapped| mapped == action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    User,
    Admin,
    Team,
}

impl RecipientType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecipientType::User => "user",
            RecipientType::Admin => "admin",
            RecipientType::Team => "team",
        }
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(RecipientType::User),
            "admin" => Ok(RecipientType::Admin),
            "team" => Ok(RecipientType::Team),
            "tool" => Err(Error::validation(
                "recipient type tool is not implemented",
            )),
            other => Err(Error::validation(format!("unknown recipient type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grant {
    pub id: Uuid,
    pub recipient_type: RecipientType,
    pub recipient_id: Uuid,
    pub permission_id: Uuid,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
}

impl Grant {
    /// Returns true if the grant's scope object covers the request scope.
    #[must_use]
    pub fn matches_scope(&self, scope: &Scope) -> bool {
        let (Some(object_type), Some(object_id)) = (self.object_type.as_deref(), self.object_id)
        else {
            return false;
        };

        match scope {
            Scope::Unscoped => false,
            Scope::Repository {
                repository_id,
                bucket_id,
            } => match object_type {
                "repository" => object_id == *repository_id,
                "bucket" => Some(object_id) == *bucket_id,
                _ => false,
            },
            Scope::Team(team_id) => object_type == "team" && object_id == *team_id,
            Scope::Monitoring(monitoring_id) => {
                object_type == "monitoring" && object_id == *monitoring_id
            }
        }
    }
}

/// The object a request is performed against, used to match scoped grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Unscoped,
    Repository {
        repository_id: Uuid,
        bucket_id: Option<Uuid>,
    },
    Team(Uuid),
    Monitoring(Uuid),
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub user_id: Uuid,
    pub uid: String,
    pub team_id: Uuid,
    pub is_admin: bool,
}
