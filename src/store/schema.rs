pub const SCHEMA: &str = r#"
-- Inventory: people, duty rotations and hardware

CREATE TABLE IF NOT EXISTS inventory_teams (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    ldap_id TEXT,
    is_system INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS inventory_users (
    id TEXT PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    employee_number INTEGER,
    mail_address TEXT NOT NULL,
    team_id TEXT NOT NULL REFERENCES inventory_teams(id),
    is_active INTEGER NOT NULL DEFAULT 0,
    is_system INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS inventory_oncall (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    number TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS inventory_servers (
    id TEXT PRIMARY KEY,
    asset_id INTEGER NOT NULL UNIQUE,
    datacenter TEXT NOT NULL,
    location TEXT NOT NULL,
    name TEXT NOT NULL,
    is_online INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS inventory_nodes (
    id TEXT PRIMARY KEY,
    asset_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    team_id TEXT NOT NULL REFERENCES inventory_teams(id),
    server_id TEXT REFERENCES inventory_servers(id),
    is_online INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Global catalogues

CREATE TABLE IF NOT EXISTS soma_lookups (
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (kind, name)
);

CREATE TABLE IF NOT EXISTS soma_units (
    unit TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS soma_providers (
    name TEXT PRIMARY KEY,
    prefix TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS soma_metrics (
    path TEXT PRIMARY KEY,
    unit TEXT NOT NULL REFERENCES soma_units(unit),
    description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS soma_levels (
    name TEXT PRIMARY KEY,
    short_name TEXT NOT NULL UNIQUE,
    numeric INTEGER NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS soma_attributes (
    name TEXT PRIMARY KEY,
    cardinality TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS soma_validity (
    system_property TEXT NOT NULL,
    entity TEXT NOT NULL,
    direct INTEGER NOT NULL,
    inherited INTEGER NOT NULL,
    PRIMARY KEY (system_property, entity)
);

CREATE TABLE IF NOT EXISTS soma_monitoring_systems (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    mode TEXT NOT NULL,
    contact_id TEXT NOT NULL REFERENCES inventory_users(id),
    team_id TEXT NOT NULL REFERENCES inventory_teams(id),
    callback TEXT
);

CREATE TABLE IF NOT EXISTS soma_capabilities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    monitoring_id TEXT NOT NULL REFERENCES soma_monitoring_systems(id) ON DELETE CASCADE,
    metric TEXT NOT NULL REFERENCES soma_metrics(path),
    view TEXT NOT NULL,
    thresholds INTEGER NOT NULL,
    UNIQUE (monitoring_id, metric, view)
);

-- Configuration trees

CREATE TABLE IF NOT EXISTS soma_repositories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    team_id TEXT NOT NULL REFERENCES inventory_teams(id),
    is_active INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    rollback_level TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS soma_custom_properties (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL REFERENCES soma_repositories(id),
    name TEXT NOT NULL,
    UNIQUE (repository_id, name)
);

CREATE TABLE IF NOT EXISTS soma_tree_objects (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    repository_id TEXT NOT NULL REFERENCES soma_repositories(id),
    bucket_id TEXT,
    parent_id TEXT,
    object_type TEXT NOT NULL,
    name TEXT NOT NULL,
    team_id TEXT NOT NULL,
    state TEXT NOT NULL,
    environment TEXT
);

CREATE TABLE IF NOT EXISTS soma_properties (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id TEXT NOT NULL UNIQUE,
    source_instance_id TEXT NOT NULL,
    repository_id TEXT NOT NULL,
    object_id TEXT NOT NULL,
    inherited INTEGER NOT NULL,
    property_type TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS soma_checks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    config_id TEXT NOT NULL,
    repository_id TEXT NOT NULL,
    object_id TEXT NOT NULL,
    inherited INTEGER NOT NULL,
    name TEXT NOT NULL,
    payload TEXT NOT NULL,
    UNIQUE (config_id, object_id)
);

CREATE TABLE IF NOT EXISTS soma_check_instances (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL,
    config_id TEXT NOT NULL,
    object_id TEXT NOT NULL,
    capability_id TEXT NOT NULL,
    current_config_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    hash TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL
);

-- Workflow

CREATE TABLE IF NOT EXISTS soma_instance_configs (
    id TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL REFERENCES soma_check_instances(id),
    version INTEGER NOT NULL,
    config_id TEXT NOT NULL,
    repository_id TEXT NOT NULL,
    capability_id TEXT NOT NULL,
    status TEXT NOT NULL,
    next_step TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    forced INTEGER NOT NULL DEFAULT 0,
    deployment TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (instance_id, version)
);

CREATE TABLE IF NOT EXISTS soma_workflow_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_config_id TEXT NOT NULL REFERENCES soma_instance_configs(id),
    from_status TEXT,
    to_status TEXT NOT NULL,
    forced INTEGER NOT NULL DEFAULT 0,
    actor TEXT,
    at TEXT NOT NULL
);

-- Jobs

CREATE TABLE IF NOT EXISTS soma_jobs (
    serial INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT NOT NULL,
    error TEXT,
    repository_id TEXT,
    user_id TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);

-- Permission model

CREATE TABLE IF NOT EXISTS soma_categories (
    name TEXT PRIMARY KEY,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS soma_sections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL REFERENCES soma_categories(name) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS soma_actions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    section_id TEXT NOT NULL REFERENCES soma_sections(id) ON DELETE CASCADE,
    UNIQUE (section_id, name)
);

CREATE TABLE IF NOT EXISTS soma_permissions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    category TEXT NOT NULL REFERENCES soma_categories(name) ON DELETE CASCADE,
    UNIQUE (category, name)
);

CREATE TABLE IF NOT EXISTS soma_permission_maps (
    id TEXT PRIMARY KEY,
    permission_id TEXT NOT NULL REFERENCES soma_permissions(id) ON DELETE CASCADE,
    section_id TEXT NOT NULL REFERENCES soma_sections(id) ON DELETE CASCADE,
    action_id TEXT REFERENCES soma_actions(id) ON DELETE CASCADE,
    UNIQUE (permission_id, section_id, action_id)
);

CREATE TABLE IF NOT EXISTS soma_grants (
    id TEXT PRIMARY KEY,
    recipient_type TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    permission_id TEXT NOT NULL REFERENCES soma_permissions(id) ON DELETE CASCADE,
    category TEXT NOT NULL REFERENCES soma_categories(name) ON DELETE CASCADE,
    object_type TEXT,
    object_id TEXT,
    created_at TEXT NOT NULL,
    created_by TEXT
);

-- Authentication

CREATE TABLE IF NOT EXISTS auth_credentials (
    user_id TEXT PRIMARY KEY REFERENCES inventory_users(id),
    password_hash TEXT NOT NULL,
    valid_from TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS auth_tokens (
    tag TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES inventory_users(id),
    salt TEXT NOT NULL,
    valid_from TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS auth_activations (
    user_id TEXT PRIMARY KEY REFERENCES inventory_users(id),
    token_hash TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_users_team ON inventory_users(team_id);
CREATE INDEX IF NOT EXISTS idx_nodes_team ON inventory_nodes(team_id);
CREATE INDEX IF NOT EXISTS idx_tree_objects_repository ON soma_tree_objects(repository_id);
CREATE INDEX IF NOT EXISTS idx_properties_object ON soma_properties(object_id);
CREATE INDEX IF NOT EXISTS idx_properties_repository ON soma_properties(repository_id);
CREATE INDEX IF NOT EXISTS idx_checks_repository ON soma_checks(repository_id);
CREATE INDEX IF NOT EXISTS idx_instances_repository ON soma_check_instances(repository_id);
CREATE INDEX IF NOT EXISTS idx_instance_configs_instance ON soma_instance_configs(instance_id);
CREATE INDEX IF NOT EXISTS idx_instance_configs_status ON soma_instance_configs(status);
CREATE INDEX IF NOT EXISTS idx_history_config ON soma_workflow_history(instance_config_id);
CREATE INDEX IF NOT EXISTS idx_jobs_user ON soma_jobs(user_id);
CREATE INDEX IF NOT EXISTS idx_grants_recipient ON soma_grants(recipient_type, recipient_id);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON auth_tokens(user_id);
"#;
