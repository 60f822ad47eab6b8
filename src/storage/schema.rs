//! Database schema definitions.
//!
//! One append-only table, `logs`. Migrations are idempotent. Two earlier
//! layouts are upgraded:
//!
//! - revision one: `id, host, created_at timestamp`, no node details;
//! - revision two: adds `arch NOT NULL` and a misspelled
//!   `kernal_version NOT NULL`.
//!
//! Upgrades never drop rows with a valid host. The planners below are pure
//! functions of the existing columns; the backends read the columns and run
//! the statements in one transaction.

/// Name of the heartbeat table.
pub const LOGS_TABLE: &str = "logs";

/// Optional columns added after the first revision, with their column types.
pub const OPTIONAL_COLUMNS: &[(&str, &str)] =
    &[("arch", "VARCHAR(64)"), ("kernel_version", "VARCHAR(255)")];

/// PostgreSQL `logs` table.
///
/// `created_at` defaults to the server clock so callers can never supply it.
pub const PG_LOGS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id             BIGSERIAL PRIMARY KEY,
    host           VARCHAR(255) NOT NULL CHECK (host <> ''),
    arch           VARCHAR(64),
    kernel_version VARCHAR(255),
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// PostgreSQL index backing host-scoped, newest-first reads.
pub const PG_LOGS_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS logs_host_created_at_idx ON logs (host, created_at DESC)";

/// SQLite `logs` table.
///
/// Timestamps are UTC text with millisecond precision (`YYYY-MM-DD HH:MM:SS.SSS`),
/// which sorts lexicographically in time order.
pub const SQLITE_LOGS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    host           VARCHAR(255) NOT NULL CHECK (host <> ''),
    arch           VARCHAR(64),
    kernel_version VARCHAR(255),
    created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
)
"#;

/// SQLite index backing host-scoped, newest-first reads.
pub const SQLITE_LOGS_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS logs_host_created_at_idx ON logs (host, created_at DESC)";

/// Misspelled kernel column of revision two.
pub const LEGACY_KERNEL_COLUMN: &str = "kernal_version";

/// Table the SQLite rebuild moves the old rows into.
const SQLITE_LEGACY_TABLE: &str = "logs_legacy";

const PG_NAIVE_TIMESTAMP: &str = "timestamp without time zone";

/// A column of an existing `logs` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

fn find<'a>(columns: &'a [ColumnInfo], name: &str) -> Option<&'a ColumnInfo> {
    columns.iter().find(|c| c.name == name)
}

/// Build the `ALTER TABLE` statement that adds a missing optional column.
pub fn add_column_ddl(column: &str, column_type: &str) -> String {
    format!("ALTER TABLE {LOGS_TABLE} ADD COLUMN {column} {column_type}")
}

/// Whether node details were mandatory, i.e. the table is revision two.
fn has_mandatory_details(columns: &[ColumnInfo]) -> bool {
    find(columns, LEGACY_KERNEL_COLUMN).is_some()
        || OPTIONAL_COLUMNS
            .iter()
            .any(|(name, _)| find(columns, name).is_some_and(|c| !c.nullable))
}

/// Statements bringing a PostgreSQL `logs` table to the current layout.
///
/// Empty when the table is already current.
pub fn pg_upgrade_statements(columns: &[ColumnInfo]) -> Vec<String> {
    let mut stmts = Vec::new();
    let legacy_kernel = find(columns, LEGACY_KERNEL_COLUMN);

    // Afterwards `kernel_version` carries the legacy column's nullability.
    let kernel = match (legacy_kernel, find(columns, "kernel_version")) {
        (Some(_), Some(current)) => {
            stmts.push(format!(
                "UPDATE {LOGS_TABLE} SET kernel_version = {LEGACY_KERNEL_COLUMN} \
                 WHERE kernel_version IS NULL"
            ));
            stmts.push(format!(
                "ALTER TABLE {LOGS_TABLE} DROP COLUMN {LEGACY_KERNEL_COLUMN}"
            ));
            Some(current)
        }
        (Some(legacy), None) => {
            stmts.push(format!(
                "ALTER TABLE {LOGS_TABLE} RENAME COLUMN {LEGACY_KERNEL_COLUMN} TO kernel_version"
            ));
            Some(legacy)
        }
        (None, current) => current,
    };

    for (column, column_type) in OPTIONAL_COLUMNS {
        let existing = if *column == "kernel_version" {
            kernel
        } else {
            find(columns, column)
        };
        match existing {
            None => stmts.push(format!(
                "ALTER TABLE {LOGS_TABLE} ADD COLUMN IF NOT EXISTS {column} {column_type}"
            )),
            Some(c) if !c.nullable => {
                stmts.push(format!(
                    "ALTER TABLE {LOGS_TABLE} ALTER COLUMN {column} TYPE {column_type}"
                ));
                stmts.push(format!(
                    "ALTER TABLE {LOGS_TABLE} ALTER COLUMN {column} DROP NOT NULL"
                ));
            }
            Some(_) => {}
        }
    }

    // Revision two wrote empty strings for unknown details.
    if has_mandatory_details(columns) {
        stmts.push(format!(
            "UPDATE {LOGS_TABLE} SET arch = NULLIF(arch, ''), \
             kernel_version = NULLIF(kernel_version, '') \
             WHERE arch = '' OR kernel_version = ''"
        ));
    }

    if find(columns, "created_at").is_some_and(|c| c.data_type == PG_NAIVE_TIMESTAMP) {
        stmts.push(format!(
            "ALTER TABLE {LOGS_TABLE} ALTER COLUMN created_at TYPE TIMESTAMPTZ \
             USING created_at AT TIME ZONE 'UTC'"
        ));
        stmts.push(format!(
            "ALTER TABLE {LOGS_TABLE} ALTER COLUMN created_at SET DEFAULT now()"
        ));
    }

    stmts
}

/// Whether a SQLite `logs` table must be rebuilt.
///
/// SQLite cannot drop NOT NULL or merge columns in place, so revision two is
/// copied into a fresh table. Missing columns alone are handled by
/// [`add_column_ddl`].
pub fn sqlite_needs_rebuild(columns: &[ColumnInfo]) -> bool {
    has_mandatory_details(columns)
}

/// Statements rebuilding a SQLite `logs` table in the current layout.
///
/// Ids and timestamps are kept; empty details become NULL and timestamps are
/// normalised to the millisecond text format. Rows with an empty host cannot
/// satisfy the new CHECK and are left behind.
pub fn sqlite_rebuild_statements(columns: &[ColumnInfo]) -> Vec<String> {
    let has = |name: &str| find(columns, name).is_some();

    let arch = if has("arch") {
        "NULLIF(arch, '')".to_string()
    } else {
        "NULL".to_string()
    };
    let kernel = match (has("kernel_version"), has(LEGACY_KERNEL_COLUMN)) {
        (true, true) => format!("NULLIF(COALESCE(kernel_version, {LEGACY_KERNEL_COLUMN}), '')"),
        (true, false) => "NULLIF(kernel_version, '')".to_string(),
        (false, true) => format!("NULLIF({LEGACY_KERNEL_COLUMN}, '')"),
        (false, false) => "NULL".to_string(),
    };
    let created_at = "COALESCE(\
         strftime('%Y-%m-%d %H:%M:%f', created_at), \
         strftime('%Y-%m-%d %H:%M:%f', substr(created_at, 1, 19)), \
         strftime('%Y-%m-%d %H:%M:%f', 'now'))";

    vec![
        format!("ALTER TABLE {LOGS_TABLE} RENAME TO {SQLITE_LEGACY_TABLE}"),
        SQLITE_LOGS_TABLE_DDL.to_string(),
        format!(
            "INSERT INTO {LOGS_TABLE} (id, host, arch, kernel_version, created_at) \
             SELECT id, host, {arch}, {kernel}, {created_at} \
             FROM {SQLITE_LEGACY_TABLE} WHERE host <> ''"
        ),
        format!("DROP TABLE {SQLITE_LEGACY_TABLE}"),
    ]
}
