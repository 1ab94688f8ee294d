use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::schema;

const SCHEMA_VERSION_KEY: &str = "schema_version";

type Migration = fn(&Connection) -> Result<()>;

/// Ordered; entry `n` upgrades a database from version `n` to `n + 1`.
const MIGRATIONS: &[Migration] = &[schema::create_schema];

pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}

pub fn migrate(conn: &mut Connection) -> Result<()> {
    ensure_sync_state(conn)?;

    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        bail!("database schema version {current} is newer than supported version {latest}");
    }

    for (index, step) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let target = index as u32 + 1;
        let tx = conn
            .transaction()
            .with_context(|| format!("begin migration to v{target}"))?;
        step(&tx).with_context(|| format!("apply schema migration v{target}"))?;
        set_schema_version(&tx, target)?;
        tx.commit()
            .with_context(|| format!("commit migration to v{target}"))?;
    }

    Ok(())
}

fn ensure_sync_state(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .context("ensure sync_state table for migration tracking")
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_state WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("read schema version")?;

    raw.map_or(Ok(0), |version| {
        version
            .trim()
            .parse::<u32>()
            .with_context(|| format!("invalid schema version in database: {version}"))
    })
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sync_state (key, value, updated_at)
        VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![SCHEMA_VERSION_KEY, version.to_string()],
    )
    .with_context(|| format!("record schema version {version}"))?;
    Ok(())
}
