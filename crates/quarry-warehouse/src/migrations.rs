use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_response_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS response_cache (
    cache_key TEXT PRIMARY KEY,
    host TEXT NOT NULL,
    path TEXT NOT NULL,
    payload TEXT NOT NULL,
    stored_at_ms BIGINT NOT NULL,
    expires_at_ms BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_response_cache_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_response_cache_path ON response_cache(path);
CREATE INDEX IF NOT EXISTS idx_response_cache_expires ON response_cache(expires_at_ms);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
            tracing::debug!(version = migration.version, "applied warehouse migration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_applied_once() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        apply_migrations(&connection).expect("first run");
        apply_migrations(&connection).expect("second run");

        let applied: i64 = connection
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
