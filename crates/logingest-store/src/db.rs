use rusqlite::{Connection, Result};

/// Create the `logs` table and its indexes. Safe to call on every startup.
///
/// Required text columns reject empty strings and `raw_data` must be valid
/// JSON, so one malformed row aborts the enclosing transaction.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_logs_table(conn)?;
    create_logs_indexes(conn)?;
    Ok(())
}

fn create_logs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS logs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            source      TEXT NOT NULL CHECK (length(source) > 0),
            product     TEXT NOT NULL CHECK (length(product) > 0),
            event_type  TEXT NOT NULL CHECK (length(event_type) > 0),
            severity    TEXT NOT NULL CHECK (length(severity) > 0),
            timestamp   TEXT NOT NULL,
            raw_data    TEXT NOT NULL CHECK (json_valid(raw_data)),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )
}

fn create_logs_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_logs_source     ON logs(source);
         CREATE INDEX IF NOT EXISTS idx_logs_timestamp  ON logs(timestamp);
         CREATE INDEX IF NOT EXISTS idx_logs_event_type ON logs(event_type);
         CREATE INDEX IF NOT EXISTS idx_logs_product    ON logs(product);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let indexes: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'logs'
                 AND name LIKE 'idx_logs_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 4);
    }

    #[test]
    fn rejects_invalid_raw_data() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO logs (source, product, event_type, severity, timestamp, raw_data)
             VALUES ('s', 'p', 'e', 'info', '2026-01-01T00:00:00Z', 'not json')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn created_at_is_filled_in() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO logs (source, product, event_type, severity, timestamp, raw_data)
             VALUES ('s', 'p', 'e', 'info', '2026-01-01T00:00:00Z', '{}')",
            [],
        )
        .unwrap();
        let created: String = conn
            .query_row("SELECT created_at FROM logs", [], |row| row.get(0))
            .unwrap();
        assert!(created.ends_with('Z'));
    }
}
