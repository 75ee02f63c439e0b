use rusqlite::{params, Connection};
use crate::error::{Result, KbError};

/// Migration metadata
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Schema history, applied in version order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "knowledge_documents",
        sql: r#"
            CREATE TABLE IF NOT EXISTS knowledge_documents (
                document_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                tags_json TEXT NOT NULL DEFAULT '[]',
                chunks_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                content_preview TEXT NOT NULL,
                content_hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_knowledge_documents_created
                ON knowledge_documents(created_at DESC);
        "#,
    },
    Migration {
        version: 2,
        name: "vector_records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS vector_records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                vector_id TEXT NOT NULL UNIQUE,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                text TEXT NOT NULL,
                source_offset INTEGER NOT NULL,
                section TEXT,
                filename TEXT NOT NULL,
                tags_json TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_vector_records_document
                ON vector_records(document_id, chunk_index);
        "#,
    },
];

/// Create schema_migrations table if it doesn't exist
fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get list of applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(KbError::Database)?;
    Ok(names)
}

/// Apply every migration not yet recorded in schema_migrations.
///
/// Each migration runs in its own transaction together with its bookkeeping row.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    ensure_migrations_table(conn)?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::info!("Applying migration {:03}_{}", migration.version, migration.name);
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }

    Ok(())
}
