//! Schema bootstrap.
//!
//! Storage structures must exist before the first request. Initialization
//! runs once, synchronously, before any route group is mounted, and is safe
//! to repeat: every statement is `IF NOT EXISTS` and the whole set runs in
//! one transaction.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::error::StorageError;

/// Ensures persistent storage structures exist.
pub trait SchemaInitializer {
    /// Creates whatever is missing; a no-op when everything exists.
    fn ensure_schema(&self) -> Result<(), StorageError>;
}

/// One named DDL statement.
#[derive(Clone, Debug)]
pub struct Table {
    pub name: &'static str,
    pub ddl: &'static str,
}

/// Where the SQLite database lives.
#[derive(Clone, Debug)]
enum Location {
    File(PathBuf),
    // Shared-cache in-memory database, named so separate connections see it.
    Memory(String),
}

impl Location {
    fn describe(&self) -> String {
        match self {
            Self::File(p) => p.display().to_string(),
            Self::Memory(name) => format!("memory:{name}"),
        }
    }
}

/// SQLite-backed [`SchemaInitializer`].
#[derive(Clone, Debug)]
pub struct SqliteSchema {
    location: Location,
    tables: Vec<Table>,
}

impl SqliteSchema {
    pub fn new(path: impl AsRef<Path>, tables: Vec<Table>) -> Self {
        Self { location: Location::File(path.as_ref().to_path_buf()), tables }
    }

    /// A named in-memory database, alive while any connection to it is open.
    pub fn in_memory(name: &str, tables: Vec<Table>) -> Self {
        Self { location: Location::Memory(name.to_owned()), tables }
    }

    /// The Games Repository tables at `path`.
    pub fn games_repository(path: impl AsRef<Path>) -> Self {
        Self::new(path, GAMES_REPOSITORY.to_vec())
    }

    /// Opens a connection to the configured database.
    pub fn connect(&self) -> Result<Connection, StorageError> {
        let failed = |source: rusqlite::Error| StorageError::ConnectionFailed {
            location: self.location.describe(),
            source,
        };
        let conn = match &self.location {
            Location::File(path) => Connection::open(path),
            Location::Memory(name) => Connection::open_with_flags(
                format!("file:{name}?mode=memory&cache=shared"),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            ),
        }
        .map_err(failed)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(failed)?;
        Ok(conn)
    }

    /// Names of the tables currently present, sorted.
    pub fn tables(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.connect()?;
        list_tables(&conn).map_err(|source| StorageError::ConnectionFailed {
            location: self.location.describe(),
            source,
        })
    }
}

impl SchemaInitializer for SqliteSchema {
    fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(|source| StorageError::ConnectionFailed {
            location: self.location.describe(),
            source,
        })?;

        for table in &self.tables {
            tx.execute_batch(table.ddl).map_err(|source| StorageError::Statement {
                table: table.name.to_owned(),
                source,
            })?;
        }

        tx.commit().map_err(|source| StorageError::Statement {
            table: "<commit>".to_owned(),
            source,
        })?;

        tracing::info!(location = %self.location.describe(), tables = self.tables.len(), "schema ready");
        Ok(())
    }
}

fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt.query_map([], |row| row.get(0))?;
    names.collect()
}

/// Tables behind the users, games and auth route groups.
pub const GAMES_REPOSITORY: [Table; 6] = [
    Table {
        name: "users",
        ddl: "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            hashed_password TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    },
    Table {
        name: "games",
        ddl: "CREATE TABLE IF NOT EXISTS games (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            emoji TEXT,
            description TEXT NOT NULL DEFAULT '',
            age_rating TEXT,
            game_type TEXT,
            min_players INTEGER,
            max_players INTEGER,
            duration TEXT,
            equipment TEXT NOT NULL DEFAULT '[]',
            themes TEXT NOT NULL DEFAULT '[]',
            rules TEXT NOT NULL DEFAULT '',
            upvotes INTEGER NOT NULL DEFAULT 0,
            downvotes INTEGER NOT NULL DEFAULT 0,
            owner_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    },
    Table {
        name: "game_votes",
        ddl: "CREATE TABLE IF NOT EXISTS game_votes (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            direction INTEGER NOT NULL CHECK (direction IN (-1, 1)),
            PRIMARY KEY (user_id, game_id)
        )",
    },
    Table {
        name: "saved_games",
        ddl: "CREATE TABLE IF NOT EXISTS saved_games (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            saved_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, game_id)
        )",
    },
    Table {
        name: "idx_games_type",
        ddl: "CREATE INDEX IF NOT EXISTS idx_games_type ON games(game_type)",
    },
    Table {
        name: "idx_games_owner",
        ddl: "CREATE INDEX IF NOT EXISTS idx_games_owner ON games(owner_id)",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_snapshot(conn: &Connection) -> Vec<(String, String)> {
        let mut stmt = conn
            .prepare("SELECT name, sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY name")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<Vec<(String, String)>, _>>()
            .unwrap();
        rows
    }

    #[test]
    fn creates_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SqliteSchema::games_repository(dir.path().join("games.db"));

        schema.ensure_schema().unwrap();

        assert_eq!(schema.tables().unwrap(), vec!["game_votes", "games", "saved_games", "users"]);
    }

    #[test]
    fn second_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SqliteSchema::games_repository(dir.path().join("games.db"));

        schema.ensure_schema().unwrap();
        let once = schema_snapshot(&schema.connect().unwrap());
        schema.ensure_schema().unwrap();
        let twice = schema_snapshot(&schema.connect().unwrap());

        assert_eq!(once, twice);
    }

    #[test]
    fn existing_rows_survive_reinitialization() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SqliteSchema::games_repository(dir.path().join("games.db"));
        schema.ensure_schema().unwrap();

        let conn = schema.connect().unwrap();
        conn.execute("INSERT INTO games (name) VALUES ('Werewolf')", []).unwrap();
        schema.ensure_schema().unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM games", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unreachable_storage_is_a_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SqliteSchema::games_repository(dir.path().join("missing").join("games.db"));

        let err = schema.ensure_schema().unwrap_err();
        assert!(matches!(err, StorageError::ConnectionFailed { .. }));
    }

    #[test]
    fn bad_statement_names_the_table() {
        let schema = SqliteSchema::in_memory(
            "bad_statement",
            vec![Table { name: "broken", ddl: "CREATE TABLE broken (" }],
        );
        let err = schema.ensure_schema().unwrap_err();
        assert!(matches!(err, StorageError::Statement { ref table, .. } if table == "broken"));
    }
}
