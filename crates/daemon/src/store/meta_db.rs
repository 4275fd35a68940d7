use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};

use revline_common::types::RepositoryId;

use super::{
    BrowserSettings, CvsSettings, NewRepository, RepositoryStore, StoreError, StoredRepository,
};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE repositories (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    kind                    TEXT NOT NULL,
    name                    TEXT NOT NULL,
    description             TEXT NOT NULL DEFAULT '',
    connection_root         TEXT NOT NULL,
    module_name             TEXT NOT NULL,
    credential              TEXT NULL,
    log_file_path           TEXT NULL,
    fetch_remote            INTEGER NOT NULL DEFAULT 1,
    timeout_sec             INTEGER NOT NULL DEFAULT 600,
    browser_base_url        TEXT NULL,
    browser_root_parameter  TEXT NULL
);

CREATE TABLE project_repositories (
    project_key     TEXT NOT NULL,
    repository_id   INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    PRIMARY KEY (project_key, repository_id)
);

CREATE INDEX project_repositories_repo_idx
    ON project_repositories (repository_id);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

/// Sqlite-backed repository store at `~/.revline/meta.db`.
///
/// `AUTOINCREMENT` on the `repositories` table guarantees ids are assigned
/// once and never reused, even after deletes.
#[derive(Debug)]
pub struct MetaDb {
    conn: Mutex<Connection>,
}

impl MetaDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                StoreError::new(format!(
                    "failed to create meta.db parent directory `{}`: {error}",
                    parent.display()
                ))
            })?;
        }

        let mut conn = Connection::open(path).map_err(|error| {
            StoreError::new(format!("failed to open meta.db at `{}`: {error}", path.display()))
        })?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        current_schema_version(&self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("meta.db connection lock poisoned")
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<i64, StoreError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|error| StoreError::new(format!("failed to apply migration v{version}: {error}")))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )?;
        tx.commit()?;
        current_version = *version;
    }

    Ok(())
}

fn row_to_repository(row: &Row<'_>) -> rusqlite::Result<StoredRepository> {
    let browser = match (
        row.get::<_, Option<String>>("browser_base_url")?,
        row.get::<_, Option<String>>("browser_root_parameter")?,
    ) {
        (Some(base_url), root_parameter) => Some(BrowserSettings {
            base_url,
            root_parameter: root_parameter.unwrap_or_default(),
        }),
        (None, _) => None,
    };

    Ok(StoredRepository {
        id: RepositoryId(row.get("id")?),
        kind: row.get("kind")?,
        name: row.get("name")?,
        description: row.get("description")?,
        settings: CvsSettings {
            connection_root: row.get("connection_root")?,
            module_name: row.get("module_name")?,
            credential: row.get("credential")?,
            log_file_path: row.get::<_, Option<String>>("log_file_path")?.map(Into::into),
            fetch_remote: row.get("fetch_remote")?,
            timeout: Duration::from_secs(row.get::<_, u64>("timeout_sec")?),
            browser,
        },
    })
}

const SELECT_COLUMNS: &str = "id, kind, name, description, connection_root, module_name, \
     credential, log_file_path, fetch_remote, timeout_sec, browser_base_url, \
     browser_root_parameter";

impl RepositoryStore for MetaDb {
    fn find_all(&self) -> Result<Vec<StoredRepository>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM repositories ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_repository)?;
        let mut repositories = Vec::new();
        for row in rows {
            repositories.push(row?);
        }
        Ok(repositories)
    }

    fn find_by_id(&self, id: RepositoryId) -> Result<Option<StoredRepository>, StoreError> {
        let conn = self.lock();
        let repository = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM repositories WHERE id = ?1"),
                params![id.0],
                row_to_repository,
            )
            .optional()?;
        Ok(repository)
    }

    fn create(&self, repository: NewRepository) -> Result<StoredRepository, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO repositories (kind, name, description, connection_root, module_name, \
             credential, log_file_path, fetch_remote, timeout_sec, browser_base_url, \
             browser_root_parameter) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                repository.kind,
                repository.name,
                repository.description,
                repository.settings.connection_root,
                repository.settings.module_name,
                repository.settings.credential,
                repository.settings.log_file_path.as_ref().map(|p| p.display().to_string()),
                repository.settings.fetch_remote,
                repository.settings.timeout.as_secs(),
                repository.settings.browser.as_ref().map(|b| b.base_url.clone()),
                repository.settings.browser.as_ref().map(|b| b.root_parameter.clone()),
            ],
        )?;
        let id = RepositoryId(conn.last_insert_rowid());
        Ok(StoredRepository {
            id,
            kind: repository.kind,
            name: repository.name,
            description: repository.description,
            settings: repository.settings,
        })
    }

    fn update(&self, id: RepositoryId, repository: NewRepository) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE repositories SET kind = ?1, name = ?2, description = ?3, \
             connection_root = ?4, module_name = ?5, credential = ?6, log_file_path = ?7, \
             fetch_remote = ?8, timeout_sec = ?9, browser_base_url = ?10, \
             browser_root_parameter = ?11 WHERE id = ?12",
            params![
                repository.kind,
                repository.name,
                repository.description,
                repository.settings.connection_root,
                repository.settings.module_name,
                repository.settings.credential,
                repository.settings.log_file_path.as_ref().map(|p| p.display().to_string()),
                repository.settings.fetch_remote,
                repository.settings.timeout.as_secs(),
                repository.settings.browser.as_ref().map(|b| b.base_url.clone()),
                repository.settings.browser.as_ref().map(|b| b.root_parameter.clone()),
                id.0,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::new(format!("no repository with id {id}")));
        }
        Ok(())
    }

    fn delete(&self, id: RepositoryId) -> Result<(), StoreError> {
        let conn = self.lock();
        // ON DELETE CASCADE removes the project associations with the row.
        conn.execute("DELETE FROM repositories WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    fn repository_ids_for_project(
        &self,
        project_key: &str,
    ) -> Result<Vec<RepositoryId>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT repository_id FROM project_repositories \
             WHERE project_key = ?1 ORDER BY repository_id",
        )?;
        let rows = stmt.query_map(params![project_key], |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(RepositoryId(row?));
        }
        Ok(ids)
    }

    fn project_keys_for_repository(&self, id: RepositoryId) -> Result<Vec<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT project_key FROM project_repositories \
             WHERE repository_id = ?1 ORDER BY project_key",
        )?;
        let rows = stmt.query_map(params![id.0], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn replace_project_repositories(
        &self,
        project_key: &str,
        ids: &[RepositoryId],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM project_repositories WHERE project_key = ?1", params![project_key])?;
        for id in ids {
            tx.execute(
                "INSERT INTO project_repositories (project_key, repository_id) VALUES (?1, ?2)",
                params![project_key, id.0],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
