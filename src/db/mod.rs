use crate::errors::{AppError, AppResult};
use crate::models::AppSettings;
use crate::sheets::SheetBackend;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Local spreadsheet emulation plus the settings document.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self { conn: Mutex::new(conn) };
        db.ensure_default_settings()?;
        tracing::debug!(path = %path.to_string_lossy(), "database opened");

        Ok(db)
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        read_settings(&conn)
    }

    /// Read, merge and write happen under one lock inside one transaction.
    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;

        let mut merged = serde_json::to_value(read_settings(&tx)?)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("Invalid settings update: {}", error)))?;

        tx.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

impl SheetBackend for Database {
    fn read_rows(&self, sheet: &str) -> AppResult<Vec<Vec<String>>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare("SELECT cells_json FROM sheet_rows WHERE sheet = ?1 ORDER BY position ASC")?;
        let rows = stmt.query_map([sheet], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            let raw = row?;
            match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(cells) => result.push(cells),
                Err(error) => {
                    tracing::warn!(sheet = %sheet, error = %error, "malformed sheet row; returning it empty");
                    result.push(Vec::new());
                }
            }
        }
        Ok(result)
    }

    fn append_row(&self, sheet: &str, cells: &[String]) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM sheet_rows WHERE sheet = ?1",
            [sheet],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO sheet_rows (sheet, position, cells_json, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![sheet, position, serde_json::to_string(cells)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn update_row(&self, sheet: &str, index: usize, cells: &[String]) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let changed = conn.execute(
            "UPDATE sheet_rows SET cells_json = ?1, updated_at = ?2 WHERE sheet = ?3 AND position = ?4",
            params![serde_json::to_string(cells)?, Utc::now().to_rfc3339(), sheet, index as i64],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Row {} not found in sheet {}", index, sheet)));
        }
        Ok(())
    }

    fn delete_row(&self, sheet: &str, index: usize) -> AppResult<()> {
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM sheet_rows WHERE sheet = ?1 AND position = ?2",
            params![sheet, index as i64],
        )?;
        if removed == 0 {
            return Err(AppError::NotFound(format!("Row {} not found in sheet {}", index, sheet)));
        }
        tx.execute(
            "UPDATE sheet_rows SET position = position - 1 WHERE sheet = ?1 AND position > ?2",
            params![sheet, index as i64],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn read_settings(conn: &Connection) -> AppResult<AppSettings> {
    let raw = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = 'app'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    match raw {
        Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|error| {
            tracing::warn!(error = %error, "stored settings are malformed; using defaults");
            AppSettings::default()
        })),
        None => Ok(AppSettings::default()),
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::sheets::SheetBackend;
    use std::sync::Arc;
    use std::thread;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn sheet_rows_keep_order_and_shift_after_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        db.append_row("Orders", &row(&["id", "client"])).expect("header");
        db.append_row("Orders", &row(&["o1", "A"])).expect("row 1");
        db.append_row("Orders", &row(&["o2", "B"])).expect("row 2");
        db.append_row("Orders", &row(&["o3", "C"])).expect("row 3");
        db.append_row("CustomFields", &row(&["id"])).expect("other sheet");

        db.delete_row("Orders", 2).expect("delete");
        db.update_row("Orders", 2, &row(&["o3", "C2"])).expect("update shifted row");

        let rows = db.read_rows("Orders").expect("rows");
        assert_eq!(rows, vec![row(&["id", "client"]), row(&["o1", "A"]), row(&["o3", "C2"])]);
        assert_eq!(db.read_rows("CustomFields").expect("rows").len(), 1);

        db.append_row("Orders", &row(&["o4", "D"])).expect("append after delete");
        assert_eq!(db.read_rows("Orders").expect("rows")[3], row(&["o4", "D"]));
    }

    #[test]
    fn missing_rows_report_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        assert!(db.update_row("Orders", 5, &row(&["x"])).is_err());
        assert!(db.delete_row("Orders", 0).is_err());
        assert!(db.read_rows("Orders").expect("rows").is_empty());
    }

    #[test]
    fn settings_updates_merge_into_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let defaults = db.get_settings().expect("settings");
        assert_eq!(defaults.max_upload_mb, 25);

        let updated = db
            .update_settings(serde_json::json!({ "studioName": "Estúdio Norte", "maxUploadMb": 10 }))
            .expect("update");
        assert_eq!(updated.studio_name, "Estúdio Norte");
        assert_eq!(updated.max_upload_mb, 10);
        assert_eq!(updated.assistant_timeout_seconds, defaults.assistant_timeout_seconds);

        let reloaded = db.get_settings().expect("reload");
        assert_eq!(reloaded.studio_name, "Estúdio Norte");

        assert!(db.update_settings(serde_json::json!({ "maxUploadMb": "muito" })).is_err());
    }

    #[test]
    fn concurrent_settings_updates_are_all_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));

        for round in 0..20u32 {
            let name = format!("Estúdio {}", round);
            let renamer = {
                let db = Arc::clone(&db);
                let name = name.clone();
                thread::spawn(move || db.update_settings(serde_json::json!({ "studioName": name })).map(|_| ()))
            };
            let resizer = {
                let db = Arc::clone(&db);
                thread::spawn(move || db.update_settings(serde_json::json!({ "maxUploadMb": round + 1 })).map(|_| ()))
            };
            renamer.join().expect("join").expect("rename");
            resizer.join().expect("join").expect("resize");

            let stored = db.get_settings().expect("settings");
            assert_eq!(stored.studio_name, name);
            assert_eq!(stored.max_upload_mb, round + 1);
        }
    }
}
