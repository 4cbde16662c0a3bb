use std::path::Path;
use std::time::Duration;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::{
    ADDABLE_COLUMNS, RECIPE_COLUMNS, RELAXED_COLUMNS, SqlValue, coerce_stored_int,
    image_from_columns, now_timestamp,
};
use crate::config::MEMORY_PATH;
use crate::error::{Result, StorageError};
use crate::models::{DEFAULT_SERVINGS, Recipe, RecipeFields, RecipeSummary};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS recipes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    ingredients TEXT,
    instructions TEXT,
    tags TEXT,
    prep_minutes INTEGER NOT NULL DEFAULT 0,
    cook_minutes INTEGER NOT NULL DEFAULT 0,
    servings INTEGER NOT NULL DEFAULT 1,
    image_bytes BLOB,
    image_mime TEXT,
    image_filename TEXT,
    created_at TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL DEFAULT ''
)";

pub(crate) struct SqliteStore {
    conn: Connection,
    location: String,
}

/// One row of `PRAGMA table_info`.
#[derive(Debug)]
struct ColumnInfo {
    name: String,
    decl_type: String,
    not_null: bool,
    default: Option<String>,
    primary_key: bool,
}

impl ColumnInfo {
    fn is_relaxed(&self) -> bool {
        RELAXED_COLUMNS.contains(&self.name.as_str())
    }

    /// Column definition for the rebuilt table: same type and default,
    /// NOT NULL dropped on relaxed columns.
    fn definition(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.decl_type);
        if self.primary_key {
            if self.decl_type.eq_ignore_ascii_case("INTEGER") {
                def.push_str(" PRIMARY KEY AUTOINCREMENT");
            } else {
                def.push_str(" PRIMARY KEY");
            }
        } else if self.not_null && !self.is_relaxed() {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }
}

impl SqliteStore {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let conn = if path == Path::new(MEMORY_PATH) {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened sqlite");
        Ok(SqliteStore {
            conn,
            location: path.display().to_string(),
        })
    }

    pub(crate) fn init(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TABLE)?;
        self.migrate()?;
        self.conn
            .execute_batch("CREATE INDEX IF NOT EXISTS idx_recipes_title ON recipes(title);")?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let columns = self.table_columns()?;
        let tx = self.conn.unchecked_transaction()?;

        if columns.iter().any(|c| c.not_null && c.is_relaxed()) {
            tracing::info!("rebuilding recipes table to relax legacy NOT NULL columns");
            rebuild_relaxed(&tx, &columns)
                .map_err(|e| StorageError::Migration(format!("table rebuild failed: {e}")))?;
        }

        let has = |name: &str| columns.iter().any(|c| c.name == name);
        let mut added = Vec::new();
        for (name, definition, _) in ADDABLE_COLUMNS {
            if !has(name) {
                tx.execute_batch(&format!("ALTER TABLE recipes ADD COLUMN {name} {definition};"))?;
                added.push(*name);
            }
        }
        if !added.is_empty() {
            tracing::info!(columns = ?added, "added missing recipe columns");
        }

        if has("steps") {
            tx.execute(
                "UPDATE recipes SET instructions = steps
                 WHERE (instructions IS NULL OR instructions = '')
                   AND steps IS NOT NULL AND steps <> ''",
                [],
            )?;
        }
        if has("serves") && added.contains(&"servings") {
            tx.execute(
                "UPDATE recipes SET servings = MAX(CAST(serves AS INTEGER), 1)
                 WHERE serves IS NOT NULL",
                [],
            )?;
        }
        tx.execute(
            "UPDATE recipes SET created_at = ?1 WHERE created_at IS NULL OR created_at = ''",
            params![now_timestamp()],
        )?;
        tx.execute(
            "UPDATE recipes SET updated_at = created_at WHERE updated_at IS NULL OR updated_at = ''",
            [],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn table_columns(&self) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(recipes)")?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    decl_type: row.get(2)?,
                    not_null: row.get::<_, i64>(3)? != 0,
                    default: row.get(4)?,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    // --- Row mapping ---

    // Expects RECIPE_COLUMNS order.
    fn recipe_from_row(row: &Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            title: text_at(row, 1)?.unwrap_or_default(),
            description: text_at(row, 2)?,
            ingredients: text_at(row, 3)?,
            instructions: text_at(row, 4)?,
            tags: text_at(row, 5)?,
            prep_minutes: int_at(row, 6, 0)?.max(0),
            cook_minutes: int_at(row, 7, 0)?.max(0),
            servings: int_at(row, 8, DEFAULT_SERVINGS)?.max(DEFAULT_SERVINGS),
            image: image_from_columns(row.get(9)?, text_at(row, 10)?, text_at(row, 11)?),
            created_at: text_at(row, 12)?.unwrap_or_default(),
            updated_at: text_at(row, 13)?.unwrap_or_default(),
        })
    }

    fn summary_from_row(row: &Row) -> rusqlite::Result<RecipeSummary> {
        Ok(RecipeSummary {
            id: row.get(0)?,
            title: text_at(row, 1)?.unwrap_or_default(),
            servings: int_at(row, 2, DEFAULT_SERVINGS)?.max(DEFAULT_SERVINGS),
            tags: text_at(row, 3)?,
            has_image: row.get(4)?,
            updated_at: text_at(row, 5)?.unwrap_or_default(),
        })
    }

    // --- Repository operations ---

    pub(crate) fn insert(&self, fields: &RecipeFields, now: &str) -> Result<i64> {
        let image = fields.image.as_ref();
        self.conn.execute(
            "INSERT INTO recipes (title, description, ingredients, instructions, tags,
                                  prep_minutes, cook_minutes, servings,
                                  image_bytes, image_mime, image_filename, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                fields.title,
                fields.description,
                fields.ingredients,
                fields.instructions,
                fields.tags,
                fields.prep_minutes,
                fields.cook_minutes,
                fields.servings,
                image.map(|i| &i.bytes),
                image.map(|i| &i.mime),
                image.map(|i| &i.filename),
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn get(&self, id: i64) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    pub(crate) fn list(&self, pattern: Option<&str>, limit: Option<i64>) -> Result<Vec<RecipeSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, servings, tags,
                    (image_bytes IS NOT NULL AND length(image_bytes) > 0), updated_at
             FROM recipes
             WHERE ?1 IS NULL OR title LIKE ?1 ESCAPE '\\' OR tags LIKE ?1 ESCAPE '\\'
             ORDER BY lower(title), id
             LIMIT ?2",
        )?;
        let recipes = stmt
            .query_map(params![pattern, limit.unwrap_or(-1)], Self::summary_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recipes)
    }

    pub(crate) fn update(&self, id: i64, assignments: &[(&'static str, SqlValue)]) -> Result<u64> {
        let set = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE recipes SET {set} WHERE id = ?{}",
            assignments.len() + 1
        );
        let values = assignments
            .iter()
            .map(|(_, value)| to_sqlite(value))
            .chain(std::iter::once(Value::Integer(id)));
        let rows = self.conn.execute(&sql, params_from_iter(values))?;
        Ok(rows as u64)
    }

    pub(crate) fn delete(&self, id: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        Ok(rows as u64)
    }

    pub(crate) fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM recipes", [], |row| row.get(0))?;
        Ok(count)
    }

    pub(crate) fn select_one(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub(crate) fn location(&self) -> String {
        self.location.clone()
    }
}

/// Recreate `recipes` with the same columns and data, minus NOT NULL on the
/// relaxed columns. The AUTOINCREMENT counter never moves backwards.
fn rebuild_relaxed(conn: &Connection, columns: &[ColumnInfo]) -> rusqlite::Result<()> {
    let high_water = sequence_value(conn)?;
    let definitions = columns
        .iter()
        .map(ColumnInfo::definition)
        .collect::<Vec<_>>()
        .join(",\n    ");
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS recipes__rebuild;
         CREATE TABLE recipes__rebuild (
    {definitions}
         );
         INSERT INTO recipes__rebuild ({names}) SELECT {names} FROM recipes;
         DROP TABLE recipes;
         ALTER TABLE recipes__rebuild RENAME TO recipes;"
    ))?;

    if table_exists(conn, "sqlite_sequence")? {
        let max_id: i64 =
            conn.query_row("SELECT COALESCE(MAX(id), 0) FROM recipes", [], |row| row.get(0))?;
        let seq = high_water.unwrap_or(0).max(max_id);
        conn.execute("DELETE FROM sqlite_sequence WHERE name = 'recipes'", [])?;
        conn.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES ('recipes', ?1)",
            params![seq],
        )?;
    }
    Ok(())
}

fn sequence_value(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    if !table_exists(conn, "sqlite_sequence")? {
        return Ok(None);
    }
    conn.query_row(
        "SELECT seq FROM sqlite_sequence WHERE name = 'recipes'",
        [],
        |row| row.get(0),
    )
    .optional()
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Text(Some(text)) => Value::Text(text.clone()),
        SqlValue::Int(i) => Value::Integer(*i),
        SqlValue::Bytes(Some(bytes)) => Value::Blob(bytes.clone()),
        SqlValue::Text(None) | SqlValue::Bytes(None) => Value::Null,
    }
}

fn text_at(row: &Row, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    })
}

fn int_at(row: &Row, idx: usize, default: i64) -> rusqlite::Result<i64> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) if f.is_finite() => f.trunc() as i64,
        ValueRef::Text(t) => coerce_stored_int(&String::from_utf8_lossy(t), default),
        _ => default,
    })
}
