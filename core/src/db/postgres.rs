use std::future::Future;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{PgPool, Row};
use tokio::runtime::Runtime;

use super::{ADDABLE_COLUMNS, RELAXED_COLUMNS, SqlValue, image_from_columns, now_timestamp};
use crate::config::PostgresConfig;
use crate::error::{Error, Result, StorageError};
use crate::models::{DEFAULT_SERVINGS, Recipe, RecipeFields, RecipeSummary};

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS recipes (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    ingredients TEXT,
    instructions TEXT,
    tags TEXT,
    prep_minutes BIGINT NOT NULL DEFAULT 0,
    cook_minutes BIGINT NOT NULL DEFAULT 0,
    servings BIGINT NOT NULL DEFAULT 1,
    image_bytes BYTEA,
    image_mime TEXT,
    image_filename TEXT,
    created_at TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL DEFAULT ''
)";

// Numeric columns are cast so older INTEGER columns decode as i64, and
// timestamps so older TIMESTAMP columns decode as text.
const SELECT_RECIPE: &str = "SELECT id::bigint AS id, title, description, ingredients, instructions, tags,
        prep_minutes::bigint AS prep_minutes, cook_minutes::bigint AS cook_minutes,
        servings::bigint AS servings, image_bytes, image_mime, image_filename,
        created_at::text AS created_at, updated_at::text AS updated_at
 FROM recipes";

/// SQL types of `created_at` and `updated_at`. Tables created here use TEXT;
/// older tables may declare real timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StampTypes {
    created_at: &'static str,
    updated_at: &'static str,
}

impl Default for StampTypes {
    fn default() -> Self {
        Self {
            created_at: "text",
            updated_at: "text",
        }
    }
}

/// Cast target for a bound RFC 3339 string, from `information_schema`'s
/// `data_type`. Anything that is not a timestamp takes the value as text.
fn stamp_type(data_type: Option<&str>) -> &'static str {
    match data_type {
        Some("timestamp without time zone") => "timestamp",
        Some("timestamp with time zone") => "timestamptz",
        _ => "text",
    }
}

/// Postgres store. The pool is async; a private current-thread runtime drives
/// it so every call here is synchronous like the `SQLite` store.
pub(crate) struct PostgresStore {
    pool: PgPool,
    runtime: Option<Runtime>,
    location: String,
    stamps: OnceLock<StampTypes>,
}

impl PostgresStore {
    pub(crate) fn connect(config: &PostgresConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let pool = runtime.block_on(
            PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(options),
        )?;
        let location = config.masked_dsn();
        tracing::debug!(dsn = %location, "connected to postgres");
        Ok(PostgresStore {
            pool,
            runtime: Some(runtime),
            location,
            stamps: OnceLock::new(),
        })
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match &self.runtime {
            Some(runtime) => runtime.block_on(fut),
            None => unreachable!("runtime is only taken on drop"),
        }
    }

    pub(crate) fn init(&self) -> Result<()> {
        self.block_on(async {
            sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
            let stamps = self.migrate().await?;
            // Column types never change after the first migration.
            let _ = self.stamps.set(stamps);
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_recipes_title ON recipes (title)")
                .execute(&self.pool)
                .await?;
            Ok::<(), Error>(())
        })
    }

    fn stamps(&self) -> StampTypes {
        self.stamps.get().copied().unwrap_or_default()
    }

    async fn migrate(&self) -> Result<StampTypes> {
        let columns: Vec<(String, bool, String)> = sqlx::query(
            "SELECT column_name::text, is_nullable::text = 'NO', data_type::text
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = 'recipes'",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok((
                row.try_get::<String, _>(0)?,
                row.try_get::<bool, _>(1)?,
                row.try_get::<String, _>(2)?,
            ))
        })
        .collect::<std::result::Result<_, sqlx::Error>>()?;
        let has = |name: &str| columns.iter().any(|(c, _, _)| c == name);
        let data_type = |name: &str| {
            columns
                .iter()
                .find(|(c, _, _)| c == name)
                .map(|(_, _, t)| t.as_str())
        };
        let stamps = StampTypes {
            created_at: stamp_type(data_type("created_at")),
            updated_at: stamp_type(data_type("updated_at")),
        };

        let mut tx = self.pool.begin().await?;
        for (name, _, _) in columns
            .iter()
            .filter(|(name, not_null, _)| *not_null && RELAXED_COLUMNS.contains(&name.as_str()))
        {
            tracing::info!(column = %name, "dropping legacy NOT NULL constraint");
            sqlx::query(&format!(
                "ALTER TABLE recipes ALTER COLUMN \"{name}\" DROP NOT NULL"
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Migration(format!("relaxing {name}: {e}")))?;
        }

        let mut added = Vec::new();
        for (name, _, definition) in ADDABLE_COLUMNS {
            if !has(name) {
                sqlx::query(&format!(
                    "ALTER TABLE recipes ADD COLUMN IF NOT EXISTS {name} {definition}"
                ))
                .execute(&mut *tx)
                .await?;
                added.push(*name);
            }
        }
        if !added.is_empty() {
            tracing::info!(columns = ?added, "added missing recipe columns");
        }

        if has("steps") {
            sqlx::query(
                "UPDATE recipes SET instructions = steps
                 WHERE (instructions IS NULL OR instructions = '')
                   AND steps IS NOT NULL AND steps <> ''",
            )
            .execute(&mut *tx)
            .await?;
        }
        if has("serves") && added.contains(&"servings") {
            sqlx::query(
                "UPDATE recipes SET servings = GREATEST(CAST(serves AS BIGINT), 1)
                 WHERE serves IS NOT NULL",
            )
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(&format!(
            "UPDATE recipes SET created_at = CAST($1::text AS {})
             WHERE created_at IS NULL OR created_at::text = ''",
            stamps.created_at
        ))
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "UPDATE recipes SET updated_at = CAST(created_at::text AS {})
             WHERE updated_at IS NULL OR updated_at::text = ''",
            stamps.updated_at
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stamps)
    }

    // --- Row mapping ---

    fn recipe_from_row(row: &PgRow) -> std::result::Result<Recipe, sqlx::Error> {
        Ok(Recipe {
            id: row.try_get("id")?,
            title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
            description: row.try_get("description")?,
            ingredients: row.try_get("ingredients")?,
            instructions: row.try_get("instructions")?,
            tags: row.try_get("tags")?,
            prep_minutes: row.try_get::<Option<i64>, _>("prep_minutes")?.unwrap_or(0).max(0),
            cook_minutes: row.try_get::<Option<i64>, _>("cook_minutes")?.unwrap_or(0).max(0),
            servings: row
                .try_get::<Option<i64>, _>("servings")?
                .unwrap_or(DEFAULT_SERVINGS)
                .max(DEFAULT_SERVINGS),
            image: image_from_columns(
                row.try_get("image_bytes")?,
                row.try_get("image_mime")?,
                row.try_get("image_filename")?,
            ),
            created_at: row.try_get::<Option<String>, _>("created_at")?.unwrap_or_default(),
            updated_at: row.try_get::<Option<String>, _>("updated_at")?.unwrap_or_default(),
        })
    }

    fn summary_from_row(row: &PgRow) -> std::result::Result<RecipeSummary, sqlx::Error> {
        Ok(RecipeSummary {
            id: row.try_get("id")?,
            title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
            servings: row
                .try_get::<Option<i64>, _>("servings")?
                .unwrap_or(DEFAULT_SERVINGS)
                .max(DEFAULT_SERVINGS),
            tags: row.try_get("tags")?,
            has_image: row.try_get("has_image")?,
            updated_at: row.try_get::<Option<String>, _>("updated_at")?.unwrap_or_default(),
        })
    }

    // --- Repository operations ---

    pub(crate) fn insert(&self, fields: &RecipeFields, now: &str) -> Result<i64> {
        let image = fields.image.as_ref();
        let stamps = self.stamps();
        let sql = format!(
            "INSERT INTO recipes (title, description, ingredients, instructions, tags,
                                  prep_minutes, cook_minutes, servings,
                                  image_bytes, image_mime, image_filename, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                     CAST($12::text AS {}), CAST($12::text AS {}))
             RETURNING id::bigint",
            stamps.created_at, stamps.updated_at
        );
        let id: i64 = self.block_on(
            sqlx::query_scalar(&sql)
            .bind(&fields.title)
            .bind(&fields.description)
            .bind(&fields.ingredients)
            .bind(&fields.instructions)
            .bind(&fields.tags)
            .bind(fields.prep_minutes)
            .bind(fields.cook_minutes)
            .bind(fields.servings)
            .bind(image.map(|i| i.bytes.as_slice()))
            .bind(image.map(|i| i.mime.as_str()))
            .bind(image.map(|i| i.filename.as_str()))
            .bind(now)
            .fetch_one(&self.pool),
        )?;
        Ok(id)
    }

    pub(crate) fn get(&self, id: i64) -> Result<Option<Recipe>> {
        let row = self.block_on(
            sqlx::query(&format!("{SELECT_RECIPE} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool),
        )?;
        Ok(row.as_ref().map(Self::recipe_from_row).transpose()?)
    }

    pub(crate) fn list(&self, pattern: Option<&str>, limit: Option<i64>) -> Result<Vec<RecipeSummary>> {
        let rows = self.block_on(
            sqlx::query(
                "SELECT id::bigint AS id, title, servings::bigint AS servings, tags,
                        (image_bytes IS NOT NULL AND octet_length(image_bytes) > 0) AS has_image,
                        updated_at::text AS updated_at
                 FROM recipes
                 WHERE $1::text IS NULL
                    OR title ILIKE $1 ESCAPE '\\'
                    OR COALESCE(tags, '') ILIKE $1 ESCAPE '\\'
                 ORDER BY lower(title), id
                 LIMIT $2",
            )
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool),
        )?;
        let recipes = rows
            .iter()
            .map(Self::summary_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub(crate) fn update(&self, id: i64, assignments: &[(&'static str, SqlValue)]) -> Result<u64> {
        let stamps = self.stamps();
        let set = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| match *column {
                "updated_at" => {
                    format!("updated_at = CAST(${}::text AS {})", i + 1, stamps.updated_at)
                }
                _ => format!("{column} = ${}", i + 1),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE recipes SET {set} WHERE id = ${}",
            assignments.len() + 1
        );
        let mut query = sqlx::query(&sql);
        for (_, value) in assignments {
            query = match value {
                SqlValue::Text(text) => query.bind(text.clone()),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Bytes(bytes) => query.bind(bytes.clone()),
            };
        }
        let result = self.block_on(query.bind(id).execute(&self.pool))?;
        Ok(result.rows_affected())
    }

    pub(crate) fn delete(&self, id: i64) -> Result<u64> {
        let result = self.block_on(
            sqlx::query("DELETE FROM recipes WHERE id = $1")
                .bind(id)
                .execute(&self.pool),
        )?;
        Ok(result.rows_affected())
    }

    pub(crate) fn count(&self) -> Result<i64> {
        let count: i64 = self.block_on(
            sqlx::query_scalar("SELECT COUNT(*) FROM recipes").fetch_one(&self.pool),
        )?;
        Ok(count)
    }

    pub(crate) fn select_one(&self) -> Result<()> {
        let _: i32 = self.block_on(sqlx::query_scalar("SELECT 1").fetch_one(&self.pool))?;
        Ok(())
    }

    pub(crate) fn location(&self) -> String {
        self.location.clone()
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        // The store may be dropped from inside another runtime, where a
        // blocking shutdown would panic.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn connect_options(config: &PostgresConfig) -> Result<PgConnectOptions> {
    match config {
        PostgresConfig::Url(url) => PgConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("{}: {e}", config.masked_dsn()))),
        PostgresConfig::Parts(parts) => {
            let mut options = PgConnectOptions::new()
                .host(parts.host())
                .port(parts.port());
            if let Some(user) = &parts.user {
                options = options.username(user);
            }
            if let Some(password) = &parts.password {
                options = options.password(password);
            }
            if let Some(database) = &parts.database {
                options = options.database(database);
            }
            if let Some(mode) = &parts.sslmode {
                let mode = PgSslMode::from_str(mode)
                    .map_err(|_| Error::Config(format!("unknown sslmode '{mode}'")))?;
                options = options.ssl_mode(mode);
            }
            Ok(options)
        }
    }
}
