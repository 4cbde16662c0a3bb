//! Recipe repository over a pluggable relational backend.
//!
//! [`Database`] is the only type callers see. It owns either a `SQLite`
//! connection or a Postgres pool and exposes the same synchronous operations
//! for both.

#[cfg(feature = "postgres")]
mod postgres;
mod sqlite;

use std::path::Path;

use chrono::{SecondsFormat, Utc};

use crate::config::{DbConfig, MEMORY_PATH};
use crate::error::Result;
use crate::models::{
    ImageAttachment, ImageChange, NewRecipe, Recipe, RecipeChanges, RecipeSummary, RecipeUpdate,
};
use crate::photo::fit_attachment;

#[cfg(feature = "postgres")]
use self::postgres::PostgresStore;
use self::sqlite::SqliteStore;

pub struct Database {
    backend: Backend,
}

enum Backend {
    Sqlite(SqliteStore),
    #[cfg(feature = "postgres")]
    Postgres(PostgresStore),
}

/// Dispatch a call to whichever store backs this database.
macro_rules! with_store {
    ($self:expr, $store:ident => $body:expr) => {
        match &$self.backend {
            Backend::Sqlite($store) => $body,
            #[cfg(feature = "postgres")]
            Backend::Postgres($store) => $body,
        }
    };
}

impl Database {
    /// Connect to the configured backend and make sure the schema is current.
    pub fn open(config: &DbConfig) -> Result<Self> {
        let backend = match config {
            DbConfig::Sqlite { path } => Backend::Sqlite(SqliteStore::open(path)?),
            #[cfg(feature = "postgres")]
            DbConfig::Postgres(pg) => Backend::Postgres(PostgresStore::connect(pg)?),
            #[cfg(not(feature = "postgres"))]
            DbConfig::Postgres(_) => {
                return Err(crate::error::Error::DriverUnavailable("postgres"));
            }
        };
        let db = Database { backend };
        db.init()?;
        tracing::info!(engine = db.engine(), location = %db.location(), "opened recipe store");
        Ok(db)
    }

    pub fn open_sqlite(path: &Path) -> Result<Self> {
        Self::open(&DbConfig::sqlite(path))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&DbConfig::sqlite(MEMORY_PATH))
    }

    /// Create the table if needed and apply in-place migrations. Safe to call
    /// any number of times.
    pub fn init(&self) -> Result<()> {
        with_store!(self, store => store.init())
    }

    /// Insert a recipe and return its new id.
    pub fn add(&self, recipe: &NewRecipe) -> Result<i64> {
        let mut fields = recipe.normalize()?;
        fields.image = fields.image.as_ref().map(fit_attachment).transpose()?;
        let now = now_timestamp();
        let id = with_store!(self, store => store.insert(&fields, &now))?;
        tracing::debug!(id, title = %fields.title, "added recipe");
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Recipe>> {
        with_store!(self, store => store.get(id))
    }

    /// Recipes ordered by title (case-insensitive), then id. `search` matches
    /// title or tags as a case-insensitive substring.
    pub fn list(&self, search: Option<&str>, limit: Option<i64>) -> Result<Vec<RecipeSummary>> {
        let pattern = search
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(like_pattern);
        let limit = limit.map(|l| l.max(0));
        with_store!(self, store => store.list(pattern.as_deref(), limit))
    }

    /// Apply a partial update. Returns the number of rows changed: 0 when the
    /// id does not exist.
    pub fn update(&self, id: i64, update: &RecipeUpdate) -> Result<u64> {
        let mut changes = update.normalize()?;
        if let ImageChange::Replace(image) = &mut changes.image {
            *image = fit_attachment(image)?;
        }
        let assignments = assignments(&changes, &now_timestamp());
        let affected = with_store!(self, store => store.update(id, &assignments))?;
        tracing::debug!(id, affected, "updated recipe");
        Ok(affected)
    }

    /// Hard delete. A missing id is not an error.
    pub fn delete(&self, id: i64) -> Result<()> {
        let affected = with_store!(self, store => store.delete(id))?;
        tracing::debug!(id, affected, "deleted recipe");
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        with_store!(self, store => store.count())
    }

    /// `sqlite` or `postgres`.
    #[must_use]
    pub fn engine(&self) -> &'static str {
        match &self.backend {
            Backend::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Backend::Postgres(_) => "postgres",
        }
    }

    /// File path for `SQLite`, masked DSN for Postgres.
    #[must_use]
    pub fn location(&self) -> String {
        with_store!(self, store => store.location())
    }

    pub(crate) fn select_one(&self) -> Result<()> {
        with_store!(self, store => store.select_one())
    }
}

/// Column list shared by every `SELECT` that maps to a full [`Recipe`].
pub(crate) const RECIPE_COLUMNS: &str = "id, title, description, ingredients, instructions, tags, \
     prep_minutes, cook_minutes, servings, image_bytes, image_mime, image_filename, \
     created_at, updated_at";

/// Canonical columns that may be missing from an older table, with the
/// definition used to add them (`SQLite`, Postgres).
pub(crate) const ADDABLE_COLUMNS: &[(&str, &str, &str)] = &[
    ("title", "TEXT NOT NULL DEFAULT ''", "TEXT NOT NULL DEFAULT ''"),
    ("description", "TEXT", "TEXT"),
    ("ingredients", "TEXT", "TEXT"),
    ("instructions", "TEXT", "TEXT"),
    ("tags", "TEXT", "TEXT"),
    ("prep_minutes", "INTEGER NOT NULL DEFAULT 0", "BIGINT NOT NULL DEFAULT 0"),
    ("cook_minutes", "INTEGER NOT NULL DEFAULT 0", "BIGINT NOT NULL DEFAULT 0"),
    ("servings", "INTEGER NOT NULL DEFAULT 1", "BIGINT NOT NULL DEFAULT 1"),
    ("image_bytes", "BLOB", "BYTEA"),
    ("image_mime", "TEXT", "TEXT"),
    ("image_filename", "TEXT", "TEXT"),
    ("created_at", "TEXT NOT NULL DEFAULT ''", "TEXT NOT NULL DEFAULT ''"),
    ("updated_at", "TEXT NOT NULL DEFAULT ''", "TEXT NOT NULL DEFAULT ''"),
];

/// Older columns that must not block inserts that no longer write them.
pub(crate) const RELAXED_COLUMNS: &[&str] = &["ingredients", "steps", "serves"];

/// A bound value in a generated `UPDATE`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Text(Option<String>),
    Int(i64),
    Bytes(Option<Vec<u8>>),
}

/// `SET` list for an update: only supplied fields, plus `updated_at`.
pub(crate) fn assignments(changes: &RecipeChanges, now: &str) -> Vec<(&'static str, SqlValue)> {
    let mut set = Vec::new();
    if let Some(title) = &changes.title {
        set.push(("title", SqlValue::Text(Some(title.clone()))));
    }
    for (column, value) in [
        ("description", &changes.description),
        ("ingredients", &changes.ingredients),
        ("instructions", &changes.instructions),
        ("tags", &changes.tags),
    ] {
        if let Some(value) = value {
            set.push((column, SqlValue::Text(value.clone())));
        }
    }
    for (column, value) in [
        ("prep_minutes", changes.prep_minutes),
        ("cook_minutes", changes.cook_minutes),
        ("servings", changes.servings),
    ] {
        if let Some(value) = value {
            set.push((column, SqlValue::Int(value)));
        }
    }
    match &changes.image {
        ImageChange::Keep => {}
        ImageChange::Replace(image) => {
            set.push(("image_bytes", SqlValue::Bytes(Some(image.bytes.clone()))));
            set.push(("image_mime", SqlValue::Text(Some(image.mime.clone()))));
            set.push(("image_filename", SqlValue::Text(Some(image.filename.clone()))));
        }
        ImageChange::Clear => {
            set.push(("image_bytes", SqlValue::Bytes(None)));
            set.push(("image_mime", SqlValue::Text(None)));
            set.push(("image_filename", SqlValue::Text(None)));
        }
    }
    set.push(("updated_at", SqlValue::Text(Some(now.to_string()))));
    set
}

/// Image columns → attachment; rows without bytes have no image.
pub(crate) fn image_from_columns(
    bytes: Option<Vec<u8>>,
    mime: Option<String>,
    filename: Option<String>,
) -> Option<ImageAttachment> {
    bytes.filter(|b| !b.is_empty()).map(|bytes| ImageAttachment {
        bytes,
        mime: mime
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        filename: filename.unwrap_or_default(),
    })
}

/// `%query%` with `LIKE` wildcards escaped by backslash.
pub(crate) fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Leniently read a stored integer; older rows may hold text or NULL.
pub(crate) fn coerce_stored_int(text: &str, default: i64) -> i64 {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DEFAULT_SERVINGS, IngredientRow, format_ingredients};

    fn pancakes() -> NewRecipe {
        NewRecipe {
            title: "Pancakes".to_string(),
            ingredients: Some("Flour\t200\tg\nMilk\t300\tml".to_string()),
            instructions: Some("Mix\nFry".to_string()),
            tags: Some("breakfast, sweet".to_string()),
            prep_minutes: Some(10),
            cook_minutes: Some(15),
            servings: Some(2),
            ..NewRecipe::default()
        }
    }

    fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([shade, 90, 40]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn photo() -> ImageAttachment {
        ImageAttachment {
            bytes: png_bytes(16, 12, 200),
            mime: "image/png".to_string(),
            filename: "pancakes.png".to_string(),
        }
    }

    #[test]
    fn test_add_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add(&pancakes()).unwrap();

        let recipe = db.get(id).unwrap().unwrap();
        assert_eq!(recipe.id, id);
        assert_eq!(recipe.title, "Pancakes");
        assert_eq!(recipe.ingredients.as_deref(), Some("Flour\t200\tg\nMilk\t300\tml"));
        assert_eq!(recipe.instructions.as_deref(), Some("Mix\nFry"));
        assert_eq!(recipe.prep_minutes, 10);
        assert_eq!(recipe.cook_minutes, 15);
        assert_eq!(recipe.servings, 2);
        assert!(recipe.image.is_none());
        assert!(!recipe.created_at.is_empty());
        assert_eq!(recipe.created_at, recipe.updated_at);
    }

    #[test]
    fn test_add_normalizes_fields() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .add(&NewRecipe {
                title: "  Toast ".to_string(),
                description: Some("   ".to_string()),
                tags: Some(String::new()),
                prep_minutes: Some(-4),
                servings: Some(0),
                ..NewRecipe::default()
            })
            .unwrap();

        let recipe = db.get(id).unwrap().unwrap();
        assert_eq!(recipe.title, "Toast");
        assert_eq!(recipe.description, None);
        assert_eq!(recipe.tags, None);
        assert_eq!(recipe.prep_minutes, 0);
        assert_eq!(recipe.servings, DEFAULT_SERVINGS);
    }

    #[test]
    fn test_add_rejects_blank_title() {
        let db = Database::open_in_memory().unwrap();
        for title in ["", "   ", "\t\n"] {
            let err = db.add(&NewRecipe::titled(title)).unwrap_err();
            assert!(err.is_validation());
        }
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_get_missing_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get(42).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let db = Database::open_in_memory().unwrap();
        let first = db.add(&NewRecipe::titled("One")).unwrap();
        let second = db.add(&NewRecipe::titled("Two")).unwrap();
        db.delete(second).unwrap();
        let third = db.add(&NewRecipe::titled("Three")).unwrap();
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn test_list_ordering_and_search() {
        let db = Database::open_in_memory().unwrap();
        db.add(&NewRecipe {
            tags: Some("dinner".to_string()),
            ..NewRecipe::titled("chicken curry")
        })
        .unwrap();
        db.add(&NewRecipe::titled("Apple pie")).unwrap();
        db.add(&NewRecipe {
            tags: Some("Chickpeas, vegan".to_string()),
            ..NewRecipe::titled("Hummus")
        })
        .unwrap();
        db.add(&NewRecipe::titled("Beef stew")).unwrap();

        let titles: Vec<String> = db
            .list(None, None)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Apple pie", "Beef stew", "chicken curry", "Hummus"]);

        let found: Vec<String> = db
            .list(Some("CHICK"), None)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(found, vec!["chicken curry", "Hummus"]);

        assert_eq!(db.list(None, Some(2)).unwrap().len(), 2);
        assert_eq!(db.list(Some("   "), None).unwrap().len(), 4);
    }

    #[test]
    fn test_list_escapes_wildcards() {
        let db = Database::open_in_memory().unwrap();
        db.add(&NewRecipe::titled("100% rye bread")).unwrap();
        db.add(&NewRecipe::titled("Rye crackers")).unwrap();
        db.add(&NewRecipe::titled("snake_case soup")).unwrap();

        let found = db.list(Some("%"), None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "100% rye bread");

        let found = db.list(Some("_"), None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "snake_case soup");
    }

    #[test]
    fn test_count_matches_list() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.count().unwrap(), 0);
        for title in ["A", "B", "C"] {
            db.add(&NewRecipe::titled(title)).unwrap();
        }
        assert_eq!(db.count().unwrap(), 3);
        assert_eq!(db.list(None, None).unwrap().len(), 3);
    }

    #[test]
    fn test_partial_update() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add(&pancakes()).unwrap();
        let before = db.get(id).unwrap().unwrap();

        let affected = db
            .update(
                id,
                &RecipeUpdate {
                    title: Some("Fluffy pancakes".to_string()),
                    tags: Some(String::new()),
                    serves: Some(4),
                    ..RecipeUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(affected, 1);

        let after = db.get(id).unwrap().unwrap();
        assert_eq!(after.title, "Fluffy pancakes");
        assert_eq!(after.tags, None);
        assert_eq!(after.servings, 4);
        assert_eq!(after.ingredients, before.ingredients);
        assert_eq!(after.instructions, before.instructions);
        assert_eq!(after.prep_minutes, 10);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn test_empty_update_only_touches_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .add(&NewRecipe {
                image: Some(photo()),
                ..pancakes()
            })
            .unwrap();
        let before = db.get(id).unwrap().unwrap();

        assert_eq!(db.update(id, &RecipeUpdate::default()).unwrap(), 1);
        let after = db.get(id).unwrap().unwrap();
        assert_eq!(
            Recipe {
                updated_at: before.updated_at.clone(),
                ..after.clone()
            },
            before
        );
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn test_update_rejects_blank_title_without_writing() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add(&pancakes()).unwrap();
        let err = db
            .update(
                id,
                &RecipeUpdate {
                    title: Some("  ".to_string()),
                    servings: Some(9),
                    ..RecipeUpdate::default()
                },
            )
            .unwrap_err();
        assert!(err.is_validation());
        let recipe = db.get(id).unwrap().unwrap();
        assert_eq!(recipe.title, "Pancakes");
        assert_eq!(recipe.servings, 2);
    }

    #[test]
    fn test_update_missing_id() {
        let db = Database::open_in_memory().unwrap();
        let update = RecipeUpdate {
            title: Some("Ghost".to_string()),
            ..RecipeUpdate::default()
        };
        assert_eq!(db.update(999, &update).unwrap(), 0);
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_image_keep_replace_clear() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .add(&NewRecipe {
                image: Some(photo()),
                ..pancakes()
            })
            .unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().image, Some(photo()));
        assert!(db.list(None, None).unwrap()[0].has_image);

        // No new image, keep requested.
        db.update(id, &RecipeUpdate::default()).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().image, Some(photo()));

        // A new image replaces regardless of the keep flag.
        let replacement = ImageAttachment {
            bytes: png_bytes(8, 8, 10),
            mime: "image/png".to_string(),
            filename: "new.png".to_string(),
        };
        db.update(
            id,
            &RecipeUpdate {
                image: Some(replacement.clone()),
                keep_existing_image: false,
                ..RecipeUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().image, Some(replacement));

        // No new image, keep not requested: cleared.
        db.update(
            id,
            &RecipeUpdate {
                keep_existing_image: false,
                ..RecipeUpdate::default()
            },
        )
        .unwrap();
        assert!(db.get(id).unwrap().unwrap().image.is_none());
        assert!(!db.list(None, None).unwrap()[0].has_image);
    }

    #[test]
    fn test_oversized_image_is_shrunk_on_store() {
        let db = Database::open_in_memory().unwrap();
        let big = ImageAttachment {
            bytes: png_bytes(400, 300, 120),
            mime: "image/png".to_string(),
            filename: "big.png".to_string(),
        };
        let id = db
            .add(&NewRecipe {
                image: Some(big.clone()),
                ..pancakes()
            })
            .unwrap();
        let stored = db.get(id).unwrap().unwrap().image.unwrap();
        let decoded = image::load_from_memory(&stored.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 150));

        let tall = ImageAttachment {
            bytes: png_bytes(100, 500, 30),
            ..big
        };
        db.update(
            id,
            &RecipeUpdate {
                image: Some(tall),
                ..RecipeUpdate::default()
            },
        )
        .unwrap();
        let stored = db.get(id).unwrap().unwrap().image.unwrap();
        let decoded = image::load_from_memory(&stored.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 200));
    }

    #[test]
    fn test_undecodable_image_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .add(&NewRecipe {
                image: Some(ImageAttachment {
                    bytes: vec![1, 2, 3],
                    mime: "image/png".to_string(),
                    filename: "broken.png".to_string(),
                }),
                ..pancakes()
            })
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::UnsupportedImage(_)));
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_ingredient_rows_survive_storage() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            IngredientRow::new("Flour", "200", "g"),
            IngredientRow::new("Eggs", "2", ""),
        ];
        let id = db
            .add(&NewRecipe {
                ingredients: Some(format_ingredients(&rows)),
                ..NewRecipe::titled("Pancakes")
            })
            .unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().ingredient_rows(), rows);

        let edited = vec![
            IngredientRow::new("Milk", "", ""),
            IngredientRow::new("Sugar", "1", ""),
        ];
        db.update(
            id,
            &RecipeUpdate {
                ingredients: Some(format_ingredients(&edited)),
                ..RecipeUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().ingredient_rows(), edited);
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add(&pancakes()).unwrap();
        db.delete(id).unwrap();
        assert!(db.get(id).unwrap().is_none());
        db.delete(id).unwrap();
        db.delete(12345).unwrap();
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add(&pancakes()).unwrap();
        db.init().unwrap();
        db.init().unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().title, "Pancakes");
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("food.sqlite3");
        let id = {
            let db = Database::open_sqlite(&path).unwrap();
            db.add(&pancakes()).unwrap()
        };
        let db = Database::open_sqlite(&path).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().title, "Pancakes");
        assert_eq!(db.engine(), "sqlite");
        assert_eq!(db.location(), path.display().to_string());
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("chick"), "%chick%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn test_assignments_only_supplied_fields() {
        let changes = RecipeUpdate {
            description: Some(String::new()),
            cook_minutes: Some(20),
            ..RecipeUpdate::default()
        }
        .normalize()
        .unwrap();
        let set = assignments(&changes, "now");
        assert_eq!(
            set,
            vec![
                ("description", SqlValue::Text(None)),
                ("cook_minutes", SqlValue::Int(20)),
                ("updated_at", SqlValue::Text(Some("now".to_string()))),
            ]
        );
    }

    #[test]
    fn test_coerce_stored_int() {
        assert_eq!(coerce_stored_int("4", 1), 4);
        assert_eq!(coerce_stored_int(" 2.5 ", 1), 2);
        assert_eq!(coerce_stored_int("a few", 1), 1);
    }
}
