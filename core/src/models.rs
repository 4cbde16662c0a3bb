use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_SERVINGS: i64 = 1;

/// An image stored alongside a recipe. `Database::add` and `Database::update`
/// pass it through [`crate::photo::prepare_image`] again, so whatever gets
/// stored fits inside 200×200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAttachment {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub ingredients: Option<String>,
    pub instructions: Option<String>,
    pub tags: Option<String>,
    pub prep_minutes: i64,
    pub cook_minutes: i64,
    pub servings: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
    pub created_at: String,
    pub updated_at: String,
}

impl Recipe {
    #[must_use]
    pub fn ingredient_rows(&self) -> Vec<IngredientRow> {
        parse_ingredients(self.ingredients.as_deref().unwrap_or_default())
    }

    #[must_use]
    pub fn instruction_lines(&self) -> Vec<&str> {
        self.instructions
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }

    #[must_use]
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Lightweight row returned by `Database::list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeSummary {
    pub id: i64,
    pub title: String,
    pub servings: i64,
    pub tags: Option<String>,
    pub has_image: bool,
    pub updated_at: String,
}

/// Input for `Database::add`.
///
/// `servings` and `serves` are synonyms kept for older callers; when both are
/// present `serves` wins. Numeric fields accept numbers or numeric strings when
/// deserialized, and anything unparseable falls back to the field's default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    #[serde(default, alias = "notes")]
    pub description: Option<String>,
    #[serde(default)]
    pub ingredients: Option<String>,
    #[serde(default, alias = "steps")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub prep_minutes: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub cook_minutes: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub servings: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub serves: Option<i64>,
    #[serde(skip)]
    pub image: Option<ImageAttachment>,
}

impl NewRecipe {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub(crate) fn normalize(&self) -> Result<RecipeFields> {
        Ok(RecipeFields {
            title: validate_title(&self.title)?,
            description: clean_text(self.description.as_deref()),
            ingredients: clean_ingredients(self.ingredients.as_deref()),
            instructions: clean_text(self.instructions.as_deref()),
            tags: clean_text(self.tags.as_deref()),
            prep_minutes: clamp_minutes(self.prep_minutes.unwrap_or(0)),
            cook_minutes: clamp_minutes(self.cook_minutes.unwrap_or(0)),
            servings: clamp_servings(
                self.serves.or(self.servings).unwrap_or(DEFAULT_SERVINGS),
            ),
            image: self.image.clone(),
        })
    }
}

/// Partial update for `Database::update`. `None` leaves a column alone;
/// `Some("")` on an optional text column clears it.
///
/// Image handling: a new `image` always replaces the stored one. Without a new
/// image, `keep_existing_image == true` leaves the stored image untouched and
/// `false` clears it.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "notes")]
    pub description: Option<String>,
    #[serde(default)]
    pub ingredients: Option<String>,
    #[serde(default, alias = "steps")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub prep_minutes: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub cook_minutes: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub servings: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub serves: Option<i64>,
    #[serde(skip)]
    pub image: Option<ImageAttachment>,
    #[serde(default = "default_true")]
    pub keep_existing_image: bool,
}

impl Default for RecipeUpdate {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            ingredients: None,
            instructions: None,
            tags: None,
            prep_minutes: None,
            cook_minutes: None,
            servings: None,
            serves: None,
            image: None,
            keep_existing_image: true,
        }
    }
}

impl RecipeUpdate {
    pub(crate) fn normalize(&self) -> Result<RecipeChanges> {
        let title = self.title.as_deref().map(validate_title).transpose()?;
        let image = match (&self.image, self.keep_existing_image) {
            (Some(image), _) => ImageChange::Replace(image.clone()),
            (None, true) => ImageChange::Keep,
            (None, false) => ImageChange::Clear,
        };
        Ok(RecipeChanges {
            title,
            description: self.description.as_deref().map(|v| clean_text(Some(v))),
            ingredients: self
                .ingredients
                .as_deref()
                .map(|v| clean_ingredients(Some(v))),
            instructions: self.instructions.as_deref().map(|v| clean_text(Some(v))),
            tags: self.tags.as_deref().map(|v| clean_text(Some(v))),
            prep_minutes: self.prep_minutes.map(clamp_minutes),
            cook_minutes: self.cook_minutes.map(clamp_minutes),
            servings: self.serves.or(self.servings).map(clamp_servings),
            image,
        })
    }
}

fn default_true() -> bool {
    true
}

/// Validated column values for an insert.
#[derive(Debug, Clone)]
pub(crate) struct RecipeFields {
    pub title: String,
    pub description: Option<String>,
    pub ingredients: Option<String>,
    pub instructions: Option<String>,
    pub tags: Option<String>,
    pub prep_minutes: i64,
    pub cook_minutes: i64,
    pub servings: i64,
    pub image: Option<ImageAttachment>,
}

#[derive(Debug, Clone)]
pub(crate) enum ImageChange {
    Keep,
    Replace(ImageAttachment),
    Clear,
}

/// Validated column values for an update; outer `None` means "not supplied".
#[derive(Debug, Clone)]
#[allow(clippy::option_option)]
pub(crate) struct RecipeChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub ingredients: Option<Option<String>>,
    pub instructions: Option<Option<String>>,
    pub tags: Option<Option<String>>,
    pub prep_minutes: Option<i64>,
    pub cook_minutes: Option<i64>,
    pub servings: Option<i64>,
    pub image: ImageChange,
}

fn validate_title(raw: &str) -> Result<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(Error::validation("Title is required."));
    }
    Ok(title.to_string())
}

fn clean_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Drop blank lines and outer spaces from ingredient text. Tabs are column
/// separators, so a row with an empty unit keeps its trailing tab.
fn clean_ingredients(raw: Option<&str>) -> Option<String> {
    let text = raw?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() && c != '\t'))
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

fn clamp_minutes(value: i64) -> i64 {
    value.max(0)
}

fn clamp_servings(value: i64) -> i64 {
    value.max(DEFAULT_SERVINGS)
}

/// Parse an integer the forgiving way: whole numbers, or decimals truncated.
fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}

/// Minutes from user text; anything unparseable or negative becomes 0.
#[must_use]
pub fn coerce_minutes(raw: &str) -> i64 {
    parse_int(raw).map_or(0, clamp_minutes)
}

/// Servings from user text; anything unparseable or below 1 becomes 1.
#[must_use]
pub fn coerce_servings(raw: &str) -> i64 {
    parse_int(raw).map_or(DEFAULT_SERVINGS, clamp_servings)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientInt {
    Int(i64),
    Float(f64),
    Text(String),
}

fn lenient_int<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<LenientInt>::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        LenientInt::Int(i) => i,
        LenientInt::Float(f) if f.is_finite() => f.trunc() as i64,
        LenientInt::Float(_) => 0,
        LenientInt::Text(s) => parse_int(&s).unwrap_or(0),
    }))
}

// --- Ingredients ---

/// One row of the ingredient table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientRow {
    pub name: String,
    pub amount: String,
    pub unit: String,
}

impl IngredientRow {
    pub fn new(name: impl Into<String>, amount: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            amount: amount.into(),
            unit: unit.into(),
        }
    }

    /// `Flour — 200 g`, `Eggs — 3`, or just `Salt`.
    #[must_use]
    pub fn display_line(&self) -> String {
        let name = self.name.trim();
        let amount = self.amount.trim();
        let unit = self.unit.trim();
        match (amount.is_empty(), unit.is_empty()) {
            (false, false) => format!("{name} — {amount} {unit}"),
            (false, true) => format!("{name} — {amount}"),
            (true, false) => format!("{name} — {unit}"),
            (true, true) => name.to_string(),
        }
    }

    fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.amount.trim().is_empty() && self.unit.trim().is_empty()
    }
}

/// Parse stored ingredient text: `name\tamount\tunit` per line. Lines without
/// enough tabs are older free-text entries and become name-only rows.
#[must_use]
pub fn parse_ingredients(text: &str) -> Vec<IngredientRow> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() >= 3 {
                let row = IngredientRow::new(parts[0].trim(), parts[1].trim(), parts[2].trim());
                (!row.is_blank()).then_some(row)
            } else {
                let name = line.trim();
                (!name.is_empty()).then(|| IngredientRow::new(name, "", ""))
            }
        })
        .collect()
}

/// Inverse of [`parse_ingredients`]; rows without a name are dropped.
#[must_use]
pub fn format_ingredients(rows: &[IngredientRow]) -> String {
    rows.iter()
        .filter(|r| !r.name.trim().is_empty())
        .map(|r| format!("{}\t{}\t{}", r.name.trim(), r.amount.trim(), r.unit.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tab_separated_rows() {
        let rows = parse_ingredients("Flour\t200\tg\nEggs\t3\t\nSalt\t\t");
        assert_eq!(
            rows,
            vec![
                IngredientRow::new("Flour", "200", "g"),
                IngredientRow::new("Eggs", "3", ""),
                IngredientRow::new("Salt", "", ""),
            ]
        );
    }

    #[test]
    fn test_parse_free_text_lines() {
        let rows = parse_ingredients("2 cups of flour\n\n  a pinch of salt  ");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "2 cups of flour");
        assert_eq!(rows[1].name, "a pinch of salt");
        assert!(rows[1].amount.is_empty());
    }

    #[test]
    fn test_parse_empty_text() {
        assert!(parse_ingredients("").is_empty());
        assert!(parse_ingredients("   \n  ").is_empty());
    }

    #[test]
    fn test_format_drops_nameless_rows() {
        let rows = vec![
            IngredientRow::new(" Flour ", "200", "g"),
            IngredientRow::new("", "5", "ml"),
            IngredientRow::new("Milk", "", ""),
        ];
        assert_eq!(format_ingredients(&rows), "Flour\t200\tg\nMilk\t\t");
    }

    #[test]
    fn test_display_line() {
        assert_eq!(IngredientRow::new("Flour", "200", "g").display_line(), "Flour — 200 g");
        assert_eq!(IngredientRow::new("Eggs", "3", "").display_line(), "Eggs — 3");
        assert_eq!(IngredientRow::new("Basil", "", "bunch").display_line(), "Basil — bunch");
        assert_eq!(IngredientRow::new("Salt", "", "").display_line(), "Salt");
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(coerce_minutes("15"), 15);
        assert_eq!(coerce_minutes(" 7.9 "), 7);
        assert_eq!(coerce_minutes("soon"), 0);
        assert_eq!(coerce_minutes("-5"), 0);
        assert_eq!(coerce_servings("4"), 4);
        assert_eq!(coerce_servings("lots"), 1);
        assert_eq!(coerce_servings("0"), 1);
    }

    #[test]
    fn test_normalize_trims_and_defaults() {
        let input = NewRecipe {
            title: "  Pancakes ".to_string(),
            description: Some("   ".to_string()),
            instructions: Some(" Mix\nFry \n".to_string()),
            prep_minutes: Some(-3),
            ..NewRecipe::default()
        };
        let fields = input.normalize().unwrap();
        assert_eq!(fields.title, "Pancakes");
        assert_eq!(fields.description, None);
        assert_eq!(fields.instructions.as_deref(), Some("Mix\nFry"));
        assert_eq!(fields.prep_minutes, 0);
        assert_eq!(fields.cook_minutes, 0);
        assert_eq!(fields.servings, 1);
    }

    #[test]
    fn test_ingredient_tabs_survive_normalize() {
        let rows = vec![
            IngredientRow::new("Flour", "200", "g"),
            IngredientRow::new("Eggs", "2", ""),
        ];
        let text = format_ingredients(&rows);
        assert_eq!(text, "Flour\t200\tg\nEggs\t2\t");

        let fields = NewRecipe {
            ingredients: Some(format!("\n{text}\r\n  \n")),
            ..NewRecipe::titled("Pancakes")
        }
        .normalize()
        .unwrap();
        assert_eq!(fields.ingredients.as_deref(), Some(text.as_str()));
        assert_eq!(parse_ingredients(&text), rows);

        let changes = RecipeUpdate {
            ingredients: Some(text.clone()),
            ..RecipeUpdate::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(changes.ingredients, Some(Some(text)));

        let blank = RecipeUpdate {
            ingredients: Some("\t\t\n \n".to_string()),
            ..RecipeUpdate::default()
        };
        assert_eq!(blank.normalize().unwrap().ingredients, Some(None));
    }

    #[test]
    fn test_serves_wins_over_servings() {
        let input = NewRecipe {
            title: "Soup".to_string(),
            servings: Some(2),
            serves: Some(6),
            ..NewRecipe::default()
        };
        assert_eq!(input.normalize().unwrap().servings, 6);

        let update = RecipeUpdate {
            servings: Some(3),
            serves: Some(5),
            ..RecipeUpdate::default()
        };
        assert_eq!(update.normalize().unwrap().servings, Some(5));
    }

    #[test]
    fn test_blank_title_rejected() {
        let err = NewRecipe::titled("   ").normalize().unwrap_err();
        assert!(err.is_validation());

        let update = RecipeUpdate {
            title: Some(String::new()),
            ..RecipeUpdate::default()
        };
        assert!(update.normalize().unwrap_err().is_validation());
    }

    #[test]
    fn test_update_image_change() {
        let image = ImageAttachment {
            bytes: vec![1, 2, 3],
            mime: "image/png".to_string(),
            filename: "a.png".to_string(),
        };
        let keep = RecipeUpdate::default().normalize().unwrap();
        assert!(matches!(keep.image, ImageChange::Keep));

        let clear = RecipeUpdate {
            keep_existing_image: false,
            ..RecipeUpdate::default()
        };
        assert!(matches!(clear.normalize().unwrap().image, ImageChange::Clear));

        for keep_existing_image in [true, false] {
            let replace = RecipeUpdate {
                image: Some(image.clone()),
                keep_existing_image,
                ..RecipeUpdate::default()
            };
            assert!(matches!(replace.normalize().unwrap().image, ImageChange::Replace(_)));
        }
    }

    #[test]
    fn test_lenient_json_numbers() {
        let recipe: NewRecipe = serde_json::from_value(serde_json::json!({
            "title": "Stew",
            "prep_minutes": "20",
            "cook_minutes": "about an hour",
            "serves": 4.0,
            "steps": "Brown the meat"
        }))
        .unwrap();
        assert_eq!(recipe.prep_minutes, Some(20));
        assert_eq!(recipe.cook_minutes, Some(0));
        assert_eq!(recipe.serves, Some(4));
        assert_eq!(recipe.instructions.as_deref(), Some("Brown the meat"));

        let update: RecipeUpdate = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(update.keep_existing_image);
        assert!(update.title.is_none());
    }

    #[test]
    fn test_recipe_helpers() {
        let recipe = Recipe {
            id: 1,
            title: "Tacos".to_string(),
            description: None,
            ingredients: Some("Tortillas\t8\tpcs".to_string()),
            instructions: Some("Warm tortillas\n\n Fill them ".to_string()),
            tags: Some("mexican, quick,,".to_string()),
            prep_minutes: 10,
            cook_minutes: 5,
            servings: 4,
            image: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(recipe.ingredient_rows(), vec![IngredientRow::new("Tortillas", "8", "pcs")]);
        assert_eq!(recipe.instruction_lines(), vec!["Warm tortillas", "Fill them"]);
        assert_eq!(recipe.tag_list(), vec!["mexican", "quick"]);
        assert!(!recipe.has_image());
    }
}
