use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::Path;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use cookbook_core::models::{ImageAttachment, IngredientRow, RecipeSummary};
use cookbook_core::photo::{ACCEPTED_EXTENSIONS, has_accepted_extension, prepare_image};

/// Parse an `--ingredient` value: `name`, `name|amount` or `name|amount|unit`.
pub(crate) fn parse_ingredient_arg(s: &str) -> Result<IngredientRow> {
    let mut parts = s.splitn(3, '|').map(str::trim);
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        bail!("Invalid ingredient '{s}'. Use 'name|amount|unit', e.g. 'Flour|200|g'");
    }
    let amount = parts.next().unwrap_or_default();
    let unit = parts.next().unwrap_or_default();
    Ok(IngredientRow::new(name, amount, unit))
}

/// Read an image from disk and shrink it for storage.
pub(crate) fn load_image(path: &Path) -> Result<ImageAttachment> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    if !has_accepted_extension(&filename) {
        bail!(
            "Unsupported image '{}'. Accepted types: {}",
            path.display(),
            ACCEPTED_EXTENSIONS.join(", ")
        );
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image: {}", path.display()))?;
    prepare_image(&bytes, &filename)
        .with_context(|| format!("Failed to process image: {}", path.display()))
}

/// `Serves for 1 person.` / `Serves for 4 people.`
pub(crate) fn serves_sentence(servings: i64) -> String {
    let noun = if servings == 1 { "person" } else { "people" };
    format!("Serves for {servings} {noun}.")
}

/// `You have 1 recipe in your cook book.`
pub(crate) fn count_sentence(count: i64) -> String {
    let noun = if count == 1 { "recipe" } else { "recipes" };
    format!("You have {count} {noun} in your cook book.")
}

pub(crate) fn print_recipe_table(recipes: &[RecipeSummary]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Serves")]
        servings: i64,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Image")]
        image: &'static str,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            title: truncate(&r.title, 40),
            servings: r.servings,
            tags: r
                .tags
                .as_deref()
                .map(|t| truncate(t, 30))
                .unwrap_or_default(),
            image: if r.has_image { "yes" } else { "" },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Print a "not found" message in the requested format and exit with code 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    std::process::exit(2);
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingredient_arg() {
        assert_eq!(
            parse_ingredient_arg("Flour|200|g").unwrap(),
            IngredientRow::new("Flour", "200", "g")
        );
        assert_eq!(
            parse_ingredient_arg(" Eggs | 3 ").unwrap(),
            IngredientRow::new("Eggs", "3", "")
        );
        assert_eq!(
            parse_ingredient_arg("Salt").unwrap(),
            IngredientRow::new("Salt", "", "")
        );
        assert_eq!(
            parse_ingredient_arg("Milk|1|cup|warm").unwrap(),
            IngredientRow::new("Milk", "1", "cup|warm")
        );
    }

    #[test]
    fn test_parse_ingredient_arg_invalid() {
        assert!(parse_ingredient_arg("").is_err());
        assert!(parse_ingredient_arg(" |200|g").is_err());
    }

    #[test]
    fn test_serves_sentence() {
        assert_eq!(serves_sentence(1), "Serves for 1 person.");
        assert_eq!(serves_sentence(4), "Serves for 4 people.");
    }

    #[test]
    fn test_count_sentence() {
        assert_eq!(count_sentence(0), "You have 0 recipes in your cook book.");
        assert_eq!(count_sentence(1), "You have 1 recipe in your cook book.");
    }

    #[test]
    fn test_load_image_rejects_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.gif");
        std::fs::write(&path, b"GIF89a").unwrap();
        let err = load_image(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported image"));
    }

    #[test]
    fn test_json_error() {
        assert_eq!(json_error("nope"), r#"{"error":"nope"}"#);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème brûlée au four", 10), "Crème b...");
        assert_eq!(truncate("Müsli", 10), "Müsli");
    }
}
