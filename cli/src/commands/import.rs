use std::path::Path;

use anyhow::{Context, Result};

use cookbook_core::db::Database;
use cookbook_core::models::{IngredientRow, NewRecipe, format_ingredients};

/// Import a Cooklang (`.cook`) file as a new recipe.
pub(crate) fn cmd_import(
    db: &Database,
    file: &Path,
    title_override: Option<String>,
    serves_override: Option<i64>,
    json: bool,
) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let recipe = cooklang_to_recipe(&input, file, title_override, serves_override)?;
    let id = db.add(&recipe)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&db.get(id)?)?);
    } else {
        let rows = cookbook_core::models::parse_ingredients(
            recipe.ingredients.as_deref().unwrap_or_default(),
        );
        println!(
            "Imported recipe: {} (id: {id}, {} ingredients)",
            recipe.title,
            rows.len()
        );
    }
    Ok(())
}

fn cooklang_to_recipe(
    input: &str,
    file: &Path,
    title_override: Option<String>,
    serves_override: Option<i64>,
) -> Result<NewRecipe> {
    let (recipe_data, _report) = cooklang::parse(input)
        .into_result()
        .map_err(|e| anyhow::anyhow!("Failed to parse Cooklang file: {e}"))?;

    let title = title_override
        .or_else(|| recipe_data.metadata.title().map(String::from))
        .or_else(|| file.file_stem().and_then(|s| s.to_str()).map(String::from))
        .context("Could not determine recipe title. Use --title to specify one")?;

    let serves = serves_override.or_else(|| {
        recipe_data
            .metadata
            .servings()
            .and_then(|s| s.as_number())
            .map(i64::from)
    });

    let converter = cooklang::Converter::default();
    let rows: Vec<IngredientRow> = recipe_data
        .group_ingredients(&converter)
        .iter()
        .map(cooklang_ingredient_row)
        .collect();

    let steps = render_steps(&recipe_data);

    Ok(NewRecipe {
        title,
        ingredients: Some(format_ingredients(&rows)),
        instructions: Some(steps.join("\n")),
        serves,
        ..NewRecipe::default()
    })
}

fn cooklang_ingredient_row(gi: &cooklang::ingredient_list::GroupedIngredient<'_>) -> IngredientRow {
    let (amount, unit) = gi
        .quantity
        .iter()
        .next()
        .map_or((String::new(), String::new()), |qty: &cooklang::Quantity| {
            let amount = match qty.value() {
                cooklang::Value::Number(n) => format_amount(n.value()),
                cooklang::Value::Range { start, end } => {
                    format!("{}-{}", format_amount(start.value()), format_amount(end.value()))
                }
                cooklang::Value::Text(t) => t.clone(),
            };
            (amount, qty.unit().map(String::from).unwrap_or_default())
        });

    IngredientRow::new(gi.ingredient.display_name().to_string(), amount, unit)
}

/// Render each step as one line of plain text, ingredients and cookware by name.
fn render_steps(recipe: &cooklang::Recipe) -> Vec<String> {
    use cooklang::model::{Content, Item};

    let mut lines = Vec::new();
    for section in &recipe.sections {
        for content in &section.content {
            let line = match content {
                Content::Step(step) => step
                    .items
                    .iter()
                    .map(|item| match item {
                        Item::Text { value } => value.clone(),
                        Item::Ingredient { index } => recipe.ingredients[*index]
                            .display_name()
                            .to_string(),
                        Item::Cookware { index } => recipe.cookware[*index].name.clone(),
                        Item::Timer { index } => {
                            let timer = &recipe.timers[*index];
                            timer
                                .quantity
                                .as_ref()
                                .map(ToString::to_string)
                                .or_else(|| timer.name.clone())
                                .unwrap_or_default()
                        }
                        Item::InlineQuantity { index } => {
                            recipe.inline_quantities[*index].to_string()
                        }
                    })
                    .collect::<String>(),
                Content::Text(text) => text.clone(),
            };
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
    }
    lines
}

/// `2.0` → `2`, `0.5` → `0.5`.
fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        let s = format!("{value:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
