use anyhow::{Result, bail};
use std::path::PathBuf;

use cookbook_core::db::Database;
use cookbook_core::models::{NewRecipe, Recipe, RecipeUpdate, format_ingredients};

use super::helpers::{
    count_sentence, exit_not_found, load_image, parse_ingredient_arg, print_recipe_table,
    serves_sentence,
};

/// Field flags shared by `add` and `edit`.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct RecipeFieldArgs {
    /// Ingredient as "name|amount|unit" (repeatable)
    #[arg(short, long = "ingredient", value_name = "NAME|AMOUNT|UNIT")]
    pub ingredients: Vec<String>,
    /// Instructions, one step per line
    #[arg(long)]
    pub instructions: Option<String>,
    /// Short description or notes
    #[arg(long, alias = "notes")]
    pub description: Option<String>,
    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,
    /// Preparation time in minutes
    #[arg(long, allow_negative_numbers = true)]
    pub prep: Option<i64>,
    /// Cooking time in minutes
    #[arg(long, allow_negative_numbers = true)]
    pub cook: Option<i64>,
    /// Number of people the recipe serves
    #[arg(short, long, alias = "servings", allow_negative_numbers = true)]
    pub serves: Option<i64>,
    /// Image file (png, jpg, jpeg or webp); shrunk to fit 200x200
    #[arg(long, value_name = "FILE")]
    pub image: Option<PathBuf>,
}

impl RecipeFieldArgs {
    fn ingredients_text(&self) -> Result<Option<String>> {
        if self.ingredients.is_empty() {
            return Ok(None);
        }
        let rows = self
            .ingredients
            .iter()
            .map(|s| parse_ingredient_arg(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(format_ingredients(&rows)))
    }
}

pub(crate) fn cmd_add(db: &Database, title: &str, fields: &RecipeFieldArgs, json: bool) -> Result<()> {
    let recipe = NewRecipe {
        title: title.to_string(),
        description: fields.description.clone(),
        ingredients: fields.ingredients_text()?,
        instructions: fields.instructions.clone(),
        tags: fields.tags.clone(),
        prep_minutes: fields.prep,
        cook_minutes: fields.cook,
        serves: fields.serves,
        image: fields.image.as_deref().map(load_image).transpose()?,
        ..NewRecipe::default()
    };
    let id = db.add(&recipe)?;

    if json {
        let created = db.get(id)?;
        println!("{}", serde_json::to_string_pretty(&created)?);
    } else {
        println!("Added recipe: {} (id: {id})", recipe.title.trim());
    }
    Ok(())
}

pub(crate) fn cmd_list(
    db: &Database,
    search: Option<&str>,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let recipes = db.list(search, limit)?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else if let Some(q) = search {
            eprintln!("No recipes matching '{q}'");
        } else {
            eprintln!("No recipes yet. Add one with: cookbook add \"<title>\"");
        }
        std::process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
    } else {
        print_recipe_table(&recipes);
    }
    Ok(())
}

pub(crate) fn cmd_show(db: &Database, id: i64, json: bool) -> Result<()> {
    let Some(recipe) = db.get(id)? else {
        exit_not_found(&format!("Recipe {id} not found"), json);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        print_recipe(&recipe);
    }
    Ok(())
}

fn print_recipe(recipe: &Recipe) {
    println!("=== {} ===", recipe.title);
    println!("  {}", serves_sentence(recipe.servings));
    if recipe.prep_minutes > 0 || recipe.cook_minutes > 0 {
        println!(
            "  Prep: {} min  |  Cook: {} min",
            recipe.prep_minutes, recipe.cook_minutes
        );
    }
    let tags = recipe.tag_list();
    if !tags.is_empty() {
        println!("  Tags: {}", tags.join(", "));
    }
    if let Some(image) = &recipe.image {
        println!("  Image: {} ({}, {} bytes)", image.filename, image.mime, image.bytes.len());
    }
    if let Some(description) = &recipe.description {
        println!("\n  {description}");
    }

    let rows = recipe.ingredient_rows();
    if !rows.is_empty() {
        println!("\n  INGREDIENTS:");
        for row in &rows {
            println!("    - {}", row.display_line());
        }
    }

    let steps = recipe.instruction_lines();
    if !steps.is_empty() {
        println!("\n  INSTRUCTIONS:");
        for step in steps {
            println!("    {step}");
        }
    }
}

pub(crate) fn cmd_edit(
    db: &Database,
    id: i64,
    title: Option<String>,
    fields: &RecipeFieldArgs,
    clear_ingredients: bool,
    remove_image: bool,
    json: bool,
) -> Result<()> {
    if clear_ingredients && !fields.ingredients.is_empty() {
        bail!("--clear-ingredients cannot be combined with --ingredient");
    }
    let ingredients = if clear_ingredients {
        Some(String::new())
    } else {
        fields.ingredients_text()?
    };
    let update = RecipeUpdate {
        title,
        description: fields.description.clone(),
        ingredients,
        instructions: fields.instructions.clone(),
        tags: fields.tags.clone(),
        prep_minutes: fields.prep,
        cook_minutes: fields.cook,
        serves: fields.serves,
        image: fields.image.as_deref().map(load_image).transpose()?,
        keep_existing_image: !remove_image,
        ..RecipeUpdate::default()
    };

    if db.update(id, &update)? == 0 {
        exit_not_found(&format!("Recipe {id} not found"), json);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&db.get(id)?)?);
    } else {
        println!("Updated recipe {id}");
    }
    Ok(())
}

pub(crate) fn cmd_delete(db: &Database, id: i64, json: bool) -> Result<()> {
    let Some(recipe) = db.get(id)? else {
        exit_not_found(&format!("Recipe {id} not found"), json);
    };
    db.delete(id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted recipe: {} (id: {id})", recipe.title);
    }
    Ok(())
}

pub(crate) fn cmd_count(db: &Database, json: bool) -> Result<()> {
    let count = db.count()?;
    if json {
        println!("{}", serde_json::json!({ "count": count }));
    } else {
        println!("{}", count_sentence(count));
    }
    Ok(())
}
