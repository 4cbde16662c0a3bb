//! Server-rendered HTML: the A–Z list, the add/edit form, the recipe view and
//! the status page.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use cookbook_core::models::{
    ImageAttachment, IngredientRow, NewRecipe, Recipe, RecipeSummary, RecipeUpdate,
    coerce_minutes, coerce_servings, format_ingredients,
};
use cookbook_core::photo::{ACCEPTED_EXTENSIONS, has_accepted_extension, prepare_image};

use super::{ApiError, AppState, PageError};
use crate::commands::helpers::{count_sentence, serves_sentence};

/// Servings preselected on a blank form.
const DEFAULT_FORM_SERVES: i64 = 2;
/// Largest value offered by the servings select.
const MAX_FORM_SERVES: i64 = 20;

const NOT_FOUND_MESSAGE: &str = "Recipe not found. It may have been deleted.";

// --- List ---

#[derive(Deserialize)]
pub(super) struct IndexQuery {
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct LetterSection {
    letter: char,
    recipes: Vec<RecipeSummary>,
}

/// Bucket recipes by the first letter of their title. Anything that does not
/// start with A–Z is filed under Z. Every letter gets a section, empty or not.
fn group_by_letter(recipes: Vec<RecipeSummary>) -> Vec<LetterSection> {
    let mut sections: Vec<LetterSection> = ('A'..='Z')
        .map(|letter| LetterSection {
            letter,
            recipes: Vec::new(),
        })
        .collect();
    for recipe in recipes {
        let first = recipe
            .title
            .trim()
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase());
        let slot = match first {
            Some(c @ 'A'..='Z') => (c as u8 - b'A') as usize,
            _ => 25,
        };
        sections[slot].recipes.push(recipe);
    }
    for section in &mut sections {
        section
            .recipes
            .sort_by_cached_key(|r| (r.title.trim().to_lowercase(), r.id));
    }
    sections
}

pub(super) async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Result<Html<String>, PageError> {
    let q = query.q.unwrap_or_default().trim().to_string();
    let search = q.clone();
    let (total, recipes) = state
        .with_db(move |db| Ok((db.count()?, db.list(Some(search.as_str()), None)?)))
        .await?;

    let mut context = tera::Context::new();
    context.insert("count_sentence", &count_sentence(total));
    context.insert("q", &q);
    context.insert("shown", &recipes.len());
    context.insert("sections", &group_by_letter(recipes));
    Ok(state.render("list.html", &context)?)
}

// --- Add / edit form ---

/// What the form currently holds. Numbers stay as typed so a re-render shows
/// the user's input back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct RecipeForm {
    title: String,
    serves: i64,
    description: String,
    instructions: String,
    tags: String,
    prep_minutes: String,
    cook_minutes: String,
    rows: Vec<IngredientRow>,
}

impl Default for RecipeForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            serves: DEFAULT_FORM_SERVES,
            description: String::new(),
            instructions: String::new(),
            tags: String::new(),
            prep_minutes: String::new(),
            cook_minutes: String::new(),
            rows: vec![IngredientRow::default()],
        }
    }
}

impl RecipeForm {
    fn from_recipe(recipe: &Recipe) -> Self {
        let mut form = Self {
            title: recipe.title.clone(),
            serves: recipe.servings,
            description: recipe.description.clone().unwrap_or_default(),
            instructions: recipe.instructions.clone().unwrap_or_default(),
            tags: recipe.tags.clone().unwrap_or_default(),
            prep_minutes: recipe.prep_minutes.to_string(),
            cook_minutes: recipe.cook_minutes.to_string(),
            rows: recipe.ingredient_rows(),
        };
        form.ensure_row();
        form
    }

    fn ensure_row(&mut self) {
        if self.rows.is_empty() {
            self.rows.push(IngredientRow::default());
        }
    }

    fn apply(&mut self, action: FormAction) {
        match action {
            FormAction::AddRow => self.rows.push(IngredientRow::default()),
            FormAction::DeleteRow(index) if index < self.rows.len() => {
                self.rows.remove(index);
            }
            FormAction::DeleteRow(_) | FormAction::Save => {}
        }
        self.ensure_row();
    }

    fn ingredients_text(&self) -> String {
        format_ingredients(&self.rows)
    }

    fn to_new_recipe(&self, image: Option<ImageAttachment>) -> NewRecipe {
        NewRecipe {
            title: self.title.clone(),
            description: Some(self.description.clone()),
            ingredients: Some(self.ingredients_text()),
            instructions: Some(self.instructions.clone()),
            tags: Some(self.tags.clone()),
            prep_minutes: Some(coerce_minutes(&self.prep_minutes)),
            cook_minutes: Some(coerce_minutes(&self.cook_minutes)),
            serves: Some(self.serves),
            image,
            ..NewRecipe::default()
        }
    }

    /// Every field on the form is written; the stored image is kept unless a
    /// new one was uploaded.
    fn to_update(&self, image: Option<ImageAttachment>) -> RecipeUpdate {
        RecipeUpdate {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            ingredients: Some(self.ingredients_text()),
            instructions: Some(self.instructions.clone()),
            tags: Some(self.tags.clone()),
            prep_minutes: Some(coerce_minutes(&self.prep_minutes)),
            cook_minutes: Some(coerce_minutes(&self.cook_minutes)),
            serves: Some(self.serves),
            image,
            keep_existing_image: true,
            ..RecipeUpdate::default()
        }
    }
}

/// Which submit button was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormAction {
    Save,
    AddRow,
    DeleteRow(usize),
}

impl FormAction {
    fn parse(value: &str) -> Self {
        match value {
            "add_row" => Self::AddRow,
            other => other
                .strip_prefix("del_row:")
                .and_then(|n| n.parse().ok())
                .map_or(Self::Save, Self::DeleteRow),
        }
    }
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

fn multipart_error(err: &axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(err.body_text())
}

async fn read_form(
    mut multipart: Multipart,
) -> Result<(RecipeForm, FormAction, Option<Upload>), ApiError> {
    let mut form = RecipeForm {
        rows: Vec::new(),
        ..RecipeForm::default()
    };
    let mut action = FormAction::Save;
    let mut upload = None;
    let (mut names, mut amounts, mut units) = (Vec::new(), Vec::new(), Vec::new());

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&e))? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|e| multipart_error(&e))?;
            if !filename.is_empty() && !bytes.is_empty() {
                upload = Some(Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let value = field.text().await.map_err(|e| multipart_error(&e))?;
        match name.as_str() {
            "title" => form.title = value,
            "serves" => form.serves = coerce_servings(&value),
            "description" => form.description = value,
            "instructions" => form.instructions = value,
            "tags" => form.tags = value,
            "prep_minutes" => form.prep_minutes = value,
            "cook_minutes" => form.cook_minutes = value,
            "ing_name" => names.push(value),
            "ing_amount" => amounts.push(value),
            "ing_unit" => units.push(value),
            "action" => action = FormAction::parse(&value),
            _ => {}
        }
    }

    form.rows = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            IngredientRow::new(
                name,
                amounts.get(i).cloned().unwrap_or_default(),
                units.get(i).cloned().unwrap_or_default(),
            )
        })
        .collect();
    form.ensure_row();
    Ok((form, action, upload))
}

/// Check the extension, then decode and shrink off the async workers.
async fn prepare_upload(upload: Option<Upload>) -> Result<Option<ImageAttachment>, ApiError> {
    let Some(Upload { filename, bytes }) = upload else {
        return Ok(None);
    };
    if !has_accepted_extension(&filename) {
        return Err(ApiError::BadRequest(format!(
            "Images must be one of: {}.",
            ACCEPTED_EXTENSIONS.join(", ")
        )));
    }
    let image = tokio::task::spawn_blocking(move || prepare_image(&bytes, &filename))
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;
    Ok(Some(image))
}

/// Fixed parts of the form page that differ between add and edit.
struct FormPage {
    heading: &'static str,
    action_url: String,
    cancel_url: String,
    image_url: Option<String>,
}

impl FormPage {
    fn new_recipe() -> Self {
        Self {
            heading: "Add recipe",
            action_url: "/recipes/new".to_string(),
            cancel_url: "/".to_string(),
            image_url: None,
        }
    }

    fn edit(recipe: &Recipe) -> Self {
        Self {
            heading: "Edit recipe",
            action_url: format!("/recipes/{}/edit", recipe.id),
            cancel_url: format!("/recipes/{}", recipe.id),
            image_url: recipe
                .has_image()
                .then(|| format!("/recipes/{}/image", recipe.id)),
        }
    }
}

fn render_form(
    state: &AppState,
    page: &FormPage,
    form: &RecipeForm,
    error: Option<&str>,
) -> Result<Response, ApiError> {
    let mut context = tera::Context::new();
    context.insert("heading", page.heading);
    context.insert("action_url", &page.action_url);
    context.insert("cancel_url", &page.cancel_url);
    context.insert("image_url", &page.image_url);
    context.insert("form", form);
    context.insert(
        "serves_options",
        &(1..=MAX_FORM_SERVES.max(form.serves)).collect::<Vec<_>>(),
    );
    context.insert("accept", &accept_attribute());
    context.insert("error", &error);

    let html = state.render("form.html", &context)?;
    let status = if error.is_some() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((status, html).into_response())
}

fn accept_attribute() -> String {
    ACCEPTED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn not_found_page(state: &AppState) -> Result<Response, ApiError> {
    let mut context = tera::Context::new();
    context.insert("heading", "Recipe not found");
    context.insert("message", NOT_FOUND_MESSAGE);
    let html = state.render("message.html", &context)?;
    Ok((StatusCode::NOT_FOUND, html).into_response())
}

async fn load_recipe(state: &AppState, id: i64) -> Result<Option<Recipe>, ApiError> {
    state.with_db(move |db| db.get(id)).await
}

pub(super) async fn new_recipe_form(State(state): State<AppState>) -> Result<Response, PageError> {
    Ok(render_form(
        &state,
        &FormPage::new_recipe(),
        &RecipeForm::default(),
        None,
    )?)
}

pub(super) async fn submit_new_recipe(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, PageError> {
    let (mut form, action, upload) = read_form(multipart).await?;
    let page = FormPage::new_recipe();
    if action != FormAction::Save {
        form.apply(action);
        return Ok(render_form(&state, &page, &form, None)?);
    }

    let saved = async {
        let image = prepare_upload(upload).await?;
        let recipe = form.to_new_recipe(image);
        state.with_db(move |db| db.add(&recipe)).await
    }
    .await;

    match saved {
        Ok(id) => {
            tracing::info!(id, "recipe added from the web form");
            Ok(Redirect::to(&format!("/recipes/{id}")).into_response())
        }
        Err(ApiError::BadRequest(message)) => {
            Ok(render_form(&state, &page, &form, Some(&message))?)
        }
        Err(err) => Err(err.into()),
    }
}

pub(super) async fn edit_recipe_form(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, PageError> {
    let Some(recipe) = load_recipe(&state, id).await? else {
        return Ok(not_found_page(&state)?);
    };
    Ok(render_form(
        &state,
        &FormPage::edit(&recipe),
        &RecipeForm::from_recipe(&recipe),
        None,
    )?)
}

pub(super) async fn submit_edit_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Response, PageError> {
    let Some(existing) = load_recipe(&state, id).await? else {
        return Ok(not_found_page(&state)?);
    };
    let (mut form, action, upload) = read_form(multipart).await?;
    let page = FormPage::edit(&existing);
    if action != FormAction::Save {
        form.apply(action);
        return Ok(render_form(&state, &page, &form, None)?);
    }

    let saved = async {
        let image = prepare_upload(upload).await?;
        let update = form.to_update(image);
        state.with_db(move |db| db.update(id, &update)).await
    }
    .await;

    match saved {
        Ok(0) => Ok(not_found_page(&state)?),
        Ok(_) => {
            tracing::info!(id, "recipe updated from the web form");
            Ok(Redirect::to(&format!("/recipes/{id}")).into_response())
        }
        Err(ApiError::BadRequest(message)) => {
            Ok(render_form(&state, &page, &form, Some(&message))?)
        }
        Err(err) => Err(err.into()),
    }
}

// --- View / delete / image ---

#[derive(Deserialize)]
pub(super) struct ViewQuery {
    confirm_delete: Option<String>,
}

/// Ingredients written by the table editor are shown as bullets; older
/// free-text entries are shown as typed.
fn has_ingredient_table(ingredients: &str) -> bool {
    ingredients.lines().any(|line| line.contains('\t'))
}

pub(super) async fn view_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ViewQuery>,
) -> Result<Response, PageError> {
    let Some(recipe) = load_recipe(&state, id).await? else {
        return Ok(not_found_page(&state)?);
    };

    let ingredients = recipe.ingredients.as_deref().unwrap_or_default();
    let (ingredient_lines, ingredients_text) = if has_ingredient_table(ingredients) {
        let lines: Vec<String> = recipe
            .ingredient_rows()
            .iter()
            .map(IngredientRow::display_line)
            .collect();
        (lines, None)
    } else {
        (Vec::new(), recipe.ingredients.clone())
    };
    let confirm_delete = query
        .confirm_delete
        .is_some_and(|v| !v.is_empty() && v != "0");

    let mut context = tera::Context::new();
    context.insert("recipe", &recipe);
    context.insert("serves_sentence", &serves_sentence(recipe.servings));
    context.insert("ingredient_lines", &ingredient_lines);
    context.insert("ingredients_text", &ingredients_text);
    context.insert("tags", &recipe.tag_list());
    context.insert(
        "image_url",
        &recipe
            .has_image()
            .then(|| format!("/recipes/{id}/image")),
    );
    context.insert("confirm_delete", &confirm_delete);
    Ok(state.render("view.html", &context)?.into_response())
}

pub(super) async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Redirect, PageError> {
    state.with_db(move |db| db.delete(id)).await?;
    tracing::info!(id, "recipe deleted from the web UI");
    Ok(Redirect::to("/"))
}

pub(super) async fn recipe_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let image = load_recipe(&state, id)
        .await?
        .and_then(|recipe| recipe.image)
        .ok_or_else(|| ApiError::NotFound(format!("Recipe {id} has no image")))?;
    let content_type = HeaderValue::from_str(&image.mime)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        image.bytes,
    )
        .into_response())
}

// --- Status ---

async fn render_status(state: &AppState, run_self_test: bool) -> Result<Html<String>, ApiError> {
    let (status, report) = state
        .with_db(move |db| {
            let report = run_self_test.then(|| db.self_test());
            Ok((db.status(), report))
        })
        .await?;

    let mut context = tera::Context::new();
    context.insert("status", &status);
    context.insert("self_test", &report);
    state.render("status.html", &context)
}

pub(super) async fn status(State(state): State<AppState>) -> Result<Html<String>, PageError> {
    Ok(render_status(&state, false).await?)
}

pub(super) async fn run_self_test(State(state): State<AppState>) -> Result<Html<String>, PageError> {
    Ok(render_status(&state, true).await?)
}
