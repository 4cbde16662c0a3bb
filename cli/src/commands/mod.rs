pub(crate) mod helpers;
mod import;
mod recipe;
mod status;

pub(crate) use import::cmd_import;
pub(crate) use recipe::{
    RecipeFieldArgs, cmd_add, cmd_count, cmd_delete, cmd_edit, cmd_list, cmd_show,
};
pub(crate) use status::cmd_status;
