mod commands;
mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    RecipeFieldArgs, cmd_add, cmd_count, cmd_delete, cmd_edit, cmd_import, cmd_list, cmd_show,
    cmd_status,
};
use crate::config::{Config, DbArgs};
use cookbook_core::db::Database;

#[derive(Parser)]
#[command(
    name = "cookbook",
    version,
    about = "A personal cook book",
    long_about = "A personal cook book.\n\n\
                  Recipes live in a local SQLite file by default, or in Postgres when a\n\
                  connection is configured with flags, a secrets file or DATABASE_URL."
)]
struct Cli {
    #[command(flatten)]
    db: DbArgs,
    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a recipe
    Add {
        /// Recipe title
        title: String,
        #[command(flatten)]
        fields: RecipeFieldArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes alphabetically
    List {
        /// Only recipes whose title or tags contain this text
        #[arg(short = 'q', long)]
        search: Option<String>,
        /// Maximum number of recipes to show
        #[arg(short = 'n', long)]
        limit: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe
    Show {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a recipe; omitted fields are left alone
    Edit {
        /// Recipe ID
        id: i64,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: RecipeFieldArgs,
        /// Remove all ingredients
        #[arg(long)]
        clear_ingredients: bool,
        /// Remove the stored image
        #[arg(long, conflicts_with = "image")]
        remove_image: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show how many recipes are stored
    Count {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which database is in use and whether it is reachable
    Status {
        /// Also write, read back and delete a throwaway recipe
        #[arg(long)]
        self_test: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a recipe from a Cooklang (.cook) file
    Import {
        /// Path to .cook file
        file: PathBuf,
        /// Override the recipe title (default: from metadata or file name)
        #[arg(long)]
        title: Option<String>,
        /// Override servings (default: from metadata, or 1)
        #[arg(long)]
        serves: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the web UI and JSON API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

fn init_logging(verbose: bool, serving: bool) {
    let default = match (verbose, serving) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    };
    let env_filter = if verbose {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, matches!(cli.command, Commands::Serve { .. }));

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let resolved = config.resolve(&cli.db)?;
    let db = Database::open(&resolved.config).with_context(|| {
        format!(
            "Failed to open {} database at {}",
            resolved.config.engine(),
            resolved.config.describe()
        )
    })?;

    match cli.command {
        Commands::Add {
            title,
            fields,
            json,
        } => cmd_add(&db, &title, &fields, json),
        Commands::List {
            search,
            limit,
            json,
        } => cmd_list(&db, search.as_deref(), limit, json),
        Commands::Show { id, json } => cmd_show(&db, id, json),
        Commands::Edit {
            id,
            title,
            fields,
            clear_ingredients,
            remove_image,
            json,
        } => cmd_edit(&db, id, title, &fields, clear_ingredients, remove_image, json),
        Commands::Delete { id, json } => cmd_delete(&db, id, json),
        Commands::Count { json } => cmd_count(&db, json),
        Commands::Status { self_test, json } => cmd_status(&db, self_test, json),
        Commands::Import {
            file,
            title,
            serves,
            json,
        } => cmd_import(&db, &file, title, serves, json),
        Commands::Serve { port, bind } => server::run(db, port, &bind),
    }
}
