//! cellbook CLI entry point.
//!
//! Manages notebooks in the local file store: list, inspect, create,
//! retitle and clone them. Cells are never executed here.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cellbook::auth::UserInfo;
use cellbook::cell::CellId;
use cellbook::document::NotebookDoc;
use cellbook::output::LogTarget;
use cellbook::rpc::RpcHandle;
use cellbook::settings::{load_settings, save_settings, settings_path, NotebookSettings};
use cellbook::store::{FileStore, Persistence};
use cellbook::vm::{Vm, VmError};
use cellbook::{Notebook, NotebookConfig};
use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::info;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Parser, Debug)]
#[command(name = "cellbook")]
#[command(about = "Manage cellbook notebooks stored on this machine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List notebooks, most recently touched first
    List {
        /// Only notebooks owned by this user id
        #[arg(long)]
        owner: Option<String>,

        /// Maximum number of notebooks (default: recent_limit setting)
        #[arg(long)]
        limit: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print a notebook's cells
    Show {
        id: String,

        /// Output the stored document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a notebook
    New {
        #[arg(long, default_value = "")]
        title: String,

        /// Cell source, repeatable. Without any, the notebook gets the
        /// placeholder cell.
        #[arg(long = "cell")]
        cells: Vec<String>,

        #[command(flatten)]
        user: UserArgs,
    },

    /// Rename a notebook you own
    Retitle {
        id: String,
        title: String,

        #[command(flatten)]
        user: UserArgs,
    },

    /// Copy a notebook into a new one owned by you
    Clone {
        id: String,

        #[command(flatten)]
        user: UserArgs,
    },

    /// Show the settings file and effective values
    Settings {
        /// Write the effective settings back to disk
        #[arg(long)]
        write: bool,
    },
}

#[derive(clap::Args, Debug)]
struct UserArgs {
    /// User id to act as
    #[arg(long)]
    uid: Option<String>,

    /// Display name (defaults to the user id)
    #[arg(long)]
    name: Option<String>,
}

impl UserArgs {
    fn user(&self) -> Option<UserInfo> {
        self.uid.as_ref().map(|uid| {
            UserInfo::new(uid.clone(), self.name.clone().unwrap_or_else(|| uid.clone()))
        })
    }
}

/// VM for notebooks that are only edited, never run.
struct DetachedVm;

impl Vm for DetachedVm {
    fn exec(&self, _code: &str, cell_id: &CellId) -> BoxFuture<'static, Result<(), VmError>> {
        let message = format!("cannot run {cell_id}: no VM attached");
        futures::future::ready(Err(VmError::Exec(message))).boxed()
    }

    fn destroy(&self) {}
}

#[derive(Serialize, Tabled)]
struct NotebookRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TITLE")]
    title: String,
    #[tabled(rename = "OWNER")]
    owner: String,
    #[tabled(rename = "CELLS")]
    cells: usize,
    #[tabled(rename = "UPDATED")]
    updated: String,
}

impl From<&NotebookDoc> for NotebookRow {
    fn from(doc: &NotebookDoc) -> Self {
        NotebookRow {
            id: doc.id.clone().unwrap_or_else(|| "-".to_string()),
            title: doc.display_title().to_string(),
            owner: doc
                .owner
                .as_ref()
                .map(|o| o.display_name.clone())
                .unwrap_or_else(|| "-".to_string()),
            cells: doc.cells.len(),
            updated: doc.last_touched().format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = load_settings();
    let store = Arc::new(FileStore::new(settings.resolved_store_dir()));
    info!("[cellbook] Store: {}", store.dir().display());

    match cli.command {
        Commands::List { owner, limit, json } => {
            list_notebooks(&store, owner, limit.unwrap_or(settings.recent_limit), json).await
        }
        Commands::Show { id, json } => show_notebook(&store, &id, json).await,
        Commands::New { title, cells, user } => {
            new_notebook(&settings, store, title, cells, user.user()).await
        }
        Commands::Retitle { id, title, user } => {
            retitle_notebook(&settings, store, &id, title, user.user()).await
        }
        Commands::Clone { id, user } => clone_notebook(&settings, store, &id, user.user()).await,
        Commands::Settings { write } => show_settings(&settings, write),
    }
}

fn open_notebook(
    settings: &NotebookSettings,
    store: Arc<FileStore>,
    doc: NotebookDoc,
) -> Notebook<DetachedVm> {
    Notebook::open(doc, Arc::new(LogTarget), |_: RpcHandle| DetachedVm)
        .with_config(NotebookConfig::from(settings))
        .with_persistence(store)
}

async fn list_notebooks(
    store: &FileStore,
    owner: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let mut docs = match &owner {
        Some(uid) => store.list_by_owner(uid).await?,
        None => store.list_recent(limit).await?,
    };
    docs.truncate(limit);

    let rows: Vec<NotebookRow> = docs.iter().map(NotebookRow::from).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No notebooks found.");
    } else {
        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }
    Ok(())
}

async fn show_notebook(store: &FileStore, id: &str, json: bool) -> Result<()> {
    let doc = store
        .get(id)
        .await
        .with_context(|| format!("Failed to load notebook {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", doc.display_title());
    if let Some(owner) = &doc.owner {
        println!("Owner: {} ({})", owner.display_name, owner.uid);
    }
    println!("Created: {}", doc.created.to_rfc3339());
    for (i, code) in doc.cells.iter().enumerate() {
        println!();
        println!("[{}]", i + 1);
        println!("{}", code);
    }
    Ok(())
}

async fn new_notebook(
    settings: &NotebookSettings,
    store: Arc<FileStore>,
    title: String,
    cells: Vec<String>,
    user: Option<UserInfo>,
) -> Result<()> {
    let notebook = open_notebook(settings, store, NotebookDoc::new(user, cells, title));
    let doc = notebook.save().await?;
    println!("{}", doc.id.unwrap_or_default());
    Ok(())
}

async fn retitle_notebook(
    settings: &NotebookSettings,
    store: Arc<FileStore>,
    id: &str,
    title: String,
    user: Option<UserInfo>,
) -> Result<()> {
    let doc = store
        .get(id)
        .await
        .with_context(|| format!("Failed to load notebook {id}"))?;
    let notebook = open_notebook(settings, store, doc);

    notebook.begin_title_edit(user.as_ref())?;
    notebook.set_title(title);
    let saved = notebook.save().await?;
    println!("Renamed {} to \"{}\"", id, saved.display_title());
    Ok(())
}

async fn clone_notebook(
    settings: &NotebookSettings,
    store: Arc<FileStore>,
    id: &str,
    user: Option<UserInfo>,
) -> Result<()> {
    let Some(user) = user else {
        bail!("Cloning requires --uid");
    };
    let doc = store
        .get(id)
        .await
        .with_context(|| format!("Failed to load notebook {id}"))?;
    let notebook = open_notebook(settings, store, doc);

    let new_id = notebook.clone_for(Some(&user)).await?;
    println!("{}", new_id);
    Ok(())
}

fn show_settings(settings: &NotebookSettings, write: bool) -> Result<()> {
    let path = settings_path();
    if write {
        save_settings(settings)?;
        println!("Wrote {}", path.display());
    } else {
        println!("Settings file: {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(settings)?);
    println!("Store: {}", settings.resolved_store_dir().display());
    Ok(())
}
