mod config;
mod error;
mod prompts;
mod remote;
mod settings;
mod storage;
mod surface;
mod sync;
mod view;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use std::error::Error;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::prompts::PromptDraft;
use crate::remote::RemoteClient;
use crate::remote::supabase::SupabaseClient;
use crate::settings::{Settings, SettingsUpdate};
use crate::storage::file_store::FileLocalStore;
use crate::surface::{PromptEdit, Surface};
use crate::sync::{MutationPath, SyncStatus};
use crate::view::{PromptQuery, ViewVariant};

#[derive(Parser)]
#[command(name = "promptkeep", about = "Prompt library with optional Supabase cloud sync")]
enum Cli {
    /// List prompts in the manager view (or the popup view with --popup)
    List {
        #[arg(long)]
        popup: bool,
        /// Only prompts carrying this tag
        #[arg(long)]
        tag: Option<String>,
        /// Case-insensitive search over title, content and tags
        #[arg(long)]
        query: Option<String>,
    },
    /// Show the tag list
    Tags {
        /// List the remote tag table instead
        #[arg(long)]
        remote: bool,
    },
    /// Add a prompt
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        /// Comma-separated tags
        #[arg(long, default_value = "")]
        tags: String,
        /// Add from the popup (local only)
        #[arg(long)]
        popup: bool,
    },
    /// Edit a prompt; omitted fields keep their value
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        tags: Option<String>,
    },
    /// Delete a prompt
    Delete {
        id: String,
        /// Skip the confirmation question
        #[arg(long)]
        yes: bool,
    },
    /// Copy a prompt's content to the clipboard
    Copy { id: String },
    /// Save a text selection as a new prompt (reads stdin without TEXT)
    Capture { text: Option<String> },
    /// Reconcile with the cloud once
    Sync,
    /// Keep a manager session open, syncing as connectivity and settings change
    Watch,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Check the Supabase URL and key
    TestConnection {
        #[command(flatten)]
        credentials: CredentialArgs,
    },
    /// Create the remote tables if they do not exist
    InitSchema {
        #[command(flatten)]
        credentials: CredentialArgs,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        anon_key: Option<String>,
        /// Seconds; 0 restores the default
        #[arg(long)]
        auto_save_interval: Option<u32>,
    },
}

/// Credentials to use instead of the saved ones.
#[derive(Args)]
struct CredentialArgs {
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    anon_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let cli = Cli::parse();
    let config = config::Config::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("promptkeep=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            enable_logs: true,
            ..Default::default()
        },
    ));

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let store = Arc::new(FileLocalStore::new(config.data_dir.clone()));
    tracing::debug!(dir = %config.data_dir.display(), "using data directory");

    match cli {
        Cli::List { popup, tag, query } => {
            let variant = if popup { ViewVariant::Popup } else { ViewVariant::Manager };
            let mut surface = Surface::open(variant, store, http).await?;
            if variant == ViewVariant::Manager {
                surface.start().await;
            }
            surface.set_query(PromptQuery::new(tag, query));
            print!("{}", surface.render());
            if variant == ViewVariant::Manager {
                println!("{}", surface.indicator_label());
            }
        }
        Cli::Tags { remote } => {
            if remote {
                let settings = load_settings_or_default(&store).await?;
                let client = SupabaseClient::new(http, settings.cloud_sync);
                for tag in client.list_tags().await? {
                    println!("{tag}");
                }
            } else {
                let surface = Surface::open(ViewVariant::Popup, store, http).await?;
                let facets = view::tag_facets(surface.coordinator().tags(), None);
                println!("{}", view::render_facets(&facets));
            }
        }
        Cli::Add { title, content, tags, popup } => {
            // Validate before touching any state.
            let draft = PromptDraft::from_form(&title, &content, &tags)?;
            let variant = if popup { ViewVariant::Popup } else { ViewVariant::Manager };
            let mut surface = Surface::open(variant, store, http).await?;
            let path = surface.add(draft).await?;
            println!("Prompt added: {}", describe(path));
        }
        Cli::Edit { id, title, content, tags } => {
            let mut surface = Surface::open(ViewVariant::Manager, store, http).await?;
            let path = surface.edit(&id, PromptEdit { title, content, tags }).await?;
            println!("Prompt updated: {}", describe(path));
        }
        Cli::Delete { id, yes } => {
            let mut surface = Surface::open(ViewVariant::Manager, store, http).await?;
            if surface.coordinator().get(&id).is_none() {
                return Err(error::PromptError::NotFound(id).into());
            }
            if !yes && !confirm("Are you sure you want to delete this prompt?")? {
                println!("Cancelled");
                return Ok(());
            }
            let path = surface.delete(&id).await?;
            println!("Prompt deleted: {}", describe(path));
        }
        Cli::Copy { id } => {
            let surface = Surface::open(ViewVariant::Popup, store, http).await?;
            surface.copy(&id)?;
            println!("Copied to clipboard");
        }
        Cli::Capture { text } => {
            let selection = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read selection from stdin")?;
                    buf
                }
            };
            let mut surface = Surface::open(ViewVariant::Popup, store, http).await?;
            let prompt = surface.capture(&selection).await?;
            println!("Saved \"{}\" ({})", prompt.title, prompt.id);
        }
        Cli::Sync => {
            let mut surface = Surface::open(ViewVariant::Manager, store, http).await?;
            let status = surface.sync().await;
            println!("{}", surface.indicator_label());
            if status == SyncStatus::Failed {
                return Err("sync failed".into());
            }
        }
        Cli::Watch => {
            let surface = Surface::open(ViewVariant::Manager, store, http).await?;
            surface.watch(config.connectivity_poll).await?;
        }
        Cli::Settings { action } => run_settings(action, &store).await?,
        Cli::TestConnection { credentials } => {
            let client = client_with(&store, http, credentials).await?;
            let status = client.test_connection().await;
            if !status.is_success() {
                return Err(status.message().into());
            }
            println!("{}", status.message());
        }
        Cli::InitSchema { credentials } => {
            let client = client_with(&store, http, credentials).await?;
            client.init_schema().await?;
            println!("Database initialized");
        }
    }

    Ok(())
}

async fn run_settings(action: SettingsCommand, store: &FileLocalStore) -> Result<(), Box<dyn Error>> {
    match action {
        SettingsCommand::Show => {
            let settings = match storage::load_settings(store).await? {
                Some(settings) => settings,
                None => {
                    let defaults = Settings::default();
                    storage::save_settings(store, &defaults).await?;
                    tracing::info!("default settings created");
                    defaults
                }
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommand::Set {
            enabled,
            provider,
            url,
            anon_key,
            auto_save_interval,
        } => {
            let mut settings = load_settings_or_default(store).await?;
            settings.apply(SettingsUpdate {
                enabled,
                provider,
                url,
                anon_key,
                auto_save_interval,
            });
            storage::save_settings(store, &settings).await?;
            println!("Settings saved");
        }
    }
    Ok(())
}

async fn load_settings_or_default(store: &FileLocalStore) -> Result<Settings, error::PromptError> {
    Ok(storage::load_settings(store).await?.unwrap_or_default())
}

/// Supabase client from the saved settings, with any given credentials
/// taking precedence. Works with sync disabled.
async fn client_with(
    store: &FileLocalStore,
    http: reqwest::Client,
    credentials: CredentialArgs,
) -> Result<SupabaseClient, error::PromptError> {
    let mut cloud_sync = load_settings_or_default(store).await?.cloud_sync;
    if let Some(url) = credentials.url {
        cloud_sync.supabase.url = url;
    }
    if let Some(anon_key) = credentials.anon_key {
        cloud_sync.supabase.anon_key = anon_key;
    }
    Ok(SupabaseClient::new(http, cloud_sync))
}

fn describe(path: MutationPath) -> &'static str {
    match path {
        MutationPath::LocalOnly => "saved locally",
        MutationPath::CloudSuccess => "saved to cloud",
        MutationPath::CloudFallback => "cloud sync failed, saved locally",
    }
}

fn confirm(question: &str) -> std::io::Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
