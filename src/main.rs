use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "newsletter-ingest",
    version,
    about = "Ingest approved newsletters from a Microsoft 365 mailbox"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// SQLite database path (defaults to NEWSLETTER_DB_PATH or ~/.newsletter-ingest)
    #[arg(long, global = true, env = "NEWSLETTER_DB_PATH")]
    db: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull newsletters from the approved folder into the database
    Sync(SyncArgs),
    /// List stored newsletters, newest first
    List(ListArgs),
    /// Show one stored newsletter by ID
    Show { id: i64 },
    /// Show the mailbox folder tree (two levels)
    Folders(FoldersArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Mailbox to read (overrides NEWSLETTER_USER)
    #[arg(long)]
    user: Option<String>,
    /// Folder name or path such as Inbox/Godkjent (overrides NEWSLETTER_FOLDER)
    #[arg(long)]
    folder: Option<String>,
    /// Pre-resolved folder id; skips folder lookup
    #[arg(long)]
    folder_id: Option<String>,
    /// Maximum newsletters to save or update in this run
    #[arg(long)]
    max: Option<usize>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
struct FoldersArgs {
    /// Mailbox to inspect (overrides NEWSLETTER_USER)
    #[arg(long)]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::path::{Path, PathBuf};

    use anyhow::{anyhow, bail, Context, Result};

    use newsletter_ingest::config::IngestConfig;
    use newsletter_ingest::db::Database;
    use newsletter_ingest::graph::auth::{
        ClientCredentials, ClientCredentialsProvider, StaticToken, TokenProvider, TokenStore,
    };
    use newsletter_ingest::graph::folders::list_folder_tree;
    use newsletter_ingest::graph::models::MailboxContext;
    use newsletter_ingest::graph::GraphClient;
    use newsletter_ingest::ingest::NewsletterIngestService;
    use newsletter_ingest::output::{self, OutputFormat};

    use super::{Cli, Commands, FoldersArgs, ListArgs, SyncArgs};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let format = OutputFormat::from_json_flag(cli.json);
        let db_path = resolve_db_path(cli.db)?;
        match cli.command {
            Commands::Sync(args) => handle_sync(args, &db_path, format).await,
            Commands::List(args) => handle_list(args, &db_path, format),
            Commands::Show { id } => handle_show(id, &db_path, format),
            Commands::Folders(args) => handle_folders(args, &db_path, format).await,
        }
    }

    async fn handle_sync(args: SyncArgs, db_path: &Path, format: OutputFormat) -> Result<()> {
        let mut config = IngestConfig::from_env().context("load ingest configuration")?;
        if let Some(user) = args.user {
            config.mailbox_user = user;
        }
        if let Some(folder) = args.folder {
            config.folder = folder;
        }
        if args.folder_id.is_some() {
            config.folder_id = args.folder_id;
        }
        if let Some(max) = args.max {
            config.max_newsletters = max;
        }
        config.validate().context("validate ingest configuration")?;

        let client = GraphClient::from_config(&config).context("build Graph client")?;
        let tokens = token_provider(&client, db_path)?;
        let db = open_db(db_path)?;

        let service = NewsletterIngestService::new(config, Box::new(client), tokens, db);
        let report = service.sync().await;
        println!("{}", output::format_sync_report(format, &report)?);

        if !report.success {
            bail!("newsletter sync failed");
        }
        Ok(())
    }

    fn handle_list(args: ListArgs, db_path: &Path, format: OutputFormat) -> Result<()> {
        let db = open_db(db_path)?;
        let newsletters = db.recent_newsletters(args.limit)?;
        println!("{}", output::format_newsletters(format, &newsletters)?);
        Ok(())
    }

    fn handle_show(id: i64, db_path: &Path, format: OutputFormat) -> Result<()> {
        let db = open_db(db_path)?;
        let newsletter = db
            .get_newsletter(id)?
            .ok_or_else(|| anyhow!("newsletter not found for id {id}"))?;
        println!("{}", output::format_newsletter(format, &newsletter)?);
        Ok(())
    }

    async fn handle_folders(args: FoldersArgs, db_path: &Path, format: OutputFormat) -> Result<()> {
        let mut config = IngestConfig::from_env().context("load ingest configuration")?;
        if let Some(user) = args.user {
            config.mailbox_user = user;
        }

        let client = GraphClient::from_config(&config).context("build Graph client")?;
        let tokens = token_provider(&client, db_path)?;
        let token = tokens
            .token()
            .await
            .ok_or_else(|| anyhow!("no access token available"))?;
        let ctx = MailboxContext::new(config.mailbox_user.clone(), token);

        let tree = list_folder_tree(&client, &ctx)
            .await
            .with_context(|| format!("list folders for {}", config.mailbox_user))?;
        println!("{}", output::format_folder_tree(format, &tree)?);
        Ok(())
    }

    /// `GRAPH_ACCESS_TOKEN` wins; otherwise client credentials, with the
    /// encrypted token cache when a cache key is configured.
    fn token_provider(client: &GraphClient, db_path: &Path) -> Result<Box<dyn TokenProvider>> {
        if let Some(token) = StaticToken::from_env() {
            return Ok(Box::new(token));
        }

        let credentials = ClientCredentials::from_env()
            .context("no GRAPH_ACCESS_TOKEN set and client credentials are incomplete")?;
        let mut provider = ClientCredentialsProvider::new(client.http().clone(), credentials);
        if let Some(store) = TokenStore::from_env(open_db(db_path)?)? {
            provider = provider.with_store(store);
        }
        Ok(Box::new(provider))
    }

    fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path),
            None => Database::default_db_path().context("resolve default newsletter database path"),
        }
    }

    fn open_db(path: &Path) -> Result<Database> {
        Database::open(path)
            .with_context(|| format!("open newsletter database at {}", path.display()))
    }
}
