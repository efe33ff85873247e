//! KeyRelay CLI - Command line interface for the credential vault.
//!
//! This tool stores third-party API keys in a local encrypted vault and
//! produces session-relay headers that carry a key to a server without
//! sending the key itself.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use keyrelay_app::VaultSession;
use keyrelay_common::ProviderId;
use keyrelay_crypto::kdf::DEFAULT_ITERATIONS;
use keyrelay_relay::{
    HttpSessionRegistry, MemorySessionRegistry, RelayConfig, SessionRegistry,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SESSION_TTL,
};
use keyrelay_vault::{VaultOptions, VaultState};

#[derive(Parser)]
#[command(name = "keyrelay")]
#[command(about = "KeyRelay - Local credential vault and session relay")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the vault (default: platform data dir).
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// PBKDF2 iterations for a new vault or passphrase change.
    #[arg(long, global = true, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,

    /// Base URL of the session registry.
    #[arg(long, global = true)]
    registry_url: Option<String>,

    /// Session lifetime in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_SESSION_TTL.as_secs())]
    ttl_secs: u64,

    /// Registry request timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init,

    /// Show vault state and stored providers.
    Status,

    /// Store or replace a provider's API key.
    Set {
        /// Provider identifier (e.g. "openAI").
        provider: String,
    },

    /// Print a provider's API key.
    Get {
        /// Provider identifier.
        provider: String,
    },

    /// Delete a provider's API key.
    Delete {
        /// Provider identifier.
        provider: String,
    },

    /// List providers with a stored key.
    List,

    /// Change the vault passphrase.
    ChangePassphrase,

    /// Delete the vault and every stored key.
    Reset {
        /// Confirm the irreversible reset.
        #[arg(long)]
        yes: bool,
    },

    /// Establish a relay session and print request headers for a provider.
    Headers {
        /// Provider identifier.
        provider: String,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Init => cmd_init(&cli).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Set { provider } => cmd_set(&cli, provider).await,
        Commands::Get { provider } => cmd_get(&cli, provider).await,
        Commands::Delete { provider } => cmd_delete(&cli, provider).await,
        Commands::List => cmd_list(&cli).await,
        Commands::ChangePassphrase => cmd_change_passphrase(&cli).await,
        Commands::Reset { yes } => cmd_reset(&cli, *yes).await,
        Commands::Headers { provider } => cmd_headers(&cli, provider).await,
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "keyrelay", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Prompt for a secret without echo.
fn prompt_secret(prompt: &str) -> Result<Zeroizing<String>> {
    let secret = rpassword::prompt_password(prompt).context("Failed to read input")?;
    Ok(Zeroizing::new(secret))
}

/// Prompt for a new passphrase twice.
fn prompt_new_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    let passphrase = prompt_secret(prompt)?;
    let confirm = prompt_secret("Confirm passphrase: ")?;

    if *passphrase != *confirm {
        anyhow::bail!("Passphrases do not match");
    }
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }
    Ok(passphrase)
}

fn parse_provider(provider: &str) -> Result<ProviderId> {
    ProviderId::new(provider).context("Invalid provider id")
}

fn store_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.store_dir {
        Some(dir) => Ok(dir.clone()),
        None => dirs::data_dir()
            .map(|dir| dir.join("keyrelay"))
            .context("No data directory on this platform; pass --store-dir"),
    }
}

fn relay_config(cli: &Cli) -> RelayConfig {
    RelayConfig::new()
        .with_session_ttl(Duration::from_secs(cli.ttl_secs))
        .with_request_timeout(Duration::from_secs(cli.timeout_secs))
}

/// Open the vault session, relaying through the configured registry or a
/// process-local one.
fn open_session(cli: &Cli) -> Result<VaultSession> {
    let config = relay_config(cli);
    let registry: Arc<dyn SessionRegistry> = match &cli.registry_url {
        Some(url) => Arc::new(
            HttpSessionRegistry::new(url, &config).context("Invalid registry configuration")?,
        ),
        None => Arc::new(MemorySessionRegistry::new(&config).context("Invalid relay configuration")?),
    };

    open_session_with(&store_dir(cli)?, cli.iterations, registry, config)
}

fn open_session_with(
    dir: &Path,
    iterations: u32,
    registry: Arc<dyn SessionRegistry>,
    config: RelayConfig,
) -> Result<VaultSession> {
    let store_config = serde_json::json!({ "root": dir });
    let options = VaultOptions::new().with_iterations(iterations);

    VaultSession::open("local", store_config, options, registry, config)
        .context("Failed to open vault store")
}

/// Unlock the vault without establishing a relay session.
async fn unlock_vault(session: &VaultSession) -> Result<()> {
    let passphrase = prompt_secret("Enter passphrase: ")?;
    session
        .vault()
        .unlock(passphrase.as_bytes())
        .await
        .context("Failed to unlock vault")
}

/// Create a new vault.
async fn cmd_init(cli: &Cli) -> Result<()> {
    let dir = store_dir(cli)?;
    info!("Creating new vault in {}", dir.display());

    let session = open_session(cli)?;
    let passphrase = prompt_new_passphrase("Enter passphrase: ")?;

    session
        .vault()
        .create_vault(passphrase.as_bytes())
        .await
        .context("Failed to create vault")?;

    println!("Vault created successfully!");
    println!("  Location: {}", dir.display());
    println!("  Iterations: {}", cli.iterations);

    Ok(())
}

/// Show vault state.
async fn cmd_status(cli: &Cli) -> Result<()> {
    let session = open_session(cli)?;
    let status = session.status().await.context("Failed to read vault")?;

    let state = match status.vault {
        VaultState::NoVault => "no vault",
        VaultState::Locked => "locked",
        VaultState::Unlocked => "unlocked",
    };

    println!("Vault Status:");
    println!("  Location: {}", store_dir(cli)?.display());
    println!("  State: {}", state);
    println!("  Providers: {}", status.providers.len());

    Ok(())
}

/// Store a provider's key.
async fn cmd_set(cli: &Cli, provider: &str) -> Result<()> {
    let provider = parse_provider(provider)?;
    let session = open_session(cli)?;
    unlock_vault(&session).await?;

    let key = prompt_secret(&format!("Enter API key for {}: ", provider))?;
    if key.is_empty() {
        anyhow::bail!("API key cannot be empty");
    }

    session
        .vault()
        .save_key(&provider, &key)
        .await
        .context("Failed to save key")?;

    println!("Key saved for {}", provider);

    Ok(())
}

/// Print a provider's key.
async fn cmd_get(cli: &Cli, provider: &str) -> Result<()> {
    let provider = parse_provider(provider)?;
    let session = open_session(cli)?;
    unlock_vault(&session).await?;

    let key = session
        .vault()
        .get_key(&provider)
        .await
        .context("Failed to read key")?
        .with_context(|| format!("No key stored for {}", provider))?;

    println!("{}", key.as_str());

    Ok(())
}

/// Delete a provider's key.
async fn cmd_delete(cli: &Cli, provider: &str) -> Result<()> {
    let provider = parse_provider(provider)?;
    info!("Deleting key for {}", provider);

    let session = open_session(cli)?;
    session
        .vault()
        .delete_key(&provider)
        .await
        .context("Failed to delete key")?;

    println!("Key deleted: {}", provider);

    Ok(())
}

/// List stored providers.
async fn cmd_list(cli: &Cli) -> Result<()> {
    let session = open_session(cli)?;
    let providers = session
        .vault()
        .list_providers()
        .await
        .context("Failed to list providers")?;

    if providers.is_empty() {
        println!("No keys stored.");
    } else {
        println!("Stored providers:");
        for provider in providers {
            println!("  {}", provider);
        }
    }

    Ok(())
}

/// Change the vault passphrase.
async fn cmd_change_passphrase(cli: &Cli) -> Result<()> {
    info!("Changing vault passphrase");

    let session = open_session(cli)?;
    let old = prompt_secret("Enter current passphrase: ")?;
    let new = prompt_new_passphrase("Enter new passphrase: ")?;

    session
        .vault()
        .change_passphrase(old.as_bytes(), new.as_bytes())
        .await
        .context("Failed to change passphrase")?;

    println!("Passphrase changed successfully!");

    Ok(())
}

/// Delete the vault.
async fn cmd_reset(cli: &Cli, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Reset deletes every stored key; pass --yes to confirm");
    }

    let session = open_session(cli)?;
    session
        .reset()
        .await
        .context("Failed to reset vault")?;

    println!("Vault reset.");

    Ok(())
}

/// Establish a session and print request headers.
async fn cmd_headers(cli: &Cli, provider: &str) -> Result<()> {
    if cli.registry_url.is_none() {
        anyhow::bail!("The headers command needs --registry-url");
    }
    let provider = parse_provider(provider)?;

    let session = open_session(cli)?;
    let passphrase = prompt_secret("Enter passphrase: ")?;
    let session_id = session
        .unlock(passphrase.as_bytes())
        .await
        .context("Failed to unlock vault and establish session")?;
    info!("Session established: {}", session_id);

    let headers = session
        .authorize(&provider)
        .await
        .context("Failed to authorize request")?;

    for (name, value) in headers.iter() {
        println!("{}: {}", name, value);
    }

    Ok(())
}
