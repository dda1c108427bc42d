//! drivemigrate CLI - migrate Google Drive trees and their ownership.
//!
//! This tool mirrors one Drive folder into another, lists who owns the
//! files below a folder, and asks those owners to transfer ownership.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use drivemigrate_notify::{
    read_owner_counts, DeliveryMode, GmailClient, NoticeTemplate, Notifier, GMAIL_SCOPES,
};
use drivemigrate_storage::gdrive::{Authenticator, DriveConnector, DRIVE_SCOPE};
use drivemigrate_storage::{SessionStore, DEFAULT_PAGE_SIZE};
use drivemigrate_sync::{
    CsvOwnerSink, OwnerSink, OwnershipEnumerator, SyncOptions, TransferMode, TreeSync, DEFAULT_CONCURRENCY,
};

#[derive(Parser)]
#[command(name = "drivemigrate")]
#[command(about = "drivemigrate - Google Drive tree migration")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    auth: AuthArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AuthArgs {
    /// OAuth client secrets downloaded from the Google Cloud console.
    #[arg(long, global = true, default_value = "client_secret.json")]
    credentials: PathBuf,

    /// Token cache for Drive access.
    #[arg(long, global = true, default_value = "token.json")]
    token: PathBuf,

    /// Print the consent URL instead of opening a browser.
    #[arg(long, global = true)]
    no_browser: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the contents of one folder into another.
    Sync {
        /// Source folder ID.
        #[arg(long)]
        from: String,

        /// Destination folder ID.
        #[arg(long)]
        to: String,

        /// Move files instead of copying them.
        #[arg(long = "move")]
        move_files: bool,

        /// Also copy when content checksums differ.
        #[arg(long)]
        checksum: bool,

        /// Descend into folders reached through shortcuts.
        #[arg(long)]
        follow_shortcuts: bool,

        /// Listing page size.
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },

    /// List the owners of every file below a folder.
    Owners {
        /// Folder ID to enumerate.
        #[arg(long)]
        root: String,

        /// CSV file that receives Email,Link rows as they are found.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Concurrent permission lookups per folder.
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },

    /// Ask every owner in an owner CSV to transfer their files.
    Notify {
        /// Owner CSV produced by `owners`.
        #[arg(short = 'o', long, default_value = "owners.csv")]
        owners_file: PathBuf,

        /// Address the notices are sent from.
        #[arg(short = 'f', long)]
        from_email: String,

        /// Account ownership should be transferred to.
        #[arg(long)]
        owner_target_email: String,

        /// ID of the shared Drive folder.
        #[arg(long)]
        drive_folder: String,

        /// Resource key from the folder's share link.
        #[arg(long)]
        resource_key: String,

        /// Organization named in the notice.
        #[arg(long, default_value = "our team")]
        organization: String,

        /// Help address named in the notice (default: the target account).
        #[arg(long)]
        contact: Option<String>,

        /// Token cache for Gmail access.
        #[arg(long, default_value = "gmail_token.json")]
        gmail_token: PathBuf,

        /// Send the notices instead of creating drafts.
        #[arg(long)]
        send: bool,
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
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Sync {
            from,
            to,
            move_files,
            checksum,
            follow_shortcuts,
            page_size,
        } => {
            let options = SyncOptions {
                mode: if move_files {
                    TransferMode::Move
                } else {
                    TransferMode::Copy
                },
                compare_checksums: checksum,
                follow_shortcuts,
                page_size,
            };
            cmd_sync(&cli.auth, &from, &to, options).await
        }

        Commands::Owners {
            root,
            output,
            concurrency,
        } => cmd_owners(&cli.auth, &root, output.as_deref(), concurrency).await,

        Commands::Notify {
            owners_file,
            from_email,
            owner_target_email,
            drive_folder,
            resource_key,
            organization,
            contact,
            gmail_token,
            send,
        } => {
            let template = NoticeTemplate {
                organization,
                owner_target_email,
                drive_folder,
                resource_key,
                contact,
            };
            let mode = if send {
                DeliveryMode::Send
            } else {
                DeliveryMode::Draft
            };
            cmd_notify(
                &cli.auth,
                &owners_file,
                &gmail_token,
                &from_email,
                template,
                mode,
            )
            .await
        }
    }
}

fn authenticator(auth: &AuthArgs, token: &Path, scopes: &[&str]) -> Result<Authenticator> {
    let authenticator = Authenticator::from_files(&auth.credentials, token, scopes)
        .with_context(|| format!("Failed to load {}", auth.credentials.display()))?;

    Ok(if auth.no_browser {
        authenticator.without_browser()
    } else {
        authenticator
    })
}

/// Open a Drive session that re-authenticates when it expires.
async fn connect_drive(auth: &AuthArgs) -> Result<Arc<SessionStore<DriveConnector>>> {
    let authenticator = authenticator(auth, &auth.token, &[DRIVE_SCOPE])?;
    let store = SessionStore::connect(DriveConnector::new(authenticator))
        .await
        .context("Failed to connect to Google Drive")?;
    Ok(Arc::new(store))
}

/// Mirror one folder into another.
async fn cmd_sync(auth: &AuthArgs, from: &str, to: &str, options: SyncOptions) -> Result<()> {
    let store = connect_drive(auth).await?;

    let report = TreeSync::new(store.clone(), options)
        .run(from, to)
        .await
        .context("Sync failed")?;

    println!("Sync complete in {:.1?}", report.duration);
    println!("  Folders created:    {}", report.folders_created);
    println!("  Folders reused:     {}", report.folders_reused);
    println!("  Files copied:       {}", report.files_copied);
    println!("  Files moved:        {}", report.files_moved);
    println!("  Files skipped:      {}", report.files_skipped);
    println!("  Shortcuts created:  {}", report.shortcuts_created);
    println!("  Duplicates removed: {}", report.duplicates_removed);
    if store.reconnects() > 0 {
        println!("  Re-authenticated:   {} time(s)", store.reconnects());
    }

    Ok(())
}

/// Enumerate owners below a folder.
async fn cmd_owners(
    auth: &AuthArgs,
    root: &str,
    output: Option<&Path>,
    concurrency: usize,
) -> Result<()> {
    let store = connect_drive(auth).await?;
    let mut sink = match output {
        Some(path) => {
            info!("Writing owners to {}", path.display());
            Some(
                CsvOwnerSink::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )
        }
        None => None,
    };

    let report = OwnershipEnumerator::new(store)
        .with_concurrency(concurrency)
        .run(root, sink.as_mut().map(|s| s as &mut dyn OwnerSink))
        .await
        .context("Ownership enumeration failed")?;

    println!(
        "Scanned {} files in {} folders",
        report.files_scanned, report.folders_scanned
    );
    if report.owners.is_empty() {
        println!("No owners found.");
    } else {
        println!("Owners:");
        for (owner, links) in &report.owners {
            println!("  {} ({} files)", owner, links.len());
        }
    }

    if !report.insufficient_permissions.is_empty() {
        println!(
            "\nInsufficient permissions to read sharing settings of {} items:",
            report.insufficient_permissions.len()
        );
        for id in &report.insufficient_permissions {
            println!("  {}", id);
        }
    }

    Ok(())
}

/// Draft or send ownership-transfer notices.
async fn cmd_notify(
    auth: &AuthArgs,
    owners_file: &Path,
    gmail_token: &Path,
    from_email: &str,
    template: NoticeTemplate,
    mode: DeliveryMode,
) -> Result<()> {
    let counts = read_owner_counts(owners_file)
        .with_context(|| format!("Failed to read {}", owners_file.display()))?;
    if counts.is_empty() {
        println!("No owners listed in {}.", owners_file.display());
        return Ok(());
    }

    let token = authenticator(auth, gmail_token, GMAIL_SCOPES)?
        .access_token(false)
        .await
        .context("Failed to authorize Gmail access")?;
    let mailer = GmailClient::new(token).context("Failed to create Gmail client")?;

    info!("Notifying {} owners ({:?})", counts.len(), mode);
    let report = Notifier::new(mailer, from_email, template)
        .notify_all(&counts, mode)
        .await;

    let verb = match mode {
        DeliveryMode::Draft => "Drafted",
        DeliveryMode::Send => "Sent",
    };
    println!("{} {} notices", verb, report.delivered.len());
    for (owner, id) in &report.delivered {
        println!("  {} -> {}", owner, id);
    }

    if !report.failed.is_empty() {
        println!("\nFailed for {} owners:", report.failed.len());
        for (owner, reason) in &report.failed {
            println!("  {}: {}", owner, reason);
        }
        anyhow::bail!("{} of {} notices failed", report.failed.len(), counts.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owners_output_is_optional() {
        let cli = Cli::try_parse_from(["drivemigrate", "owners", "--root", "r1"]).unwrap();
        match cli.command {
            Commands::Owners { root, output, .. } => {
                assert_eq!(root, "r1");
                assert!(output.is_none());
            }
            _ => panic!("expected owners command"),
        }

        let cli =
            Cli::try_parse_from(["drivemigrate", "owners", "--root", "r1", "-o", "out.csv"])
                .unwrap();
        match cli.command {
            Commands::Owners { output, .. } => {
                assert_eq!(output, Some(PathBuf::from("out.csv")));
            }
            _ => panic!("expected owners command"),
        }
    }
}
