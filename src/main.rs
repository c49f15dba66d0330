use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keepsake::backup::BackupService;
use keepsake::cli::{handle_backup_command, BackupCommands};
use keepsake::config::{KeepsakePaths, Settings};
use keepsake::crypto::DeviceKeyProvider;

#[derive(Parser)]
#[command(
    name = "keepsake",
    author = "Kaylee Beyene",
    version,
    about = "Encrypted snapshot backup and restore for local application data",
    long_about = "Keepsake snapshots the live data and media directories into a \
                  compressed, encrypted archive, optionally uploads it to a remote \
                  store, and restores a chosen backup atomically."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the keepsake directory and device key
    Init,

    /// Show current configuration and paths
    Config,

    /// Show recent audit log entries
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    #[command(flatten)]
    Backup(BackupCommands),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = KeepsakePaths::new()?;

    match cli.command {
        Commands::Init => {
            println!("Initializing keepsake at: {}", paths.base_dir().display());
            let settings = Settings::load_or_create(&paths)?;
            settings.save(&paths)?;
            DeviceKeyProvider::new(paths.device_key_file(), settings.key_params.clone())
                .load_or_create_secret()?;
            println!("Initialization complete!");
            println!();
            println!("Live data:  {}", paths.data_dir().display());
            println!("Media:      {}", paths.media_dir().display());
            println!("Device key: {}", paths.device_key_file().display());
            println!();
            println!("Keep a copy of the device key somewhere safe; backups cannot");
            println!("be decrypted without it.");
        }
        Commands::Config => {
            let settings = Settings::load_or_create(&paths)?;
            println!("Keepsake Configuration");
            println!("======================");
            println!("Base directory:   {}", paths.base_dir().display());
            println!("Data directory:   {}", paths.data_dir().display());
            println!("Media directory:  {}", paths.media_dir().display());
            println!("Backup directory: {}", paths.backup_dir().display());
            println!(
                "Remote directory: {}",
                settings.remote.resolve_directory(&paths).display()
            );
            println!();
            println!("Settings:");
            println!("  Keep local archive: {}", settings.backup.keep_local_archive);
            println!("  Chunk size:         {} bytes", settings.backup.chunk_size);
            println!("  Compression level:  {}", settings.backup.compression_level);
            println!("  Retention count:    {}", settings.backup.retention_count);
            if !paths.is_initialized() {
                println!();
                println!("Not initialized yet. Run 'keepsake init'.");
            }
        }
        Commands::History { limit } => {
            let service = BackupService::open(paths)?;
            let entries = service.audit().read_recent(limit)?;
            if entries.is_empty() {
                println!("No audit entries yet.");
            }
            for entry in entries {
                println!("{}", entry.format_human_readable());
            }
        }
        Commands::Backup(cmd) => {
            let service = BackupService::open(paths)?;
            handle_backup_command(&service, cmd)?;
        }
    }

    Ok(())
}
