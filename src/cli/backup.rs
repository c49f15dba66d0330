//! Backup CLI commands
//!
//! Implements the create/list/info/verify/restore/delete/prune commands on
//! top of [`BackupService`].

use std::io::Write;

use clap::Subcommand;

use crate::backup::{BackupError, BackupService, DeletionReport};
use crate::models::BackupRecord;
use crate::progress::{ProgressSink, ProgressState, Stage};

/// Backup subcommands
#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Create a new encrypted backup
    Create {
        /// Include media files
        #[arg(short, long)]
        media: bool,

        /// Upload the archive to the remote store
        #[arg(short, long)]
        upload: bool,
    },

    /// List all backups, newest first
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about a specific backup
    Info {
        /// Backup id, id prefix, or 'latest'
        backup: String,
    },

    /// Decrypt and validate a backup without restoring it
    Verify {
        /// Backup id, id prefix, or 'latest'
        backup: String,

        /// Check the remote copy instead of the local archive
        #[arg(short, long)]
        remote: bool,
    },

    /// Replace current data with a backup
    Restore {
        /// Backup id, id prefix, or 'latest'
        backup: String,

        /// Restore from the remote copy instead of the local archive
        #[arg(short, long)]
        remote: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Delete a backup and its archives
    Delete {
        /// Backup id, id prefix, or 'latest'
        backup: String,
    },

    /// Delete all but the newest backups
    Prune {
        /// Number of backups to keep (defaults to the retention setting)
        #[arg(short, long)]
        keep: Option<usize>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

/// Prints stage changes and every tenth percent to stderr
#[derive(Debug, Default)]
pub struct TerminalProgress {
    stage: Option<Stage>,
    last_decile: u8,
}

impl ProgressSink for TerminalProgress {
    fn report(&mut self, state: &ProgressState) {
        let decile = state.percent / 10;
        if self.stage == Some(state.stage) && decile == self.last_decile {
            return;
        }
        self.stage = Some(state.stage);
        self.last_decile = decile;

        let mut stderr = std::io::stderr().lock();
        let _ = match &state.current_item {
            Some(item) => writeln!(stderr, "[{:>3}%] {} {}", state.percent, state.stage, item),
            None => writeln!(stderr, "[{:>3}%] {}", state.percent, state.stage),
        };
    }
}

/// Handle a backup command
pub fn handle_backup_command(service: &BackupService, cmd: BackupCommands) -> Result<(), BackupError> {
    match cmd {
        BackupCommands::Create { media, upload } => {
            println!("Creating backup...");
            let mut progress = TerminalProgress::default();
            match service.create_backup(media, upload, &mut progress) {
                Ok(record) => {
                    println!("Backup created: {}", record.id);
                    print_summary(&record);
                }
                Err(err) => {
                    if let Some(record) = err.local_record() {
                        println!("Upload failed; backup kept locally: {}", record.id);
                        print_summary(record);
                    }
                    return Err(err);
                }
            }
        }

        BackupCommands::List { verbose } => {
            let backups = service.list()?;

            if backups.is_empty() {
                println!("No backups found.");
                println!("Create one with: keepsake create");
                return Ok(());
            }

            println!("Available Backups");
            println!("=================");
            println!();

            for (i, backup) in backups.iter().enumerate() {
                let age = chrono::Utc::now().signed_duration_since(backup.created_at);
                let age_str = format_duration(age);
                let media_marker = if backup.includes_media { " [media]" } else { "" };

                if verbose {
                    println!(
                        "{}. {}{}\n   Created: {}\n   Files: {} ({})\n   Archive: {}\n   Location: {}\n   Age: {}\n",
                        i + 1,
                        backup.id,
                        media_marker,
                        backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        backup.file_count,
                        format_size(backup.total_size_bytes),
                        format_size(backup.archive_size_bytes),
                        backup.location_label(),
                        age_str,
                    );
                } else {
                    println!(
                        "  {}. {} ({} ago, {}, {}){}",
                        i + 1,
                        backup.id,
                        age_str,
                        format_size(backup.total_size_bytes),
                        backup.location_label(),
                        media_marker,
                    );
                }
            }

            println!();
            println!("Total: {} backup(s)", backups.len());
        }

        BackupCommands::Info { backup } => {
            let record = service.resolve(&backup)?;

            println!("Backup Details");
            println!("==============");
            println!("ID: {}", record.id);
            println!("UUID: {}", record.id.as_uuid());
            println!(
                "Created: {}",
                record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            print_summary(&record);
            println!("Encrypted: {}", if record.is_encrypted { "Yes" } else { "No" });
            println!("Media: {}", if record.includes_media { "Yes" } else { "No" });
            match &record.local_archive_path {
                Some(path) => {
                    let status = if path.exists() { "" } else { " (missing)" };
                    println!("Local archive: {}{}", path.display(), status);
                }
                None => println!("Local archive: none"),
            }
            match &record.remote_id {
                Some(id) => println!("Remote blob: {}", id),
                None => println!("Remote blob: none"),
            }
        }

        BackupCommands::Verify { backup, remote } => {
            let record = service.resolve(&backup)?;
            println!("Verifying {}...", record.id);
            let mut progress = TerminalProgress::default();
            let report = service.verify_backup(&record.id, remote, &mut progress)?;

            println!("Backup {} is intact.", report.backup_id);
            println!(
                "Files: {} ({})",
                report.file_count,
                format_size(report.total_size_bytes)
            );
            println!(
                "Archived: {}",
                report.archived_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        BackupCommands::Restore {
            backup,
            remote,
            force,
        } => {
            let record = service.resolve(&backup)?;

            println!("Backup Information");
            println!("==================");
            println!("ID: {}", record.id);
            println!(
                "Created: {}",
                record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            print_summary(&record);
            println!("Source: {}", if remote { "remote" } else { "local" });
            println!();

            if !force {
                println!("WARNING: This will overwrite ALL current data!");
                println!("To proceed, run again with --force flag:");
                let remote_flag = if remote { " --remote" } else { "" };
                println!("  keepsake restore {}{} --force", backup, remote_flag);
                return Ok(());
            }

            println!("Restoring from backup...");
            let mut progress = TerminalProgress::default();
            service.restore_backup(&record.id, remote, &mut progress)?;
            println!("Restore complete!");
            println!(
                "{} file(s) restored ({}).",
                record.file_count,
                format_size(record.total_size_bytes)
            );
        }

        BackupCommands::Delete { backup } => {
            let record = service.resolve(&backup)?;
            let report = service.delete_backup(&record.id)?;
            println!("Deleted backup {}", report.backup_id);
            print_deletion_issues(&report);
        }

        BackupCommands::Prune { keep, force } => {
            let keep = keep.unwrap_or(service.settings().backup.retention_count as usize);
            let candidates = service.prune_candidates(keep)?;

            if candidates.is_empty() {
                println!("No backups to prune.");
                println!("Retention: keep the newest {}", keep);
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!("Retention: keep the newest {}", keep);
            println!("To be deleted: {}", candidates.len());
            for record in &candidates {
                println!(
                    "  {} ({})",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            println!();

            if !force {
                println!("To delete old backups, run again with --force flag:");
                println!("  keepsake prune --keep {} --force", keep);
                return Ok(());
            }

            let reports = service.prune(keep)?;
            for report in &reports {
                print_deletion_issues(report);
            }
            println!("Deleted {} backup(s).", reports.len());
        }
    }

    Ok(())
}

fn print_summary(record: &BackupRecord) {
    println!(
        "Files: {} ({})",
        record.file_count,
        format_size(record.total_size_bytes)
    );
    println!("Archive: {}", format_size(record.archive_size_bytes));
    println!("Location: {}", record.location_label());
}

fn print_deletion_issues(report: &DeletionReport) {
    if let Some(err) = &report.local_error {
        println!("  Warning: local archive of {} not removed: {}", report.backup_id, err);
    }
    if let Some(err) = &report.remote_error {
        println!("  Warning: remote blob of {} not removed: {}", report.backup_id, err);
    }
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    let months = days / 30;
    format!("{}mo", months)
}

/// Format a file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(3 * 1024), "3.0 KB");
        assert_eq!(format_size(503 * 1024), "503.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::minutes(5)), "5m");
        assert_eq!(format_duration(chrono::Duration::hours(3)), "3h");
        assert_eq!(format_duration(chrono::Duration::days(2)), "2d");
        assert_eq!(format_duration(chrono::Duration::days(65)), "2mo");
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "0s");
    }

    #[test]
    fn test_terminal_progress_throttles() {
        let mut progress = TerminalProgress::default();
        let state = |stage, percent| ProgressState {
            stage,
            percent,
            current_item: None,
        };
        progress.report(&state(Stage::Collecting, 12));
        assert_eq!(progress.last_decile, 1);
        progress.report(&state(Stage::Collecting, 19));
        assert_eq!(progress.last_decile, 1);
        progress.report(&state(Stage::Completed, 100));
        assert_eq!(progress.stage, Some(Stage::Completed));
        assert_eq!(progress.last_decile, 10);
    }
}
