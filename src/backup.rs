//! Backup Subsystem (spec §4.10) — list, trigger, download, decrypt,
//! extract, and restore encrypted archives from an S3-compatible object
//! store.

use crate::config::stack::SYSTEM_STACK_NAME;
use crate::config::{BackupConfig, TopLevelConfig};
use crate::docker;
use crate::error::SurekError;
use crate::paths;
use crate::{deploy, discovery};
use chrono::{DateTime, Utc};
use redact::ExposeSecret;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Daily,
    Weekly,
    Monthly,
    Manual,
    Unknown,
}

impl BackupType {
    fn from_key(key: &str) -> Self {
        if key.starts_with("daily-") {
            BackupType::Daily
        } else if key.starts_with("weekly-") {
            BackupType::Weekly
        } else if key.starts_with("monthly-") {
            BackupType::Monthly
        } else if key.starts_with("manual-") {
            BackupType::Manual
        } else {
            BackupType::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Daily => "daily",
            BackupType::Weekly => "weekly",
            BackupType::Monthly => "monthly",
            BackupType::Manual => "manual",
            BackupType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub name: String,
    pub kind: BackupType,
    pub size: u64,
    pub created: DateTime<Utc>,
}

/// (ADDED) spec §3 `BackupFailureRecord`, grounded on the original's
/// `BackupFailure` dataclass and `record_backup_failure`/
/// `get_recent_failures` functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFailureRecord {
    pub timestamp: DateTime<Utc>,
    pub backup_type: String,
    pub error: String,
    pub notified: bool,
}

fn s3_bucket(config: &BackupConfig) -> Result<Box<Bucket>, SurekError> {
    let region = Region::Custom {
        region: "".to_string(),
        endpoint: config.endpoint.clone(),
    };
    let credentials = Credentials::new(
        Some(&config.access_key),
        Some(config.secret_key.expose_secret()),
        None,
        None,
        None,
    )
    .map_err(|e| SurekError::backup(format!("building S3 credentials: {e}")))?;

    Bucket::new(&config.bucket, region, credentials)
        .map_err(|e| SurekError::backup(format!("connecting to object store: {e}")))
        .map(|b| b.with_path_style())
}

/// **list** (spec §4.10): `ListObjects` on the bucket, type derived from key
/// prefix, sorted by `created` descending.
pub async fn list(config: &BackupConfig) -> Result<Vec<BackupEntry>, SurekError> {
    let bucket = s3_bucket(config)?;
    let results = bucket
        .list(String::new(), None)
        .await
        .map_err(|e| SurekError::backup(format!("listing backups: {e}")))?;

    let mut entries = Vec::new();
    for page in results {
        for obj in page.contents {
            let created = DateTime::parse_from_rfc3339(&obj.last_modified)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            entries.push(BackupEntry {
                kind: BackupType::from_key(&obj.key),
                name: obj.key,
                size: obj.size,
                created,
            });
        }
    }

    entries.sort_by(|a, b| b.created.cmp(&a.created));
    Ok(entries)
}

/// **download(name, target_path)** (spec §4.10): `GetObject` to a file.
pub async fn download(config: &BackupConfig, name: &str, target_path: &Path) -> Result<(), SurekError> {
    let bucket = s3_bucket(config)?;
    let response = bucket
        .get_object(name)
        .await
        .map_err(|e| SurekError::backup(format!("downloading backup '{name}': {e}")))?;

    if let Some(parent) = target_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SurekError::backup(e.to_string()))?;
    }
    std::fs::write(target_path, response.bytes())
        .map_err(|e| SurekError::backup(format!("writing downloaded backup: {e}")))
}

/// **trigger** (spec §4.10): locates the system stack's backup container by
/// labels and execs the manual-backup shell entrypoint. On failure, records
/// a `BackupFailureRecord` before surfacing the error.
pub async fn trigger(cwd: &Path) -> Result<(), SurekError> {
    let docker = docker::connect()?;
    let containers = docker::list_containers(&docker, SYSTEM_STACK_NAME).await?;
    let container = containers
        .into_iter()
        .find(|c| {
            c.labels
                .as_ref()
                .and_then(|l| l.get("com.docker.compose.service"))
                .map(|s| s == "backup")
                .unwrap_or(false)
        })
        .ok_or_else(|| SurekError::backup("backup container not found. Is the system stack running?"))?;

    let id = container.id.clone().unwrap_or_default();
    info!("triggering manual backup");
    let argv = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "set -a; source /etc/dockervolumebackup/conf.d/backup-manual.env; set +a && backup".to_string(),
    ];
    let (exit_code, output) = docker::exec_in_container(&docker, &id, argv).await?;
    if exit_code != 0 {
        let error_msg = String::from_utf8_lossy(&output).to_string();
        record_failure(cwd, "manual", &error_msg)?;
        return Err(SurekError::backup(format!("backup failed: {error_msg}")));
    }

    info!("backup completed successfully");
    Ok(())
}

/// **decrypt_and_extract(archive_path, password, target_dir)** (spec
/// §4.10): GPG batch decrypt, then untar-gzip, then delete the decrypted
/// intermediate file.
pub fn decrypt_and_extract(archive_path: &Path, password: &str, target_dir: &Path) -> Result<(), SurekError> {
    let decrypted_path = archive_path.with_extension("");

    let output = std::process::Command::new("gpg")
        .arg("--batch")
        .arg("--yes")
        .arg("--passphrase")
        .arg(password)
        .arg("--output")
        .arg(&decrypted_path)
        .arg("--decrypt")
        .arg(archive_path)
        .output()
        .map_err(|e| SurekError::backup(format!("invoking gpg: {e}")))?;
    if !output.status.success() {
        return Err(SurekError::backup(format!(
            "failed to decrypt backup: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    std::fs::create_dir_all(target_dir).map_err(|e| SurekError::backup(e.to_string()))?;
    let tar_gz = std::fs::File::open(&decrypted_path).map_err(|e| SurekError::backup(e.to_string()))?;
    let decoder = flate2::read::GzDecoder::new(tar_gz);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(target_dir)
        .map_err(|e| SurekError::backup(format!("failed to extract backup: {e}")))?;

    std::fs::remove_file(&decrypted_path).map_err(|e| SurekError::backup(e.to_string()))?;
    Ok(())
}

/// Appends a `BackupFailureRecord`, keeping the last 100 entries.
pub fn record_failure(cwd: &Path, backup_type: &str, error: &str) -> Result<(), SurekError> {
    let path = paths::backup_failures_path(cwd).map_err(|e| SurekError::backup(e.to_string()))?;
    let mut failures = load_failures(cwd)?;
    failures.push(BackupFailureRecord {
        timestamp: Utc::now(),
        backup_type: backup_type.to_string(),
        error: error.to_string(),
        notified: false,
    });
    if failures.len() > 100 {
        let drop = failures.len() - 100;
        failures.drain(0..drop);
    }
    let content = serde_json::to_string_pretty(&failures).map_err(|e| SurekError::backup(e.to_string()))?;
    std::fs::write(&path, content).map_err(|e| SurekError::backup(e.to_string()))?;
    warn!("backup failed: {error}");
    Ok(())
}

fn load_failures(cwd: &Path) -> Result<Vec<BackupFailureRecord>, SurekError> {
    let path = paths::backup_failures_path(cwd).map_err(|e| SurekError::backup(e.to_string()))?;
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| SurekError::backup(e.to_string()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|e| SurekError::backup(format!("invalid backup failure log: {e}")))
}

/// **(ADDED) recent_failures(limit)**: last `limit` entries, most recent
/// last — matches the original's `get_recent_failures`.
pub fn recent_failures(cwd: &Path, limit: usize) -> Result<Vec<BackupFailureRecord>, SurekError> {
    let mut failures = load_failures(cwd)?;
    if failures.len() > limit {
        let drop = failures.len() - limit;
        failures.drain(0..drop);
    }
    Ok(failures)
}

/// **restore(backup_name, stack?, volume?)** (spec §4.10 orchestration):
/// stop the scoped stack(s), download, decrypt, extract, swap volume
/// directories, restart what was running. Not transactional: a failure
/// past the stop step can leave volumes half-restored (spec §9 Open
/// Questions — documented, not mitigated).
pub async fn restore(
    cwd: &Path,
    top: &TopLevelConfig,
    backup_name: &str,
    stack_filter: Option<&str>,
    volume_filter: Option<&str>,
) -> Result<(), SurekError> {
    let backup_config = top
        .backup
        .as_ref()
        .ok_or_else(|| SurekError::backup("backup is not configured in surek.yml"))?;

    let previously_running = previously_running_stacks(cwd, stack_filter).await;

    info!("stopping stacks for restore");
    match stack_filter {
        Some(name) => {
            deploy::stop(cwd, name, true)?;
        }
        None => {
            if let Ok(records) = discovery::discover_stacks(cwd) {
                for record in records.into_iter().filter(|r| r.valid) {
                    let _ = deploy::stop(cwd, &record.name(), true);
                }
            }
            let _ = deploy::stop(cwd, SYSTEM_STACK_NAME, true);
        }
    }

    let tmp = tempfile::tempdir().map_err(|e| SurekError::backup(e.to_string()))?;
    let archive_path = tmp.path().join(backup_name);
    info!("downloading backup {backup_name}");
    download(backup_config, backup_name, &archive_path).await?;

    info!("decrypting and extracting backup");
    let extract_dir = tmp.path().join("extracted");
    decrypt_and_extract(&archive_path, backup_config.password.expose_secret(), &extract_dir)?;

    swap_volumes(cwd, &extract_dir, stack_filter, volume_filter)?;

    info!("restarting previously running stacks");
    for stack_name in previously_running {
        if let Err(e) = deploy::start(cwd, &stack_name, false) {
            warn!("failed to restart '{stack_name}' after restore: {e}");
        }
    }

    Ok(())
}

async fn previously_running_stacks(cwd: &Path, stack_filter: Option<&str>) -> Vec<String> {
    let mut names = Vec::new();
    let candidates: Vec<String> = match stack_filter {
        Some(name) => vec![name.to_string()],
        None => {
            let mut all = vec![SYSTEM_STACK_NAME.to_string()];
            if let Ok(records) = discovery::discover_stacks(cwd) {
                all.extend(records.into_iter().filter(|r| r.valid).map(|r| r.name()));
            }
            all
        }
    };

    for name in candidates {
        if let Ok(status) = crate::status::get_stack_status(cwd, &name, false).await {
            if status.status_text.contains("running") || status.status_text.contains("partial") {
                names.push(name);
            }
        }
    }
    names
}

/// For each `extracted/backup/<stack>/<volume>` respecting optional
/// filters, swap it atomically into `volumes_dir/<stack>/<volume>/`.
fn swap_volumes(
    cwd: &Path,
    extract_dir: &Path,
    stack_filter: Option<&str>,
    volume_filter: Option<&str>,
) -> Result<(), SurekError> {
    let backup_root = extract_dir.join("backup");
    if !backup_root.exists() {
        warn!("extracted archive has no 'backup/' directory; nothing to restore");
        return Ok(());
    }

    let volumes_dir = paths::volumes_dir(cwd).map_err(|e| SurekError::backup(e.to_string()))?;

    for stack_entry in std::fs::read_dir(&backup_root).map_err(|e| SurekError::backup(e.to_string()))? {
        let stack_entry = stack_entry.map_err(|e| SurekError::backup(e.to_string()))?;
        let stack_name = stack_entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = stack_filter {
            if stack_name != filter {
                continue;
            }
        }
        if !stack_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        for volume_entry in std::fs::read_dir(stack_entry.path()).map_err(|e| SurekError::backup(e.to_string()))? {
            let volume_entry = volume_entry.map_err(|e| SurekError::backup(e.to_string()))?;
            let volume_name = volume_entry.file_name().to_string_lossy().to_string();
            if let Some(filter) = volume_filter {
                if volume_name != filter {
                    continue;
                }
            }

            let target: PathBuf = volumes_dir.join(&stack_name).join(&volume_name);
            info!("restoring {stack_name}/{volume_name}");
            if target.exists() {
                std::fs::remove_dir_all(&target).map_err(|e| SurekError::backup(e.to_string()))?;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SurekError::backup(e.to_string()))?;
            }
            copy_dir_recursive(&volume_entry.path(), &target).map_err(|e| SurekError::backup(e.to_string()))?;
        }
    }

    Ok(())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_type_derived_from_key_prefix() {
        assert_eq!(BackupType::from_key("daily-2024.tar.gz.gpg").as_str(), "daily");
        assert_eq!(BackupType::from_key("weekly-2024.tar.gz.gpg").as_str(), "weekly");
        assert_eq!(BackupType::from_key("monthly-2024.tar.gz.gpg").as_str(), "monthly");
        assert_eq!(BackupType::from_key("manual-2024.tar.gz.gpg").as_str(), "manual");
        assert_eq!(BackupType::from_key("2024.tar.gz.gpg").as_str(), "unknown");
    }

    #[test]
    fn failure_log_round_trips_and_caps_at_100() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..105 {
            record_failure(tmp.path(), "manual", &format!("error {i}")).unwrap();
        }
        let failures = load_failures(tmp.path()).unwrap();
        assert_eq!(failures.len(), 100);
        assert_eq!(failures.last().unwrap().error, "error 104");
    }

    #[test]
    fn recent_failures_returns_last_n_most_recent_last() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..5 {
            record_failure(tmp.path(), "manual", &format!("error {i}")).unwrap();
        }
        let recent = recent_failures(tmp.path(), 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].error, "error 3");
        assert_eq!(recent[1].error, "error 4");
    }

    #[test]
    fn no_failures_file_yields_empty_vec() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(recent_failures(tmp.path(), 10).unwrap().is_empty());
    }
}
