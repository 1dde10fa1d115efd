//! Deploy Orchestrator (spec §4.9) — end-to-end deploy/start/stop of a
//! stack or the system stack.

use crate::compose;
use crate::config::stack::{StackConfig, StackRecord, SYSTEM_STACK_NAME};
use crate::config::TopLevelConfig;
use crate::docker;
use crate::error::SurekError;
use crate::paths;
use crate::source;
use std::path::Path;
use tracing::info;

/// Full pipeline (spec §4.9 `deploy`): acquire source, overlay, transform,
/// write the patched compose file, then `start`.
pub async fn deploy(
    cwd: &Path,
    stack: &StackRecord,
    top: &TopLevelConfig,
    pull: bool,
    client: &reqwest::Client,
) -> Result<(), SurekError> {
    if !stack.valid {
        return Err(SurekError::deploy(format!(
            "cannot deploy invalid stack: {}",
            stack.error.as_deref().unwrap_or("unknown error")
        )));
    }
    let config = stack
        .config
        .as_ref()
        .ok_or_else(|| SurekError::deploy("stack has no config"))?;

    info!("deploying stack '{}'", config.name);

    let stack_dir = stack.path.parent().ok_or_else(|| SurekError::deploy("stack has no parent directory"))?;
    let project_dir = source::acquire(cwd, stack_dir, config, top, pull, client).await?;

    write_patched_compose(cwd, &project_dir, config, top, false)?;

    start(cwd, &config.name, pull)
}

/// `start(stack, pull)` (spec §4.9): `up -d --build`, plus `--pull always`
/// when `pull` is set.
pub fn start(cwd: &Path, stack_name: &str, pull: bool) -> Result<(), SurekError> {
    let project_dir = paths::project_dir(cwd, stack_name).map_err(|e| SurekError::deploy(e.to_string()))?;
    let patched_path = project_dir.join(paths::PATCHED_COMPOSE_FILE);
    if !patched_path.exists() {
        return Err(SurekError::deploy(format!(
            "couldn't find compose file for stack '{stack_name}'. Deploy it first"
        )));
    }

    let mut args = vec!["-d", "--build"];
    if pull {
        args.push("--pull");
        args.push("always");
    }

    docker::run_compose(&patched_path, &project_dir, "up", &args, false, false)?;
    info!("containers started for '{stack_name}'");
    Ok(())
}

/// `stop(stack, silent)` (spec §4.9): if the patched file is missing and
/// `silent`, returns quietly; else fails.
pub fn stop(cwd: &Path, stack_name: &str, silent: bool) -> Result<(), SurekError> {
    let project_dir = paths::project_dir(cwd, stack_name).map_err(|e| SurekError::deploy(e.to_string()))?;
    let patched_path = project_dir.join(paths::PATCHED_COMPOSE_FILE);
    if !patched_path.exists() {
        if silent {
            return Ok(());
        }
        return Err(SurekError::deploy(format!(
            "couldn't find compose file for stack '{stack_name}'"
        )));
    }

    docker::run_compose(&patched_path, &project_dir, "stop", &[], false, silent)?;
    if !silent {
        info!("containers stopped for '{stack_name}'");
    }
    Ok(())
}

/// Loads the bundled system stack's own `surek.stack.yml`.
fn load_system_stack_config() -> Result<StackConfig, SurekError> {
    let path = paths::system_dir().join(paths::STACK_CONFIG_FILE);
    StackConfig::load(&path)
}

/// `system-deploy` (spec §4.9): loads the bundled system stack config,
/// filters its public endpoints by enabled `system_services`, ensures the
/// shared network first, always wipes prior system containers, then
/// follows the same pipeline with the extra system-stack transformation.
pub async fn deploy_system(cwd: &Path, top: &TopLevelConfig) -> Result<(), SurekError> {
    let docker = docker::connect()?;
    docker::ensure_shared_network(&docker).await?;

    let mut config = load_system_stack_config()?;
    config.public.retain(|ep| match ep.service_name.as_str() {
        "proxy_sidecar_a" => top.system_services.proxy_sidecar_a,
        "proxy_sidecar_b" => top.system_services.proxy_sidecar_b,
        _ => true,
    });

    info!("deploying system stack");
    stop(cwd, &config.name, true).ok();

    let system_dir = paths::system_dir();
    let project_dir = paths::project_dir(cwd, &config.name).map_err(|e| SurekError::deploy(e.to_string()))?;
    if project_dir.exists() {
        std::fs::remove_dir_all(&project_dir)
            .map_err(|e| SurekError::deploy(format!("clearing system project dir: {e}")))?;
    }
    copy_dir_recursive(&system_dir, &project_dir)
        .map_err(|e| SurekError::deploy(format!("copying system stack assets: {e}")))?;

    write_patched_compose(cwd, &project_dir, &config, top, true)?;

    start(cwd, &config.name, false)
}

/// `reset(stack)` (spec §4.9): stop (silent), then remove the project dir
/// and the volumes dir. Refuses to reset the system stack.
pub fn reset(cwd: &Path, stack_name: &str) -> Result<(), SurekError> {
    if stack_name == SYSTEM_STACK_NAME {
        return Err(SurekError::deploy("refusing to reset the system stack"));
    }

    stop(cwd, stack_name, true)?;

    let project_dir = paths::project_dir(cwd, stack_name).map_err(|e| SurekError::deploy(e.to_string()))?;
    if project_dir.exists() {
        std::fs::remove_dir_all(&project_dir)
            .map_err(|e| SurekError::deploy(format!("removing project dir: {e}")))?;
    }

    let volume_dir = paths::volumes_dir(cwd)
        .map_err(|e| SurekError::deploy(e.to_string()))?
        .join(stack_name);
    if volume_dir.exists() {
        std::fs::remove_dir_all(&volume_dir)
            .map_err(|e| SurekError::deploy(format!("removing volumes dir: {e}")))?;
    }

    info!("stack '{stack_name}' has been reset");
    Ok(())
}

fn write_patched_compose(
    cwd: &Path,
    project_dir: &Path,
    config: &StackConfig,
    top: &TopLevelConfig,
    is_system: bool,
) -> Result<(), SurekError> {
    let compose_path = project_dir.join(config.compose_file_path.trim_start_matches("./"));
    if !compose_path.exists() {
        return Err(SurekError::deploy(format!(
            "couldn't find compose file at {}",
            compose_path.display()
        )));
    }
    let content = std::fs::read_to_string(&compose_path)
        .map_err(|e| SurekError::deploy(format!("reading compose file: {e}")))?;

    let mut doc = compose::parse_and_expand(&content, &top.template_vars())?;
    if is_system {
        doc = compose::transform_system_compose(doc, top);
    }

    let volumes_dir = paths::volumes_dir(cwd)
        .map_err(|e| SurekError::deploy(e.to_string()))?
        .join(&config.name);
    let output = compose::transform_stack_compose(doc, config, top, &volumes_dir)?;
    compose::materialize(&output.volume_dirs)
        .map_err(|e| SurekError::deploy(format!("creating volume directories: {e}")))?;

    let patched_path = project_dir.join(paths::PATCHED_COMPOSE_FILE);
    let serialized = serde_yaml::to_string(&output.compose)
        .map_err(|e| SurekError::deploy(format!("serializing patched compose: {e}")))?;
    std::fs::write(&patched_path, serialized)
        .map_err(|e| SurekError::deploy(format!("writing patched compose: {e}")))?;
    info!("saved patched compose file at {}", patched_path.display());

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
    use crate::config::stack::StackRecord;

    fn top_level() -> TopLevelConfig {
        TopLevelConfig::parse("root_domain: example.com\ndefault_auth: admin:s3cret\n").unwrap()
    }

    fn stack_record(dir: &Path, name: &str) -> StackRecord {
        StackRecord {
            path: dir.join("surek.stack.yml"),
            valid: true,
            config: Some(StackConfig::parse(&format!("name: {name}\n")).unwrap()),
            error: None,
        }
    }

    #[tokio::test]
    async fn deploy_rejects_invalid_stack() {
        let tmp = tempfile::tempdir().unwrap();
        let mut record = stack_record(tmp.path(), "demo");
        record.valid = false;
        record.error = Some("boom".to_string());
        let top = top_level();
        let client = reqwest::Client::new();
        let err = deploy(tmp.path(), &record, &top, false, &client).await.unwrap_err();
        assert!(err.to_string().contains("invalid stack"));
    }

    #[test]
    fn start_fails_without_patched_compose() {
        let tmp = tempfile::tempdir().unwrap();
        let err = start(tmp.path(), "demo", false).unwrap_err();
        assert!(err.to_string().contains("Deploy it first"));
    }

    #[test]
    fn stop_silent_without_patched_compose_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        stop(tmp.path(), "demo", true).unwrap();
    }

    #[test]
    fn stop_errors_without_patched_compose_when_not_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let err = stop(tmp.path(), "demo", false).unwrap_err();
        assert!(err.to_string().contains("couldn't find compose file"));
    }

    #[test]
    fn reset_refuses_system_stack() {
        let tmp = tempfile::tempdir().unwrap();
        let err = reset(tmp.path(), SYSTEM_STACK_NAME).unwrap_err();
        assert!(err.to_string().contains("refusing"));
    }
}
