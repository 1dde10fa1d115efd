//! Container Adapter (spec §4.7) — a thin typed facade over the container
//! engine's daemon API (via `bollard`) plus the external `compose`
//! subcommand for `up`/`stop`, following the same error-context pattern as
//! the teacher's `BollardResultExt`.

use crate::compose::SUREK_NETWORK;
use crate::error::SurekError;
use bollard::container::{ListContainersOptions, StatsOptions};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerSummary;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;

pub trait EngineResultExt<T> {
    fn engine_context(self, context: &str) -> Result<T, SurekError>;
}

impl<T> EngineResultExt<T> for Result<T, BollardError> {
    fn engine_context(self, context: &str) -> Result<T, SurekError> {
        self.map_err(|e| match e {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => SurekError::engine(format!("{context} - engine error ({status_code}): {message}")),
            _ => SurekError::engine(format!("{context}: {e}")),
        })
    }
}

/// Connects to the local engine daemon. Distinguished from other engine
/// errors so the Status Aggregator can report "engine unavailable".
pub fn connect() -> Result<Docker, SurekError> {
    Docker::connect_with_local_defaults()
        .map_err(|e| SurekError::engine(format!("could not connect to container engine: {e}")))
}

/// Idempotent create of the shared bridge network, labeled
/// `surek.managed=true` (spec §4.7, §6).
pub async fn ensure_shared_network(docker: &Docker) -> Result<(), SurekError> {
    let existing = docker
        .list_networks(None::<ListNetworksOptions<String>>)
        .await
        .engine_context("listing networks")?;
    if existing.iter().any(|n| n.name.as_deref() == Some(SUREK_NETWORK)) {
        return Ok(());
    }

    let mut labels = HashMap::new();
    labels.insert("surek.managed", "true");

    docker
        .create_network(CreateNetworkOptions {
            name: SUREK_NETWORK,
            driver: "bridge",
            labels,
            ..Default::default()
        })
        .await
        .engine_context("creating shared network")?;
    Ok(())
}

/// All containers (including stopped) labeled for the given Compose
/// project.
pub async fn list_containers(
    docker: &Docker,
    project_name: &str,
) -> Result<Vec<ContainerSummary>, SurekError> {
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        vec![format!("com.docker.compose.project={project_name}")],
    );

    let options = ListContainersOptions {
        all: true,
        filters,
        ..Default::default()
    };

    docker
        .list_containers(Some(options))
        .await
        .engine_context(&format!("listing containers for project {project_name}"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// Blocking, non-streaming stat sample. Returns `Default` (0/0) on missing
/// fields or negative deltas rather than erroring, matching the teacher's
/// "stats failures degrade, never abort" posture.
pub async fn container_stats(docker: &Docker, container_id: &str) -> ContainerStats {
    let options = StatsOptions {
        stream: false,
        one_shot: true,
    };
    let mut stream = docker.stats(container_id, Some(options));
    let Some(Ok(stats)) = stream.next().await else {
        return ContainerStats::default();
    };

    let total_usage = stats.cpu_stats.cpu_usage.total_usage;
    let pretotal_usage = stats.precpu_stats.cpu_usage.total_usage;
    let system_usage = stats.cpu_stats.system_cpu_usage.unwrap_or(0);
    let presystem_usage = stats.precpu_stats.system_cpu_usage.unwrap_or(0);
    let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1) as f64;

    let cpu_delta = total_usage.saturating_sub(pretotal_usage) as f64;
    let system_delta = system_usage.saturating_sub(presystem_usage) as f64;

    let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
        (cpu_delta / system_delta) * online_cpus * 100.0
    } else {
        0.0
    };

    let memory_bytes = stats.memory_stats.usage.unwrap_or(0);

    ContainerStats {
        cpu_percent,
        memory_bytes,
    }
}

/// Blocking exec; returns `(exit_code, output_bytes)`.
pub async fn exec_in_container(
    docker: &Docker,
    container_id: &str,
    argv: Vec<String>,
) -> Result<(i64, Vec<u8>), SurekError> {
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                cmd: Some(argv),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            },
        )
        .await
        .engine_context("creating exec")?;

    let mut output = Vec::new();
    if let StartExecResults::Attached { mut output, .. } =
        docker.start_exec(&exec.id, None).await.engine_context("starting exec")?
    {
        let mut buf = Vec::new();
        while let Some(Ok(chunk)) = output.next().await {
            buf.extend_from_slice(chunk.into_bytes().as_ref());
        }
        return finish_exec(docker, &exec.id, buf).await;
    }

    finish_exec(docker, &exec.id, std::mem::take(&mut output)).await
}

async fn finish_exec(
    docker: &Docker,
    exec_id: &str,
    output: Vec<u8>,
) -> Result<(i64, Vec<u8>), SurekError> {
    let inspect = docker
        .inspect_exec(exec_id)
        .await
        .engine_context("inspecting exec")?;
    let exit_code = inspect.exit_code.unwrap_or(-1);
    Ok((exit_code, output))
}

/// Invokes the external compose subcommand:
/// `<engine> compose --file <compose_file> --project-directory <project_dir> <subcommand> <args...>`.
/// `silent` only suppresses the `$ ...` command echo the teacher logs at
/// `debug`; it never suppresses the error path.
pub fn run_compose(
    compose_file: &Path,
    project_dir: &Path,
    subcommand: &str,
    args: &[&str],
    capture: bool,
    silent: bool,
) -> Result<String, SurekError> {
    let mut cmd = std::process::Command::new("docker");
    cmd.arg("compose")
        .arg("--file")
        .arg(compose_file)
        .arg("--project-directory")
        .arg(project_dir)
        .arg(subcommand)
        .args(args);

    if !silent {
        tracing::debug!(
            "$ docker compose --file {} --project-directory {} {subcommand} {}",
            compose_file.display(),
            project_dir.display(),
            args.join(" ")
        );
    }

    let output = cmd
        .output()
        .map_err(|e| SurekError::engine(format!("failed to invoke compose: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(SurekError::engine(stderr));
    }

    if capture {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Ok(String::new())
    }
}

/// Whether the engine reports this container as running. `state` is
/// preferred; `status` (a human string like "Up 3 minutes") is the
/// fallback some engine versions populate instead.
pub fn is_running(container: &ContainerSummary) -> bool {
    if let Some(state) = &container.state {
        return state == "running";
    }
    container
        .status
        .as_ref()
        .map(|s| s.starts_with("Up"))
        .unwrap_or(false)
}

/// `com.docker.compose.service` label value, falling back to the
/// container's own name.
pub fn service_name(container: &ContainerSummary) -> String {
    container
        .labels
        .as_ref()
        .and_then(|l| l.get("com.docker.compose.service"))
        .cloned()
        .unwrap_or_else(|| {
            container
                .names
                .as_ref()
                .and_then(|n| n.first())
                .cloned()
                .unwrap_or_else(|| "unknown".to_string())
        })
}
