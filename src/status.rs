//! Status Aggregator (spec §4.8) — given a stack name, fans out container
//! queries (optionally stats) to the Container Adapter and produces an
//! aggregated health summary.

use crate::docker::{self, ContainerStats};
use crate::error::SurekError;
use crate::paths;
use bollard::models::ContainerSummary;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::path::Path;

/// Bound on concurrent `container_stats` calls (spec §4.8, §5): stats are
/// slow (~1-2s each), so the fan-out is capped rather than unbounded.
const STATS_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: String,
    pub health: Option<String>,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackStatus {
    pub status_text: String,
    pub services: Vec<ServiceHealth>,
    pub health_summary: String,
    pub cpu_percent_total: f64,
    pub memory_bytes_total: u64,
}

impl StackStatus {
    fn empty(status_text: &str) -> Self {
        StackStatus {
            status_text: status_text.to_string(),
            services: Vec::new(),
            health_summary: "-".to_string(),
            cpu_percent_total: 0.0,
            memory_bytes_total: 0,
        }
    }
}

/// Given `stack_name` and `include_stats`, produces an aggregated
/// `StackStatus`. Never returns `Err` for "not deployed" or "engine
/// unavailable" — those are status values, not failures (spec §4.8).
pub async fn get_stack_status(
    cwd: &Path,
    stack_name: &str,
    include_stats: bool,
) -> Result<StackStatus, SurekError> {
    let project_dir = paths::project_dir(cwd, stack_name).map_err(|e| SurekError::engine(e.to_string()))?;
    let compose_file = project_dir.join(paths::PATCHED_COMPOSE_FILE);
    if !compose_file.exists() {
        return Ok(StackStatus::empty("not deployed"));
    }

    let docker = match docker::connect() {
        Ok(d) => d,
        Err(_) => return Ok(StackStatus::empty("engine unavailable")),
    };

    let containers = docker::list_containers(&docker, stack_name).await?;
    if containers.is_empty() {
        return Ok(StackStatus::empty("down"));
    }

    let stats_by_id = if include_stats {
        fetch_stats(&docker, &containers).await
    } else {
        std::collections::HashMap::new()
    };

    build_status(&containers, &stats_by_id)
}

async fn fetch_stats(
    docker: &bollard::Docker,
    containers: &[ContainerSummary],
) -> std::collections::HashMap<String, ContainerStats> {
    let running: Vec<&ContainerSummary> = containers.iter().filter(|c| docker::is_running(c)).collect();

    stream::iter(running)
        .map(|c| async move {
            let id = c.id.clone().unwrap_or_default();
            let stats = docker::container_stats(docker, &id).await;
            (id, stats)
        })
        .buffer_unordered(STATS_CONCURRENCY)
        .collect()
        .await
}

fn build_status(
    containers: &[ContainerSummary],
    stats_by_id: &std::collections::HashMap<String, ContainerStats>,
) -> Result<StackStatus, SurekError> {
    let mut services = Vec::with_capacity(containers.len());
    let mut cpu_total = 0.0;
    let mut memory_total = 0u64;
    let mut running = 0usize;

    for container in containers {
        let name = docker::service_name(container);
        let status = container.status.clone().unwrap_or_default();
        let is_running = docker::is_running(container);
        if is_running {
            running += 1;
        }

        let health = container_health(container);

        let id = container.id.clone().unwrap_or_default();
        let stats = stats_by_id.get(&id).copied().unwrap_or_default();
        cpu_total += stats.cpu_percent;
        memory_total += stats.memory_bytes;

        services.push(ServiceHealth {
            name,
            status,
            health,
            cpu_percent: stats.cpu_percent,
            memory_bytes: stats.memory_bytes,
        });
    }

    let total = services.len();
    let status_text = if running == 0 {
        "down".to_string()
    } else if running == total {
        format!("\u{2713} running ({running}/{total})")
    } else {
        format!("\u{26a0} partial ({running}/{total})")
    };

    let unhealthy = services.iter().filter(|s| s.health.as_deref() == Some("unhealthy")).count();
    let starting = services.iter().filter(|s| s.health.as_deref() == Some("starting")).count();
    let health_summary = if unhealthy > 0 {
        format!("\u{26a0} {unhealthy} unhealthy")
    } else if starting > 0 {
        "starting\u{2026}".to_string()
    } else if services
        .iter()
        .all(|s| matches!(s.health.as_deref(), Some("healthy") | None))
    {
        "\u{2713} healthy".to_string()
    } else {
        "-".to_string()
    };

    Ok(StackStatus {
        status_text,
        services,
        health_summary,
        cpu_percent_total: cpu_total,
        memory_bytes_total: memory_total,
    })
}

/// `State.Health.Status` when present on the container summary's inspect
/// data. `bollard`'s list-containers response does not carry the nested
/// health block directly, so this parses it out of the human-readable
/// `status` string's trailing `(healthy|unhealthy|starting)` suffix,
/// falling back to `None` (the same "pending/no healthcheck" meaning as
/// the original's `state.get("Health")` lookup returning nothing).
fn container_health(container: &ContainerSummary) -> Option<String> {
    // bollard's ContainerSummary doesn't expose a structured health
    // field; engines that support it surface it in `status` as a
    // suffix like "Up 2 minutes (healthy)".
    let status = container.status.as_deref()?;
    let start = status.rfind('(')?;
    let end = status.rfind(')')?;
    if end <= start {
        return None;
    }
    let candidate = &status[start + 1..end];
    match candidate {
        "healthy" | "unhealthy" | "starting" => Some(candidate.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(status: &str) -> ContainerSummary {
        ContainerSummary {
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn health_parsed_from_status_suffix() {
        assert_eq!(container_health(&container("Up 2 minutes (healthy)")), Some("healthy".to_string()));
        assert_eq!(container_health(&container("Up 2 minutes (unhealthy)")), Some("unhealthy".to_string()));
        assert_eq!(container_health(&container("Up 2 minutes")), None);
        assert_eq!(container_health(&container("Exited (0) 3 hours ago")), None);
    }

    #[test]
    fn partial_status_text_and_unhealthy_summary() {
        let containers = vec![
            ContainerSummary {
                id: Some("a".into()),
                state: Some("running".into()),
                status: Some("Up 1 minute (healthy)".into()),
                ..Default::default()
            },
            ContainerSummary {
                id: Some("b".into()),
                state: Some("running".into()),
                status: Some("Up 1 minute (unhealthy)".into()),
                ..Default::default()
            },
            ContainerSummary {
                id: Some("c".into()),
                state: Some("exited".into()),
                status: Some("Exited (0) 1 minute ago".into()),
                ..Default::default()
            },
        ];
        let status = build_status(&containers, &std::collections::HashMap::new()).unwrap();
        assert_eq!(status.status_text, "\u{26a0} partial (2/3)");
        assert_eq!(status.health_summary, "\u{26a0} 1 unhealthy");
    }

    #[test]
    fn all_running_healthy_status() {
        let containers = vec![ContainerSummary {
            id: Some("a".into()),
            state: Some("running".into()),
            status: Some("Up 1 minute (healthy)".into()),
            ..Default::default()
        }];
        let status = build_status(&containers, &std::collections::HashMap::new()).unwrap();
        assert_eq!(status.status_text, "\u{2713} running (1/1)");
        assert_eq!(status.health_summary, "\u{2713} healthy");
    }

    #[test]
    fn down_when_no_running_containers() {
        let containers = vec![ContainerSummary {
            id: Some("a".into()),
            state: Some("exited".into()),
            status: Some("Exited (0) 1 minute ago".into()),
            ..Default::default()
        }];
        let status = build_status(&containers, &std::collections::HashMap::new()).unwrap();
        assert_eq!(status.status_text, "down");
    }
}
