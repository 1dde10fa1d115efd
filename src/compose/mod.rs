//! Compose Transformer (spec §4.6) — the algorithmic core.
//!
//! Reads a Compose document generically (as `serde_yaml::Value`) for
//! variable expansion, then moves into the typed `docker_compose_types`
//! model for the structural rewrites, where list-vs-map authoring choices
//! on labels/environment/networks/volumes are preserved rather than
//! normalized (spec §9 design note).

use crate::config::stack::StackConfig;
use crate::config::TopLevelConfig;
use crate::error::SurekError;
use crate::vars::{self, TemplateVars};
use docker_compose_types as dctypes;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SUREK_NETWORK: &str = "surek";

fn managed_labels() -> dctypes::Labels {
    let mut map = IndexMap::new();
    map.insert("surek.managed".to_string(), "true".to_string());
    dctypes::Labels::Map(map)
}

/// Parses Compose YAML text, expanding every string leaf through the
/// two-layer variable expander (spec §4.2) before typed deserialization.
pub fn parse_and_expand(content: &str, templates: &TemplateVars) -> Result<dctypes::Compose, SurekError> {
    let raw: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|e| SurekError::stack_config(format!("invalid compose YAML: {e}")))?;
    let expanded = vars::expand_value(&raw, templates)
        .map_err(|e| SurekError::stack_config(e.to_string()))?;
    serde_yaml::from_value(expanded)
        .map_err(|e| SurekError::stack_config(format!("invalid compose document: {e}")))
}

/// Result of `transform_stack_compose`: the rewritten document plus the
/// bind-mount directories it queued for creation (step 7 is left to the
/// caller so tests can assert on the plan before touching the filesystem).
pub struct TransformOutput {
    pub compose: dctypes::Compose,
    pub volume_dirs: Vec<PathBuf>,
}

/// Applies the stack-level transformation (spec §4.6, steps 1-6; step 7
/// left to `materialize`). `volumes_dir` is `<cwd>/surek-data/volumes/<stack>`.
pub fn transform_stack_compose(
    mut compose: dctypes::Compose,
    stack: &StackConfig,
    top: &TopLevelConfig,
    volumes_dir: &Path,
) -> Result<TransformOutput, SurekError> {
    declare_shared_network(&mut compose);

    let volume_dirs = rewrite_volumes(&mut compose, stack, volumes_dir);

    apply_public_endpoints(&mut compose, stack, top)?;

    inject_environment(&mut compose, stack, top)?;

    attach_service_networks(&mut compose);

    Ok(TransformOutput {
        compose,
        volume_dirs,
    })
}

/// System-stack-only pre-transformation (spec §4.6 "System-stack extra
/// transformation"): drop services gated by configuration, applied before
/// the general transform runs over the result.
pub fn transform_system_compose(mut compose: dctypes::Compose, top: &TopLevelConfig) -> dctypes::Compose {
    if top.backup.is_none() {
        compose.services.0.shift_remove("backup");
    }
    if !top.system_services.proxy_sidecar_a {
        compose.services.0.shift_remove("proxy_sidecar_a");
    }
    if !top.system_services.proxy_sidecar_b {
        compose.services.0.shift_remove("proxy_sidecar_b");
    }
    compose
}

fn declare_shared_network(compose: &mut dctypes::Compose) {
    let settings = dctypes::NetworkSettings {
        name: Some(SUREK_NETWORK.to_string()),
        external: Some(dctypes::ComposeNetwork::Bool(true)),
        ..Default::default()
    };
    compose
        .networks
        .0
        .insert(SUREK_NETWORK.to_string(), dctypes::MapOrEmpty::Map(settings));
}

fn rewrite_volumes(
    compose: &mut dctypes::Compose,
    stack: &StackConfig,
    volumes_dir: &Path,
) -> Vec<PathBuf> {
    let mut queued = Vec::new();
    let exclude = &stack.backup.exclude_volumes;

    for (name, value) in compose.volumes.0.iter_mut() {
        if exclude.contains(name) {
            continue;
        }
        let is_preconfigured = match value {
            dctypes::MapOrEmpty::Map(existing) => {
                existing.driver.is_some()
                    || !existing.driver_opts.is_empty()
                    || existing.external.is_some()
                    || existing.name.is_some()
                    || !existing.labels.is_empty()
            }
            dctypes::MapOrEmpty::Empty => false,
        };
        if is_preconfigured {
            warn!("volume {name} is pre-configured; it will be skipped on backup");
            continue;
        }

        let folder = volumes_dir.join(name);
        let mut driver_opts = IndexMap::new();
        driver_opts.insert(
            "type".to_string(),
            Some(dctypes::SingleValue::String("none".to_string())),
        );
        driver_opts.insert(
            "o".to_string(),
            Some(dctypes::SingleValue::String("bind".to_string())),
        );
        driver_opts.insert(
            "device".to_string(),
            Some(dctypes::SingleValue::String(folder.display().to_string())),
        );

        *value = dctypes::MapOrEmpty::Map(dctypes::ComposeVolume {
            driver: Some("local".to_string()),
            driver_opts,
            external: None,
            labels: managed_labels(),
            name: None,
        });
        queued.push(folder);
    }

    queued
}

fn apply_public_endpoints(
    compose: &mut dctypes::Compose,
    stack: &StackConfig,
    top: &TopLevelConfig,
) -> Result<(), SurekError> {
    let templates = top.template_vars();
    let dev_mode = std::env::var("SUREK_ENV").as_deref() == Ok("development");

    for endpoint in &stack.public {
        let service = compose
            .services
            .0
            .get_mut(&endpoint.service_name)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| {
                SurekError::stack_config(format!(
                    "service '{}' not defined in docker-compose config",
                    endpoint.service_name
                ))
            })?;

        let domain = vars::expand_str(&endpoint.domain, &templates)
            .map_err(|e| SurekError::stack_config(e.to_string()))?;

        let mut labels: Vec<(String, String)> = vec![
            ("surek.managed".to_string(), "true".to_string()),
            ("caddy".to_string(), domain),
            (
                "caddy.reverse_proxy".to_string(),
                format!("{{{{upstreams {}}}}}", endpoint.port),
            ),
        ];
        if dev_mode {
            labels.push(("caddy.tls".to_string(), "internal".to_string()));
        }

        if let Some(auth) = &endpoint.auth {
            let expanded = vars::expand_str(auth, &templates)
                .map_err(|e| SurekError::stack_config(e.to_string()))?;
            let (user, password) = expanded.split_once(':').ok_or_else(|| {
                SurekError::stack_config(format!(
                    "public endpoint auth for '{}' must be 'user:pass'",
                    endpoint.service_name
                ))
            })?;
            let hashed = bcrypt::hash(password, 14)
                .map_err(|e| SurekError::stack_config(format!("bcrypt hashing failed: {e}")))?;
            let escaped = hashed.replace('$', "$$");
            labels.push(("caddy.basic_auth".to_string(), String::new()));
            labels.push((format!("caddy.basic_auth.{user}"), escaped));
        }

        merge_labels(&mut service.labels, labels);
    }

    Ok(())
}

fn merge_labels(into: &mut dctypes::Labels, labels: Vec<(String, String)>) {
    match into {
        dctypes::Labels::List(list) => {
            for (key, value) in labels {
                list.push(format!("{key}={value}"));
            }
        }
        dctypes::Labels::Map(map) => {
            for (key, value) in labels {
                map.insert(key, value);
            }
        }
    }
}

fn inject_environment(
    compose: &mut dctypes::Compose,
    stack: &StackConfig,
    top: &TopLevelConfig,
) -> Result<(), SurekError> {
    let Some(env_cfg) = &stack.env else {
        return Ok(());
    };
    let templates = top.template_vars();

    for (service_name, service_slot) in compose.services.0.iter_mut() {
        let Some(service) = service_slot else { continue };

        let by_container = env_cfg
            .by_container
            .get(service_name)
            .cloned()
            .unwrap_or_default();
        let raw: Vec<&String> = env_cfg.shared.iter().chain(by_container.iter()).collect();
        if raw.is_empty() {
            continue;
        }
        let mut expanded = Vec::with_capacity(raw.len());
        for entry in &env_cfg.shared {
            expanded.push(
                vars::expand_str(entry, &templates).map_err(|e| SurekError::stack_config(e.to_string()))?,
            );
        }
        for entry in &by_container {
            expanded.push(
                vars::expand_str(entry, &templates).map_err(|e| SurekError::stack_config(e.to_string()))?,
            );
        }

        merge_environment(&mut service.environment, expanded);
    }

    Ok(())
}

fn merge_environment(into: &mut dctypes::Environment, extra: Vec<String>) {
    match into {
        dctypes::Environment::List(list) => list.extend(extra),
        dctypes::Environment::KvPair(map) => {
            for entry in extra {
                if let Some((key, value)) = entry.split_once('=') {
                    map.insert(
                        key.to_string(),
                        Some(dctypes::SingleValue::String(value.to_string())),
                    );
                }
            }
        }
    }
}

fn attach_service_networks(compose: &mut dctypes::Compose) {
    for (_name, service_slot) in compose.services.0.iter_mut() {
        let Some(service) = service_slot else { continue };
        if service.network_mode.is_some() {
            continue;
        }
        match &mut service.networks {
            dctypes::Networks::Simple(list) => {
                if !list.iter().any(|n| n == SUREK_NETWORK) {
                    list.push(SUREK_NETWORK.to_string());
                }
            }
            dctypes::Networks::Advanced(advanced) => {
                if !advanced.0.contains_key(SUREK_NETWORK) {
                    advanced
                        .0
                        .insert(SUREK_NETWORK.to_string(), dctypes::MapOrEmpty::Empty);
                }
            }
        }
    }
}

/// Step 7: create every queued bind-mount directory. Idempotent.
pub fn materialize(volume_dirs: &[PathBuf]) -> std::io::Result<()> {
    for dir in volume_dirs {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::stack::StackConfig;

    fn top_level() -> TopLevelConfig {
        TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: admin:s3cret
"#,
        )
        .unwrap()
    }

    fn stack_with_public() -> StackConfig {
        StackConfig::parse(
            r#"
name: demo
public:
  - domain: "demo.<root>"
    target: "web:8080"
    auth: "<default_auth>"
"#,
        )
        .unwrap()
    }

    fn compose(yaml: &str) -> dctypes::Compose {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn declares_shared_network_as_external() {
        let mut c = compose("services:\n  web:\n    image: nginx\n");
        declare_shared_network(&mut c);
        match c.networks.0.get(SUREK_NETWORK).unwrap() {
            dctypes::MapOrEmpty::Map(settings) => {
                assert_eq!(settings.name.as_deref(), Some(SUREK_NETWORK));
                assert!(matches!(settings.external, Some(dctypes::ComposeNetwork::Bool(true))));
            }
            _ => panic!("expected declared network"),
        }
    }

    #[test]
    fn rewrites_plain_volume_to_bind_mount() {
        let mut c = compose("services:\n  web:\n    image: nginx\nvolumes:\n  data: {}\n");
        let stack = StackConfig::parse("name: demo\n").unwrap();
        let dirs = rewrite_volumes(&mut c, &stack, Path::new("/data/volumes/demo"));
        assert_eq!(dirs, vec![PathBuf::from("/data/volumes/demo/data")]);
        match c.volumes.0.get("data").unwrap() {
            dctypes::MapOrEmpty::Map(v) => {
                assert_eq!(v.driver.as_deref(), Some("local"));
            }
            _ => panic!("expected rewritten volume"),
        }
    }

    #[test]
    fn skips_excluded_volume() {
        let mut c = compose("services:\n  web:\n    image: nginx\nvolumes:\n  data: {}\n  keep: {}\n");
        let stack = StackConfig::parse(
            r#"
name: demo
backup:
  exclude_volumes: ["keep"]
"#,
        )
        .unwrap();
        let dirs = rewrite_volumes(&mut c, &stack, Path::new("/data/volumes/demo"));
        assert_eq!(dirs, vec![PathBuf::from("/data/volumes/demo/data")]);
        assert!(matches!(
            c.volumes.0.get("keep").unwrap(),
            dctypes::MapOrEmpty::Empty
        ));
    }

    #[test]
    fn skips_preconfigured_volume() {
        let mut c = compose(
            "services:\n  web:\n    image: nginx\nvolumes:\n  data:\n    driver: local\n    name: external_data\n",
        );
        let stack = StackConfig::parse("name: demo\n").unwrap();
        let dirs = rewrite_volumes(&mut c, &stack, Path::new("/data/volumes/demo"));
        assert!(dirs.is_empty());
    }

    #[test]
    fn public_endpoint_fails_when_service_missing() {
        let mut c = compose("services:\n  app:\n    image: nginx\n");
        let stack = stack_with_public();
        let top = top_level();
        let err = apply_public_endpoints(&mut c, &stack, &top).unwrap_err();
        assert!(err.to_string().contains("web"));
    }

    #[test]
    fn public_endpoint_adds_caddy_labels_and_basic_auth() {
        let mut c = compose("services:\n  web:\n    image: nginx\n");
        let stack = stack_with_public();
        let top = top_level();
        apply_public_endpoints(&mut c, &stack, &top).unwrap();
        let service = c.services.0.get("web").unwrap().as_ref().unwrap();
        match &service.labels {
            dctypes::Labels::Map(map) => {
                assert_eq!(map.get("caddy").unwrap(), "demo.example.com");
                assert_eq!(map.get("caddy.reverse_proxy").unwrap(), "{{upstreams 8080}}");
                assert!(map.contains_key("caddy.basic_auth.admin"));
                let escaped = map.get("caddy.basic_auth.admin").unwrap();
                assert!(escaped.contains("$$"), "expected every '$' doubled, got {escaped}");
                let unescaped = escaped.replace("$$", "$");
                assert!(unescaped.starts_with("$2"), "expected a bcrypt hash, got {unescaped}");
            }
            _ => panic!("expected map-form labels"),
        }
    }

    #[test]
    fn environment_injection_preserves_list_form_and_order() {
        let mut c = compose("services:\n  web:\n    image: nginx\n    environment:\n      - FOO=bar\n");
        let stack = StackConfig::parse(
            r#"
name: demo
env:
  shared: ["SHARED=1"]
  by_container:
    web: ["ONLY_WEB=2"]
"#,
        )
        .unwrap();
        let top = top_level();
        inject_environment(&mut c, &stack, &top).unwrap();
        let service = c.services.0.get("web").unwrap().as_ref().unwrap();
        match &service.environment {
            dctypes::Environment::List(list) => {
                assert_eq!(list, &vec!["FOO=bar", "SHARED=1", "ONLY_WEB=2"]);
            }
            _ => panic!("expected list-form environment"),
        }
    }

    #[test]
    fn service_network_attachment_skips_network_mode() {
        let mut c = compose("services:\n  web:\n    image: nginx\n    network_mode: host\n");
        attach_service_networks(&mut c);
        let service = c.services.0.get("web").unwrap().as_ref().unwrap();
        assert!(matches!(&service.networks, dctypes::Networks::Simple(v) if v.is_empty()));
    }

    #[test]
    fn service_network_attachment_preserves_map_form() {
        let mut c = compose(
            "services:\n  web:\n    image: nginx\n    networks:\n      othernet: {}\n",
        );
        attach_service_networks(&mut c);
        let service = c.services.0.get("web").unwrap().as_ref().unwrap();
        match &service.networks {
            dctypes::Networks::Advanced(adv) => {
                assert!(adv.0.contains_key(SUREK_NETWORK));
                assert!(adv.0.contains_key("othernet"));
            }
            _ => panic!("expected advanced/map-form networks"),
        }
    }

    #[test]
    fn system_compose_drops_disabled_sidecars() {
        let c = compose(
            "services:\n  proxy:\n    image: caddy\n  proxy_sidecar_a:\n    image: a\n  proxy_sidecar_b:\n    image: b\n",
        );
        let mut top = top_level();
        top.system_services.proxy_sidecar_a = false;
        let out = transform_system_compose(c, &top);
        assert!(!out.services.0.contains_key("proxy_sidecar_a"));
        assert!(out.services.0.contains_key("proxy_sidecar_b"));
        assert!(out.services.0.contains_key("proxy"));
    }
}
