//! Per-stack configuration (spec §3 `StackConfig`, `Source`, `PublicEndpoint`).

use crate::error::SurekError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const SYSTEM_STACK_NAME: &str = "system";
const RESERVED_STACK_NAMES: [&str; 2] = ["system", "surek-system"];

static STACK_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap());

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStackConfig {
    name: String,
    #[serde(default)]
    source: RawSource,
    #[serde(default = "default_compose_file_path")]
    compose_file_path: String,
    #[serde(default)]
    public: Vec<RawPublicEndpoint>,
    #[serde(default)]
    env: Option<RawEnvConfig>,
    #[serde(default)]
    backup: RawStackBackupConfig,
}

fn default_compose_file_path() -> String {
    "./docker-compose.yml".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
enum RawSource {
    Local,
    Remote { slug: String },
}

impl Default for RawSource {
    fn default() -> Self {
        RawSource::Local
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPublicEndpoint {
    domain: String,
    target: String,
    #[serde(default)]
    auth: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawEnvConfig {
    #[serde(default)]
    shared: Vec<String>,
    #[serde(default)]
    by_container: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawStackBackupConfig {
    #[serde(default)]
    exclude_volumes: Vec<String>,
}

/// Tagged union for where a stack's Compose source lives (spec §9 design
/// note: replaces class-hierarchy polymorphism).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local,
    RemoteArchive {
        slug: String,
        owner: String,
        repo: String,
        git_ref: String,
    },
}

impl Source {
    fn from_raw(raw: RawSource) -> Result<Self, String> {
        match raw {
            RawSource::Local => Ok(Source::Local),
            RawSource::Remote { slug } => {
                if !slug.contains('/') {
                    return Err(
                        "slug must be in 'owner/repo' or 'owner/repo#ref' format".to_string()
                    );
                }
                let (repo_part, git_ref) = match slug.split_once('#') {
                    Some((r, g)) => (r.to_string(), g.to_string()),
                    None => (slug.clone(), "HEAD".to_string()),
                };
                let (owner, repo) = repo_part
                    .split_once('/')
                    .ok_or_else(|| "slug must have exactly one '/' separator".to_string())?;
                if owner.is_empty() {
                    return Err("owner cannot be empty".to_string());
                }
                if repo.is_empty() {
                    return Err("repo cannot be empty".to_string());
                }
                Ok(Source::RemoteArchive {
                    slug,
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    git_ref,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublicEndpoint {
    pub domain: String,
    pub service_name: String,
    pub port: u16,
    pub auth: Option<String>,
}

impl PublicEndpoint {
    fn from_raw(raw: RawPublicEndpoint) -> Result<Self, String> {
        let (service_name, port) = match raw.target.split_once(':') {
            Some((svc, port_str)) => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| format!("target '{}' has an invalid port", raw.target))?;
                (svc.to_string(), port)
            }
            None => (raw.target.clone(), 80),
        };
        Ok(PublicEndpoint {
            domain: raw.domain,
            service_name,
            port,
            auth: raw.auth,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub shared: Vec<String>,
    pub by_container: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct StackBackupConfig {
    pub exclude_volumes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    pub name: String,
    pub source: Source,
    pub compose_file_path: String,
    pub public: Vec<PublicEndpoint>,
    pub env: Option<EnvConfig>,
    pub backup: StackBackupConfig,
}

impl StackConfig {
    pub fn parse(content: &str) -> Result<Self, SurekError> {
        if content.trim().is_empty() {
            return Err(SurekError::stack_config("empty"));
        }
        let raw: RawStackConfig = serde_yaml::from_str(content)
            .map_err(|e| SurekError::stack_config(format!("invalid YAML: {e}")))?;

        let mut errors = Vec::new();

        if raw.name.trim().is_empty() {
            errors.push("name: must not be empty".to_string());
        } else if RESERVED_STACK_NAMES.contains(&raw.name.to_lowercase().as_str()) {
            errors.push(format!("name: '{}' is a reserved stack name", raw.name));
        } else if !STACK_NAME_RE.is_match(&raw.name) {
            errors.push(format!(
                "name: '{}' must start with alphanumeric and contain only alphanumeric, underscore, or hyphen characters",
                raw.name
            ));
        }

        let source = match Source::from_raw(raw.source) {
            Ok(s) => Some(s),
            Err(msg) => {
                errors.push(format!("source: {msg}"));
                None
            }
        };

        let mut public = Vec::with_capacity(raw.public.len());
        for (i, ep) in raw.public.into_iter().enumerate() {
            match PublicEndpoint::from_raw(ep) {
                Ok(p) => public.push(p),
                Err(msg) => errors.push(format!("public[{i}]: {msg}")),
            }
        }

        if !errors.is_empty() {
            return Err(SurekError::stack_config(errors.join("\n")));
        }

        Ok(StackConfig {
            name: raw.name,
            source: source.unwrap(),
            compose_file_path: raw.compose_file_path,
            public,
            env: raw.env.map(|e| EnvConfig {
                shared: e.shared,
                by_container: e.by_container,
            }),
            backup: StackBackupConfig {
                exclude_volumes: raw.backup.exclude_volumes,
            },
        })
    }

    pub fn load(path: &Path) -> Result<Self, SurekError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SurekError::stack_config(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }
}

/// Produced by Stack Discovery (spec §4.4).
#[derive(Debug, Clone)]
pub struct StackRecord {
    pub path: PathBuf,
    pub valid: bool,
    pub config: Option<StackConfig>,
    pub error: Option<String>,
}

impl StackRecord {
    /// `config.name` when valid, else the containing folder's name.
    pub fn name(&self) -> String {
        if let Some(cfg) = &self.config {
            return cfg.name.clone();
        }
        self.path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// A stack is deployable iff its config is valid and its compose file
    /// exists under the resolved source (spec §3 invariant 1). The source
    /// directory check happens once the project dir is populated; here we
    /// only check the local-source case where the compose file lives next
    /// to `surek.stack.yml` in the stack's own folder.
    pub fn is_deployable_local(&self) -> bool {
        let Some(cfg) = &self.config else {
            return false;
        };
        if !self.valid {
            return false;
        }
        if cfg.source != Source::Local {
            return true;
        }
        let stack_dir = self.path.parent().unwrap_or(Path::new("."));
        stack_dir.join(&cfg.compose_file_path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> String {
        format!(
            r#"
name: {name}
public:
  - domain: "a.<root>"
    target: "web:8080"
"#
        )
    }

    #[test]
    fn parses_minimal_local_stack() {
        let cfg = StackConfig::parse(&sample("demo")).unwrap();
        assert_eq!(cfg.name, "demo");
        assert_eq!(cfg.source, Source::Local);
        assert_eq!(cfg.public[0].service_name, "web");
        assert_eq!(cfg.public[0].port, 8080);
    }

    #[test]
    fn rejects_reserved_name() {
        let err = StackConfig::parse(&sample("system")).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn rejects_leading_non_alphanumeric_name() {
        let err = StackConfig::parse(&sample("-demo")).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn rejects_empty_name() {
        let err = StackConfig::parse(&sample("")).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn default_target_port_is_80() {
        let yaml = r#"
name: demo
public:
  - domain: "a.<root>"
    target: "web"
"#;
        let cfg = StackConfig::parse(yaml).unwrap();
        assert_eq!(cfg.public[0].port, 80);
    }

    #[test]
    fn remote_source_derives_owner_repo_ref() {
        let yaml = r#"
name: demo
source:
  type: remote
  slug: "acme/widgets#v2"
"#;
        let cfg = StackConfig::parse(yaml).unwrap();
        match cfg.source {
            Source::RemoteArchive {
                owner,
                repo,
                git_ref,
                ..
            } => {
                assert_eq!(owner, "acme");
                assert_eq!(repo, "widgets");
                assert_eq!(git_ref, "v2");
            }
            _ => panic!("expected remote source"),
        }
    }

    #[test]
    fn remote_source_ref_defaults_to_head() {
        let yaml = r#"
name: demo
source:
  type: remote
  slug: "acme/widgets"
"#;
        let cfg = StackConfig::parse(yaml).unwrap();
        match cfg.source {
            Source::RemoteArchive { git_ref, .. } => assert_eq!(git_ref, "HEAD"),
            _ => panic!("expected remote source"),
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        let yaml = r#"
name: demo
bogus: true
"#;
        let err = StackConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid YAML"));
    }
}
