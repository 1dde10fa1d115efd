//! Config Loader (spec §4.3) — top-level `TopLevelConfig` and its nested
//! records.

pub mod stack;

use crate::error::SurekError;
use crate::vars::{expand_str_with_env, TemplateVars};
use redact::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTopLevelConfig {
    root_domain: String,
    default_auth: String,
    #[serde(default)]
    backup: Option<RawBackupConfig>,
    #[serde(default)]
    source_auth: Option<RawSourceAuth>,
    #[serde(default)]
    system_services: RawSystemServices,
    #[serde(default)]
    notifications: Option<RawNotificationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackupConfig {
    password: String,
    endpoint: String,
    bucket: String,
    access_key: String,
    secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSourceAuth {
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSystemServices {
    #[serde(default = "default_true")]
    proxy_sidecar_a: bool,
    #[serde(default = "default_true")]
    proxy_sidecar_b: bool,
}

impl Default for RawSystemServices {
    fn default() -> Self {
        Self {
            proxy_sidecar_a: true,
            proxy_sidecar_b: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// (ADDED) Accepted and validated, never dispatched — see spec §1 Non-goals.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawNotificationConfig {
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    telegram_chat_id: Option<String>,
}

/// Top-level configuration (spec §3 `TopLevelConfig`). Immutable after load;
/// lifetime is a single command invocation.
#[derive(Debug, Clone)]
pub struct TopLevelConfig {
    pub root_domain: String,
    pub default_user: String,
    pub default_password: Secret<String>,
    pub backup: Option<BackupConfig>,
    pub source_auth: Option<SourceAuthConfig>,
    pub system_services: SystemServicesConfig,
    pub notifications: Option<NotificationConfig>,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub password: Secret<String>,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct SourceAuthConfig {
    pub token: Secret<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SystemServicesConfig {
    pub proxy_sidecar_a: bool,
    pub proxy_sidecar_b: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub email: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl TopLevelConfig {
    /// Search order: explicit path if supplied, else `cwd/surek.yml`, else
    /// `cwd/surek.yaml`.
    pub fn resolve_path(cwd: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(p.to_path_buf());
        }
        let yml = cwd.join("surek.yml");
        if yml.exists() {
            return Some(yml);
        }
        let yaml = cwd.join("surek.yaml");
        if yaml.exists() {
            return Some(yaml);
        }
        None
    }

    pub fn load(cwd: &Path, explicit: Option<&Path>) -> Result<Self, SurekError> {
        let path = Self::resolve_path(cwd, explicit)
            .ok_or_else(|| SurekError::config("file not found"))?;
        let content = std::fs::read_to_string(&path)
            .map_err(|_| SurekError::config("file not found"))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SurekError> {
        if content.trim().is_empty() {
            return Err(SurekError::config("empty"));
        }

        let raw_value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| SurekError::config(format!("invalid YAML: {e}")))?;

        // Only environment expansion applies here: the angle-bracket template
        // variables this config itself defines (root_domain, default_auth,
        // ...) aren't available until after parsing, so self-referential
        // angle vars in surek.yml are not supported.
        let env: HashMap<String, String> = std::env::vars().collect();
        let expanded = expand_env_only(&raw_value, &env)?;

        let raw: RawTopLevelConfig = serde_yaml::from_value(expanded)
            .map_err(|e| SurekError::config(format!("invalid YAML: {e}")))?;

        let mut errors = Vec::new();

        if raw.root_domain.trim().is_empty() {
            errors.push("root_domain: must not be empty".to_string());
        }

        let (default_user, default_password) = match parse_user_pass(&raw.default_auth) {
            Ok(pair) => pair,
            Err(msg) => {
                errors.push(format!("default_auth: {msg}"));
                (String::new(), String::new())
            }
        };

        let backup = match &raw.backup {
            Some(b) => {
                for (field, value) in [
                    ("backup.password", &b.password),
                    ("backup.endpoint", &b.endpoint),
                    ("backup.bucket", &b.bucket),
                    ("backup.access_key", &b.access_key),
                    ("backup.secret_key", &b.secret_key),
                ] {
                    if value.trim().is_empty() {
                        errors.push(format!("{field}: must not be empty"));
                    }
                }
                Some(BackupConfig {
                    password: Secret::new(b.password.clone()),
                    endpoint: b.endpoint.clone(),
                    bucket: b.bucket.clone(),
                    access_key: b.access_key.clone(),
                    secret_key: Secret::new(b.secret_key.clone()),
                })
            }
            None => None,
        };

        let source_auth = raw.source_auth.as_ref().map(|s| SourceAuthConfig {
            token: Secret::new(s.token.clone()),
        });

        if !errors.is_empty() {
            return Err(SurekError::config(errors.join("\n")));
        }

        Ok(TopLevelConfig {
            root_domain: raw.root_domain,
            default_user,
            default_password: Secret::new(default_password),
            backup,
            source_auth,
            system_services: SystemServicesConfig {
                proxy_sidecar_a: raw.system_services.proxy_sidecar_a,
                proxy_sidecar_b: raw.system_services.proxy_sidecar_b,
            },
            notifications: raw.notifications.map(|n| NotificationConfig {
                webhook_url: n.webhook_url,
                email: n.email,
                telegram_chat_id: n.telegram_chat_id,
            }),
        })
    }

    /// Template variables this config makes available to the Variable
    /// Expander (spec §4.2).
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars {
            root_domain: Some(self.root_domain.clone()),
            default_user: Some(self.default_user.clone()),
            default_password: Some(self.default_password.expose_secret().clone()),
            backup_password: self
                .backup
                .as_ref()
                .map(|b| b.password.expose_secret().clone()),
            backup_s3_endpoint: self.backup.as_ref().map(|b| b.endpoint.clone()),
            backup_s3_bucket: self.backup.as_ref().map(|b| b.bucket.clone()),
            backup_s3_access_key: self.backup.as_ref().map(|b| b.access_key.clone()),
            backup_s3_secret_key: self
                .backup
                .as_ref()
                .map(|b| b.secret_key.expose_secret().clone()),
        }
    }
}

/// Parses `"user:pass"`: exactly one colon, non-empty user and password.
pub fn parse_user_pass(raw: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 2 {
        return Err("must be exactly one 'user:pass' pair".to_string());
    }
    let (user, pass) = (parts[0], parts[1]);
    if user.is_empty() {
        return Err("user must not be empty".to_string());
    }
    if pass.is_empty() {
        return Err("password must not be empty".to_string());
    }
    Ok((user.to_string(), pass.to_string()))
}

fn expand_env_only(
    value: &serde_yaml::Value,
    env: &HashMap<String, String>,
) -> Result<serde_yaml::Value, SurekError> {
    use serde_yaml::Value;
    match value {
        Value::String(s) => Ok(Value::String(expand_str_with_env(
            s,
            &TemplateVars::default(),
            env,
        )?)),
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                out.push(expand_env_only(item, env)?);
            }
            Ok(Value::Sequence(out))
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(expand_env_only(k, env)?, expand_env_only(v, env)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: admin:s3cret
"#,
        )
        .unwrap();
        assert_eq!(cfg.root_domain, "example.com");
        assert_eq!(cfg.default_user, "admin");
        assert!(cfg.system_services.proxy_sidecar_a);
        assert!(cfg.system_services.proxy_sidecar_b);
    }

    #[test]
    fn rejects_empty_document() {
        let err = TopLevelConfig::parse("").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let err = TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: admin:s3cret
bogus: 1
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid YAML"));
    }

    #[test]
    fn default_auth_missing_colon_rejected() {
        let err = TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: adminonly
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("default_auth"));
    }

    #[test]
    fn default_auth_multi_colon_rejected() {
        let err = TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: admin:s3:cret
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("default_auth"));
    }

    #[test]
    fn default_auth_empty_password_rejected() {
        let err = TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: "admin:"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("default_auth"));
    }

    #[test]
    fn system_services_disabled_sidecar() {
        let cfg = TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: admin:s3cret
system_services:
  proxy_sidecar_a: false
"#,
        )
        .unwrap();
        assert!(!cfg.system_services.proxy_sidecar_a);
        assert!(cfg.system_services.proxy_sidecar_b);
    }

    #[test]
    fn notifications_accepted_but_inert() {
        let cfg = TopLevelConfig::parse(
            r#"
root_domain: example.com
default_auth: admin:s3cret
notifications:
  webhook_url: https://hooks.example.com/x
"#,
        )
        .unwrap();
        assert_eq!(
            cfg.notifications.unwrap().webhook_url.as_deref(),
            Some("https://hooks.example.com/x")
        );
    }
}
