//! Variable Expander (spec §4.2).
//!
//! Two substitution layers applied in order:
//!   1. angle-bracket template variables, sourced from `TopLevelConfig`
//!   2. shell-style `${NAME}` / `${NAME:-default}`, sourced from the process
//!      environment
//!
//! Both layers are single-pass: the output of a substitution is never
//! re-scanned for further variables. This keeps expansion deterministic at
//! the cost of not supporting variables-that-expand-to-variables.

use crate::error::SurekError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use std::collections::HashMap;

/// The subset of `TopLevelConfig` needed to resolve angle-bracket templates.
/// Kept separate from `TopLevelConfig` so callers (config loading itself)
/// can expand before the full typed record exists.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub root_domain: Option<String>,
    pub default_user: Option<String>,
    pub default_password: Option<String>,
    pub backup_password: Option<String>,
    pub backup_s3_endpoint: Option<String>,
    pub backup_s3_bucket: Option<String>,
    pub backup_s3_access_key: Option<String>,
    pub backup_s3_secret_key: Option<String>,
}

impl TemplateVars {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "root" => self.root_domain.clone(),
            "default_user" => self.default_user.clone(),
            "default_password" => self.default_password.clone(),
            "default_auth" => match (&self.default_user, &self.default_password) {
                (Some(u), Some(p)) => Some(format!("{u}:{p}")),
                _ => None,
            },
            "backup_password" => self.backup_password.clone(),
            "backup_s3_endpoint" => self.backup_s3_endpoint.clone(),
            "backup_s3_bucket" => self.backup_s3_bucket.clone(),
            "backup_s3_access_key" => self.backup_s3_access_key.clone(),
            "backup_s3_secret_key" => self.backup_s3_secret_key.clone(),
            _ => None,
        }
    }
}

static ANGLE_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_]*)>").unwrap());
static SHELL_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap());

/// Expand a single string leaf through both layers, in order.
pub fn expand_str(input: &str, templates: &TemplateVars) -> Result<String, SurekError> {
    let after_templates = expand_angle_vars(input, templates);
    expand_shell_vars(&after_templates)
}

fn expand_angle_vars(input: &str, templates: &TemplateVars) -> String {
    ANGLE_VAR
        .replace_all(input, |caps: &regex::Captures| {
            let name = &caps[1];
            match templates.lookup(name) {
                Some(value) => value,
                // Unknown angle-bracket variable or not configured (e.g. backup_*
                // with no backup section): leave the literal intact.
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn expand_shell_vars(input: &str) -> Result<String, SurekError> {
    let mut err: Option<SurekError> = None;
    let result = SHELL_VAR.replace_all(input, |caps: &regex::Captures| {
        if err.is_some() {
            return String::new();
        }
        let name = &caps[1];
        let has_default = caps.get(2).is_some();
        let default = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        match std::env::var(name) {
            Ok(v) => v,
            Err(_) if has_default => default.to_string(),
            Err(_) => {
                err = Some(SurekError::config(format!(
                    "environment variable '{name}' is not set"
                )));
                String::new()
            }
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(result.into_owned()),
    }
}

/// Recursively expand every string leaf of a `serde_yaml::Value` tree.
/// Non-string leaves (numbers, bools, null) pass through unchanged.
pub fn expand_value(value: &Value, templates: &TemplateVars) -> Result<Value, SurekError> {
    match value {
        Value::String(s) => Ok(Value::String(expand_str(s, templates)?)),
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                out.push(expand_value(item, templates)?);
            }
            Ok(Value::Sequence(out))
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                let new_key = expand_value(k, templates)?;
                let new_value = expand_value(v, templates)?;
                out.insert(new_key, new_value);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

/// Expand using a plain environment-variable map rather than the process
/// environment — used by the Config Loader so tests can supply a
/// deterministic map instead of mutating `std::env`.
pub fn expand_str_with_env(
    input: &str,
    templates: &TemplateVars,
    env: &HashMap<String, String>,
) -> Result<String, SurekError> {
    let after_templates = expand_angle_vars(input, templates);
    let mut err: Option<SurekError> = None;
    let result = SHELL_VAR.replace_all(&after_templates, |caps: &regex::Captures| {
        if err.is_some() {
            return String::new();
        }
        let name = &caps[1];
        let has_default = caps.get(2).is_some();
        let default = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        match env.get(name) {
            Some(v) => v.clone(),
            None if has_default => default.to_string(),
            None => {
                err = Some(SurekError::config(format!(
                    "environment variable '{name}' is not set"
                )));
                String::new()
            }
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(result.into_owned()),
    }
}
