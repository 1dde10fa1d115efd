//! Stack Discovery (spec §4.4).

use crate::config::stack::{StackConfig, StackRecord};
use crate::error::SurekError;
use crate::paths;
use std::path::Path;
use walkdir::WalkDir;

/// Scans `<cwd>/stacks` for `surek.stack.yml` at any depth, sorted by path.
/// Malformed stacks become `{valid: false, error}` records rather than
/// aborting the whole scan.
pub fn discover_stacks(cwd: &Path) -> Result<Vec<StackRecord>, SurekError> {
    let stacks_dir = paths::stacks_dir(cwd);
    if !stacks_dir.is_dir() {
        return Err(SurekError::stacks("stacks directory not found"));
    }

    let mut paths: Vec<_> = WalkDir::new(&stacks_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name() == paths::STACK_CONFIG_FILE)
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        match StackConfig::load(&path) {
            Ok(config) => records.push(StackRecord {
                path,
                valid: true,
                config: Some(config),
                error: None,
            }),
            Err(e) => records.push(StackRecord {
                path,
                valid: false,
                config: None,
                error: Some(e.to_string()),
            }),
        }
    }

    Ok(records)
}

/// Finds a stack by config name among discovered, valid stacks.
pub fn find_stack(cwd: &Path, name: &str) -> Result<StackRecord, SurekError> {
    if name.trim().is_empty() {
        return Err(SurekError::stacks("invalid stack name"));
    }
    discover_stacks(cwd)?
        .into_iter()
        .find(|s| s.valid && s.config.as_ref().map(|c| c.name.as_str()) == Some(name))
        .ok_or_else(|| SurekError::stacks(format!("stack with name '{name}' not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_stack(dir: &Path, subpath: &str, name: &str) {
        let full = dir.join(subpath);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, format!("name: {name}\n")).unwrap();
    }

    #[test]
    fn missing_stacks_dir_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_stacks(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("stacks directory not found"));
    }

    #[test]
    fn discovers_nested_stacks_sorted_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        write_stack(tmp.path(), "stacks/b/surek.stack.yml", "bravo");
        write_stack(tmp.path(), "stacks/a/surek.stack.yml", "alpha");
        let records = discover_stacks(tmp.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].path < records[1].path);
    }

    #[test]
    fn malformed_stack_does_not_abort_scan() {
        let tmp = tempfile::tempdir().unwrap();
        write_stack(tmp.path(), "stacks/good/surek.stack.yml", "good");
        let bad = tmp.path().join("stacks/bad/surek.stack.yml");
        fs::create_dir_all(bad.parent().unwrap()).unwrap();
        fs::write(&bad, "name: system\n").unwrap();

        let records = discover_stacks(tmp.path()).unwrap();
        assert_eq!(records.len(), 2);
        let good = records.iter().find(|r| r.valid).unwrap();
        assert_eq!(good.name(), "good");
        let broken = records.iter().find(|r| !r.valid).unwrap();
        assert!(broken.error.is_some());
        assert_eq!(broken.name(), "bad");
    }

    #[test]
    fn find_stack_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        write_stack(tmp.path(), "stacks/demo/surek.stack.yml", "demo");
        let found = find_stack(tmp.path(), "demo").unwrap();
        assert_eq!(found.name(), "demo");
    }

    #[test]
    fn find_stack_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        write_stack(tmp.path(), "stacks/demo/surek.stack.yml", "demo");
        let err = find_stack(tmp.path(), "missing").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
