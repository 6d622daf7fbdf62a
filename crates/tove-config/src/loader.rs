// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/tove/config.yaml"));
    paths.push(PathBuf::from("/etc/tove/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/tove/config.yaml"));
        paths.push(home.join(".config/tove/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("tove/config.yaml"));
        paths.push(cfg.join("tove/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".tove/config.yaml"));
    paths.push(PathBuf::from(".tove/config.yml"));
    paths.push(PathBuf::from(".tove.yaml"));
    paths.push(PathBuf::from(".tove.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("deserializing merged configuration")?
    };
    config.agent.validate()?;
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (d, s) => *d = s,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_files_yield_defaults() {
        // No explicit path and (almost certainly) no /etc/tove on a test box.
        let cfg = load(None).unwrap();
        assert_eq!(cfg.agent.max_todo_continuations, 10);
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "agent:\n  max_todo_continuations: 3\n  auto_continue_todos: true"
        )
        .unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.agent.max_todo_continuations, 3);
        assert!(cfg.agent.auto_continue_todos);
        // untouched fields keep defaults
        assert_eq!(cfg.agent.provider_retries, 5);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "agent:\n  max_todo_continuations: 0").unwrap();
        assert!(load(Some(f.path())).is_err());
    }

    #[test]
    fn merge_scalar_override() {
        let mut dst: serde_yaml::Value = serde_yaml::from_str("a: 1\nb: 2").unwrap();
        let src: serde_yaml::Value = serde_yaml::from_str("b: 3").unwrap();
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"], serde_yaml::Value::from(1));
        assert_eq!(dst["b"], serde_yaml::Value::from(3));
    }

    #[test]
    fn merge_nested_mapping() {
        let mut dst: serde_yaml::Value =
            serde_yaml::from_str("agent:\n  provider_retries: 5").unwrap();
        let src: serde_yaml::Value =
            serde_yaml::from_str("agent:\n  auto_continue_todos: true").unwrap();
        merge_yaml(&mut dst, src);
        assert_eq!(dst["agent"]["provider_retries"], serde_yaml::Value::from(5));
        assert_eq!(
            dst["agent"]["auto_continue_todos"],
            serde_yaml::Value::from(true)
        );
    }
}
