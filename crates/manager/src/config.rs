//! On-disk configuration. Parsing the full syzkaller-style options language is
//! out of scope (spec §1); this is a flat JSON record with the fields the
//! Manager actually consumes.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub workdir: PathBuf,
    pub rpc: String,
    #[serde(rename = "type")]
    pub vm_type: String,
    pub count: u32,
    pub procs: u32,
    #[serde(default)]
    pub leak: bool,
    #[serde(default = "default_true")]
    pub cover: bool,
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
    #[serde(default)]
    pub debug: bool,
    pub syzkaller: PathBuf,
    #[serde(default = "default_output")]
    pub output: String,
    /// The full set of syscall names the target exposes. The syscall
    /// description language itself is an external collaborator.
    pub syscalls: Vec<String>,
    pub enabled_syscalls: Vec<String>,
    #[serde(default)]
    pub suppressions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_sandbox() -> String {
    "none".to_string()
}

fn default_output() -> String {
    "stdout".to_string()
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {path:?}: {e}"))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("malformed config {path:?}: {e}"))?;
        Ok(config)
    }

    #[must_use]
    pub fn corpus_dir(&self) -> PathBuf {
        self.workdir.join("corpus")
    }

    #[must_use]
    pub fn crashes_dir(&self) -> PathBuf {
        self.workdir.join("crashes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let json = r#"{
            "workdir": "/tmp/work",
            "rpc": "0.0.0.0:0",
            "type": "local",
            "count": 2,
            "procs": 4,
            "syzkaller": "/tmp/bin",
            "syscalls": ["read", "write"],
            "enabled_syscalls": ["read"]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.count, 2);
        assert!(config.cover);
        assert!(!config.leak);
        assert_eq!(config.sandbox, "none");
        assert_eq!(config.output, "stdout");
        assert!(config.suppressions.is_empty());
    }
}
