//! Bot configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use romforge_core::artifact::CompressionPolicy;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete bot configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Settings {
    pub bot: BotSettings,
    pub workspace: WorkspaceSettings,
    pub sources: SourceSettings,
    pub fetch: FetchSettings,
    pub toolchain: ToolchainSettings,
    pub logs: LogSettings,
    pub notify: NotifySettings,
    pub artifacts: CompressionPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotSettings {
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub api_base: String,
    /// Identities allowed to reorder and clear the queue.
    pub admins: Vec<i64>,
    pub poll_timeout: Duration,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.telegram.org".to_string(),
            admins: Vec::new(),
            poll_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkspaceSettings {
    /// Root of the shared source tree; required to run builds.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSettings {
    pub allowed_prefixes: Vec<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec!["https://github.com/".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSettings {
    pub program: String,
    pub depth: u32,
    pub timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            depth: 1,
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolchainSettings {
    pub shell: String,
    /// Script sourced before selecting the build environment.
    pub setup_script: String,
    /// Command that selects the build environment by identifier.
    pub select_command: String,
    /// Command that builds one or more goals.
    pub build_command: String,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            setup_script: "build/envsetup.sh".to_string(),
            select_command: "breakfast".to_string(),
            build_command: "mka".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSettings {
    /// Lines kept for the running job.
    pub capacity: usize,
    /// Lines included in each periodic flush.
    pub tail_lines: usize,
    /// Lines returned by the on-demand query.
    pub query_lines: usize,
    pub flush_interval: Duration,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            capacity: 100,
            tail_lines: 5,
            query_lines: 10,
            flush_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifySettings {
    /// Consecutive rate-limit retries before a message is dropped.
    pub max_rate_limit_retries: u32,
    /// Added to the server-supplied wait before retrying.
    pub backoff_margin: Duration,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 3,
            backoff_margin: Duration::from_secs(2),
        }
    }
}

impl Settings {
    /// The workspace root, which has no default.
    pub fn workspace_root(&self) -> ConfigResult<&Path> {
        self.workspace
            .root
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("workspace root".to_string()))
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.sources.allowed_prefixes.is_empty() {
            return Err(invalid("sources", "at least one allowed prefix is required"));
        }
        if self.fetch.depth == 0 {
            return Err(invalid("fetch depth", "must be at least 1"));
        }
        if self.fetch.timeout.is_zero() {
            return Err(invalid("fetch timeout-secs", "must be at least 1"));
        }
        if self.logs.capacity == 0 {
            return Err(invalid("logs capacity", "must be at least 1"));
        }
        if self.logs.tail_lines == 0 || self.logs.tail_lines > self.logs.capacity {
            return Err(invalid("logs tail", "must be between 1 and capacity"));
        }
        if self.logs.query_lines == 0 || self.logs.query_lines > self.logs.capacity {
            return Err(invalid("logs query", "must be between 1 and capacity"));
        }
        if self.logs.flush_interval.is_zero() {
            return Err(invalid("logs flush-interval-secs", "must be at least 1"));
        }
        Ok(())
    }
}

/// Read and parse a configuration file.
pub fn load_settings(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_settings(&content)
}

/// Parse a configuration from KDL text.
pub fn parse_settings(kdl: &str) -> ConfigResult<Settings> {
    let doc: KdlDocument = kdl.parse()?;
    let mut settings = Settings::default();

    for node in doc.nodes() {
        match node.name().value() {
            "bot" => parse_bot(node, &mut settings.bot)?,
            "workspace" => {
                let root = get_string_prop(node, "root")
                    .or_else(|| get_first_string_arg(node))
                    .ok_or_else(|| ConfigError::MissingField("workspace root".to_string()))?;
                settings.workspace.root = Some(PathBuf::from(root));
            }
            "sources" => {
                let mut prefixes = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() == "allow" {
                            prefixes.extend(get_all_string_args(child));
                        }
                    }
                }
                settings.sources.allowed_prefixes = prefixes;
            }
            "fetch" => {
                if let Some(program) = get_string_prop(node, "program") {
                    settings.fetch.program = program;
                }
                if let Some(depth) = get_u64_prop(node, "depth")? {
                    settings.fetch.depth = u32::try_from(depth)
                        .map_err(|_| invalid("fetch depth", "too large"))?;
                }
                if let Some(secs) = get_u64_prop(node, "timeout-secs")? {
                    settings.fetch.timeout = Duration::from_secs(secs);
                }
            }
            "toolchain" => {
                let toolchain = &mut settings.toolchain;
                if let Some(shell) = get_string_prop(node, "shell") {
                    toolchain.shell = shell;
                }
                if let Some(setup) = get_string_prop(node, "setup") {
                    toolchain.setup_script = setup;
                }
                if let Some(select) = get_string_prop(node, "select") {
                    toolchain.select_command = select;
                }
                if let Some(build) = get_string_prop(node, "build") {
                    toolchain.build_command = build;
                }
            }
            "logs" => {
                let logs = &mut settings.logs;
                if let Some(capacity) = get_usize_prop(node, "capacity")? {
                    logs.capacity = capacity;
                }
                if let Some(tail) = get_usize_prop(node, "tail")? {
                    logs.tail_lines = tail;
                }
                if let Some(query) = get_usize_prop(node, "query")? {
                    logs.query_lines = query;
                }
                if let Some(secs) = get_u64_prop(node, "flush-interval-secs")? {
                    logs.flush_interval = Duration::from_secs(secs);
                }
            }
            "notify" => {
                if let Some(retries) = get_u64_prop(node, "max-retries")? {
                    settings.notify.max_rate_limit_retries = u32::try_from(retries)
                        .map_err(|_| invalid("notify max-retries", "too large"))?;
                }
                if let Some(secs) = get_u64_prop(node, "backoff-margin-secs")? {
                    settings.notify.backoff_margin = Duration::from_secs(secs);
                }
            }
            "artifacts" => {
                if let Some(mib) = get_u64_prop(node, "compress-above-mib")? {
                    settings.artifacts.compress_above_bytes = mib
                        .checked_mul(1024 * 1024)
                        .ok_or_else(|| invalid("artifacts compress-above-mib", "too large"))?;
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    settings.validate()?;
    Ok(settings)
}

fn parse_bot(node: &KdlNode, bot: &mut BotSettings) -> ConfigResult<()> {
    if let Some(api_base) = get_string_prop(node, "api-base") {
        bot.api_base = api_base.trim_end_matches('/').to_string();
    }
    if let Some(secs) = get_u64_prop(node, "poll-timeout-secs")? {
        bot.poll_timeout = Duration::from_secs(secs);
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "token" => {
                    bot.token = get_first_string_arg(child);
                }
                "admins" => {
                    for entry in child.entries().iter().filter(|e| e.name().is_none()) {
                        let id = entry
                            .value()
                            .as_integer()
                            .and_then(|v| i64::try_from(v).ok())
                            .ok_or_else(|| invalid("bot admins", "expected integer identities"))?;
                        bot.admins.push(id);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    value
        .as_integer()
        .and_then(|v| u64::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: format!("{} {}", node.name().value(), name),
            message: "expected a non-negative integer".to_string(),
        })
}

fn get_usize_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<usize>> {
    match get_u64_prop(node, name)? {
        Some(v) => usize::try_from(v).map(Some).map_err(|_| ConfigError::InvalidValue {
            field: format!("{} {}", node.name().value(), name),
            message: "too large".to_string(),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_reference_defaults() {
        let settings = parse_settings("").unwrap();
        assert_eq!(settings.logs.capacity, 100);
        assert_eq!(settings.logs.tail_lines, 5);
        assert_eq!(settings.logs.query_lines, 10);
        assert_eq!(settings.logs.flush_interval, Duration::from_secs(15));
        assert_eq!(settings.fetch.timeout, Duration::from_secs(300));
        assert_eq!(settings.notify.max_rate_limit_retries, 3);
        assert_eq!(settings.notify.backoff_margin, Duration::from_secs(2));
        assert_eq!(settings.artifacts.compress_above_bytes, 48 * 1024 * 1024);
        assert_eq!(settings.sources.allowed_prefixes, vec!["https://github.com/"]);
        assert!(settings.workspace_root().is_err());
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            bot api-base="https://tg.example.org/" poll-timeout-secs=10 {
                token "123:abc"
                admins 123456789 42
            }
            workspace root="/srv/android"
            sources {
                allow "https://github.com/"
                allow "https://gitlab.com/"
            }
            fetch program="/usr/bin/git" depth=2 timeout-secs=60
            toolchain shell="/bin/sh" setup="env.sh" select="lunch" build="make"
            logs capacity=50 tail=3 query=8 flush-interval-secs=5
            notify max-retries=5 backoff-margin-secs=1
            artifacts compress-above-mib=10
        "#;

        let settings = parse_settings(kdl).unwrap();
        assert_eq!(settings.bot.token.as_deref(), Some("123:abc"));
        assert_eq!(settings.bot.api_base, "https://tg.example.org");
        assert_eq!(settings.bot.admins, vec![123456789, 42]);
        assert_eq!(settings.bot.poll_timeout, Duration::from_secs(10));
        assert_eq!(settings.workspace_root().unwrap(), Path::new("/srv/android"));
        assert_eq!(settings.sources.allowed_prefixes.len(), 2);
        assert_eq!(settings.fetch.program, "/usr/bin/git");
        assert_eq!(settings.fetch.depth, 2);
        assert_eq!(settings.fetch.timeout, Duration::from_secs(60));
        assert_eq!(settings.toolchain.select_command, "lunch");
        assert_eq!(settings.toolchain.build_command, "make");
        assert_eq!(settings.logs.capacity, 50);
        assert_eq!(settings.logs.tail_lines, 3);
        assert_eq!(settings.logs.query_lines, 8);
        assert_eq!(settings.notify.max_rate_limit_retries, 5);
        assert_eq!(settings.artifacts.compress_above_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_negative_numbers() {
        let result = parse_settings("logs capacity=-1");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_rejects_tail_larger_than_capacity() {
        let result = parse_settings("logs capacity=4 tail=5");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_rejects_empty_source_list() {
        let result = parse_settings("sources {\n}");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_token_is_not_serialized() {
        let settings = parse_settings("bot {\n token \"secret\"\n}").unwrap();
        assert_eq!(settings.bot.token.as_deref(), Some("secret"));

        let rendered = serde_json::to_string(&settings).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("api.telegram.org"));
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("romforge.kdl");
        std::fs::write(&path, "workspace root=\"/tmp/android\"\n").unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.workspace_root().unwrap(), Path::new("/tmp/android"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_settings("/nonexistent/romforge.kdl");
        match result.unwrap_err() {
            ConfigError::Read { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/romforge.kdl"))
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
