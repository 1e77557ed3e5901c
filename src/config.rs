//! Configuration for k8helper.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (K8HELPER_HOME, K8HELPER_PLANNER_ENDPOINT, ...)
//! 2. Config file (.k8helper/config.yaml)
//! 3. Defaults (~/.k8helper)
//!
//! Config file discovery:
//! - Searches current directory and parents for .k8helper/config.yaml
//! - Paths in config file are relative to the .k8helper/ directory
//!
//! Policy overrides saved by `k8helper policy set` live in
//! `$K8HELPER_HOME/policy.yaml` and are merged over the file's `policy`
//! section.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;
use crate::core::safety::PolicyOverrides;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_PLANNER_ENDPOINT: &str = "https://api.hunyuan.cloud.tencent.com/v1";
pub const DEFAULT_MODEL: &str = "hunyuan-turbos-latest";
pub const DEFAULT_API_KEY_ENV: &str = "K8HELPER_API_KEY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub policy: PolicyOverrides,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .k8helper/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorConfig {
    pub shell: Option<String>,
    pub pipefail: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub grace_period_ms: Option<u64>,
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub stop_on_first_failure: Option<bool>,
    pub task_retention_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlannerConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Custom policy additions (config file merged with saved overrides)
    pub policy: PolicyOverrides,
    pub executor: ExecutorSettings,
    pub engine: EngineSettings,
    pub planner: PlannerSettings,
}

impl ResolvedConfig {
    /// Where `policy set` persists overrides
    pub fn policy_path(&self) -> PathBuf {
        self.home.join("policy.yaml")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorSettings {
    pub shell: String,
    pub pipefail: bool,
    pub timeout_seconds: u64,
    pub grace_period_ms: u64,
    pub kubeconfig: Option<PathBuf>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            pipefail: true,
            timeout_seconds: 30,
            grace_period_ms: 3000,
            kubeconfig: None,
        }
    }
}

impl ExecutorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub stop_on_first_failure: bool,
    pub task_retention_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_retries: retry.max_retries,
            initial_delay_ms: retry.initial_delay_ms,
            max_delay_ms: retry.max_delay_ms,
            backoff_multiplier: retry.backoff_multiplier,
            stop_on_first_failure: true,
            task_retention_seconds: 3600,
        }
    }
}

impl EngineSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannerSettings {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_seconds: u64,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PLANNER_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_seconds: 60,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".k8helper").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Read saved policy overrides; a missing file means no overrides
pub fn load_policy_overrides(path: &Path) -> Result<PolicyOverrides> {
    if !path.exists() {
        return Ok(PolicyOverrides::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(PolicyOverrides::default());
    }
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse policy file: {}", path.display()))
}

/// Persist policy overrides, creating the state directory if needed
pub fn save_policy_overrides(path: &Path, overrides: &PolicyOverrides) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(overrides).context("Failed to serialize policy overrides")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write policy file: {}", path.display()))
}

/// Combine a config file, environment lookups and defaults
fn resolve<E>(file: Option<(&Path, ConfigFile)>, env: E, default_home: PathBuf) -> Result<ResolvedConfig>
where
    E: Fn(&str) -> Option<String>,
{
    let config_file = file.as_ref().map(|(path, _)| path.to_path_buf());
    // Relative paths resolve against the .k8helper/ directory
    let config_dir = file
        .as_ref()
        .and_then(|(path, _)| path.parent())
        .map(Path::to_path_buf);
    let config = file.map(|(_, config)| config).unwrap_or_default();
    let base = config_dir.unwrap_or_else(|| PathBuf::from("."));

    let home = match (env("K8HELPER_HOME"), &config.paths.home) {
        (Some(env_home), _) => PathBuf::from(env_home),
        (None, Some(home)) => resolve_path(&base, home),
        (None, None) => default_home,
    };

    let executor_defaults = ExecutorSettings::default();
    let kubeconfig = env("KUBECONFIG")
        .filter(|k| !k.is_empty())
        .map(PathBuf::from)
        .or_else(|| config.executor.kubeconfig.as_deref().map(|k| resolve_path(&base, k)));
    let executor = ExecutorSettings {
        shell: config.executor.shell.unwrap_or(executor_defaults.shell),
        pipefail: config.executor.pipefail.unwrap_or(executor_defaults.pipefail),
        timeout_seconds: config
            .executor
            .timeout_seconds
            .unwrap_or(executor_defaults.timeout_seconds),
        grace_period_ms: config
            .executor
            .grace_period_ms
            .unwrap_or(executor_defaults.grace_period_ms),
        kubeconfig,
    };

    let engine_defaults = EngineSettings::default();
    let engine = EngineSettings {
        max_retries: config.engine.max_retries.unwrap_or(engine_defaults.max_retries),
        initial_delay_ms: config
            .engine
            .initial_delay_ms
            .unwrap_or(engine_defaults.initial_delay_ms),
        max_delay_ms: config.engine.max_delay_ms.unwrap_or(engine_defaults.max_delay_ms),
        backoff_multiplier: config
            .engine
            .backoff_multiplier
            .unwrap_or(engine_defaults.backoff_multiplier),
        stop_on_first_failure: config
            .engine
            .stop_on_first_failure
            .unwrap_or(engine_defaults.stop_on_first_failure),
        task_retention_seconds: config
            .engine
            .task_retention_seconds
            .unwrap_or(engine_defaults.task_retention_seconds),
    };

    let planner_defaults = PlannerSettings::default();
    let planner = PlannerSettings {
        endpoint: env("K8HELPER_PLANNER_ENDPOINT")
            .or(config.planner.endpoint)
            .unwrap_or(planner_defaults.endpoint),
        model: env("K8HELPER_MODEL")
            .or(config.planner.model)
            .unwrap_or(planner_defaults.model),
        api_key_env: config.planner.api_key_env.unwrap_or(planner_defaults.api_key_env),
        timeout_seconds: config
            .planner
            .timeout_seconds
            .unwrap_or(planner_defaults.timeout_seconds),
    };

    let saved = load_policy_overrides(&home.join("policy.yaml"))?;
    let policy = config.policy.merged_with(&saved);

    Ok(ResolvedConfig {
        home,
        config_file,
        policy,
        executor,
        engine,
        planner,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".k8helper");

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(
        file.as_ref().map(|(path, config)| (path.as_path(), config.clone())),
        |key| std::env::var(key).ok(),
        default_home,
    )
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (bypasses the cache)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
