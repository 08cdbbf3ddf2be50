use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use flowforge_core::InferencePolicy;
use flowforge_llm::{BuildMode, BuildOptions, Complexity, LlmConfig, MalformedNodePolicy};
use flowforge_store::StoreConfig;
use serde::Deserialize;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "flowforge.toml";

// ── File layout ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub llm: LlmSection,
    pub store: StoreSection,
    pub build: BuildSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub enhancement_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    pub mode: Option<BuildMode>,
    pub complexity: Option<Complexity>,
    pub enhance: Option<bool>,
    pub auto_repair: Option<bool>,
    pub relayout: Option<bool>,
    pub repair_attempts: Option<usize>,
    /// Report orphans instead of attaching them.
    pub strict: Option<bool>,
    pub allow_sink_chaining: Option<bool>,
    pub malformed_nodes: Option<MalformedNodePolicy>,
    /// Response cache lifetime; 0 disables the cache.
    pub cache_ttl_secs: Option<u64>,
}

// ── Resolved settings ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub build: BuildOptions,
    pub cache_ttl: Option<Duration>,
}

/// Load the config file (explicit path, or `flowforge.toml` if present) and
/// overlay the process environment.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(path) => read_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            read_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => FileConfig::default(),
    };
    Ok(resolve(file, |key| std::env::var(key).ok()))
}

pub fn read_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml_edit::de::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Defaults, then the file, then environment variables. Empty environment
/// values count as unset.
pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Settings {
    let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    let mut llm = LlmConfig::default();
    let section = file.llm;
    if let Some(endpoint) = section.endpoint {
        llm.base_url = endpoint
            .trim_end_matches('/')
            .trim_end_matches("/chat/completions")
            .to_string();
    }
    llm.api_key = section.api_key.or(llm.api_key);
    if let Some(model) = section.model {
        llm.model = model;
    }
    if section.enhancement_model.is_some() {
        llm.enhancement_model = section.enhancement_model;
    }
    llm.temperature = section.temperature.or(llm.temperature);
    llm.max_tokens = section.max_tokens.or(llm.max_tokens);
    if let Some(secs) = section.timeout_secs {
        llm.request_timeout = Duration::from_secs(secs);
    }
    if let Some(key) = env("XAI_API_KEY") {
        llm.api_key = Some(key);
    }
    if let Some(url) = env("FLOWFORGE_LLM_URL") {
        llm.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(model) = env("FLOWFORGE_MODEL") {
        llm.model = model;
    }

    let mut store = StoreConfig::default();
    let section = file.store;
    if let Some(url) = section.api_url {
        store.api_url = url;
    }
    store.api_key = section.api_key;
    store.user = section.user;
    store.password = section.password;
    if let Some(secs) = section.timeout_secs {
        store.timeout = Duration::from_secs(secs);
    }
    if let Some(url) = env("N8N_API_URL") {
        store.api_url = url;
    }
    if let Some(key) = env("N8N_API_KEY") {
        store.api_key = Some(key);
    }
    if let Some(user) = env("N8N_AUTH_USER") {
        store.user = Some(user);
    }
    if let Some(password) = env("N8N_AUTH_PASSWORD") {
        store.password = Some(password);
    }

    let section = file.build;
    let defaults = BuildOptions::default();
    let inference = InferencePolicy {
        allow_sink_chaining: section
            .allow_sink_chaining
            .unwrap_or(defaults.inference.allow_sink_chaining),
        sweep_orphans: !section.strict.unwrap_or(!defaults.inference.sweep_orphans),
    };
    let build = BuildOptions {
        mode: section.mode.unwrap_or(defaults.mode),
        inference,
        malformed_nodes: section.malformed_nodes.unwrap_or(defaults.malformed_nodes),
        enhance: section.enhance.unwrap_or(defaults.enhance),
        auto_repair: section.auto_repair.unwrap_or(defaults.auto_repair),
        relayout: section.relayout.unwrap_or(defaults.relayout),
        repair_attempts: section.repair_attempts.unwrap_or(defaults.repair_attempts),
        complexity: section.complexity.unwrap_or(defaults.complexity),
        oracle_timeout: defaults.oracle_timeout,
    };

    let cache_ttl = match section.cache_ttl_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(flowforge_llm::cache::DEFAULT_TTL),
    };

    Settings {
        llm,
        store,
        build,
        cache_ttl,
    }
}
