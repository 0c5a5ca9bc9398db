//! Config schema, TOML discovery and `${ENV_VAR}` substitution.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    pesan_reply::TenantReplyConfig,
    secrecy::Secret,
    serde::Deserialize,
    tracing::{debug, warn},
};

const CONFIG_FILENAME: &str = "pesan.toml";

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PesanConfig {
    pub data: DataConfig,
    pub transport: TransportConfig,
    pub ai: AiConfig,
    pub stats: StatsConfig,
    pub dedup: DedupConfig,
    /// Tenants known ahead of pairing; keyed by tenant id.
    pub tenants: HashMap<String, TenantConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Where the database and stats cache live. Defaults to the platform
    /// data directory.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket root of the wire-protocol sidecar.
    pub sidecar_url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            sidecar_url: "ws://127.0.0.1:3012".into(),
        }
    }
}

/// OpenAI-compatible generation endpoint. AI replies stay off for every
/// tenant until a key is configured here and the tenant opts in.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<Secret<String>>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub flush_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub sweep_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Received messages get forwarded here as JSON.
    pub webhook_url: Option<String>,
    pub ai_enabled: bool,
    pub system_prompt: Option<String>,
    pub product_context: Option<String>,
    pub complaint_keywords: Vec<String>,
}

impl TenantConfig {
    /// Arbitration settings for this tenant, defaults filling the gaps.
    pub fn reply_config(&self) -> TenantReplyConfig {
        let defaults = TenantReplyConfig::default();
        TenantReplyConfig {
            ai_enabled: self.ai_enabled,
            system_prompt: self.system_prompt.clone().unwrap_or(defaults.system_prompt),
            product_context: self
                .product_context
                .clone()
                .unwrap_or(defaults.product_context),
            complaint_keywords: if self.complaint_keywords.is_empty() {
                defaults.complaint_keywords
            } else {
                self.complaint_keywords.clone()
            },
        }
    }
}

/// Load config from an explicit path.
pub fn load_config(path: &Path) -> anyhow::Result<PesanConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    Ok(toml::from_str(&raw)?)
}

/// Discover and load config from standard locations.
///
/// Search order: `./pesan.toml`, then the platform config directory.
/// Returns defaults when no file is found or the file fails to parse.
pub fn discover_and_load() -> PesanConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    PesanConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "pesan") {
        let global = dirs.config_dir().join(CONFIG_FILENAME);
        if global.exists() {
            return Some(global);
        }
    }
    None
}

/// The platform data directory for the gateway.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "pesan")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Replace `${ENV_VAR}` placeholders in config text. Unresolvable or
/// malformed placeholders pass through unchanged.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                result.push_str("${");
                rest = after;
            },
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn empty_config_gets_defaults() {
        let cfg: PesanConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.transport.sidecar_url, "ws://127.0.0.1:3012");
        assert_eq!(cfg.stats.flush_interval_secs, 60);
        assert!(cfg.ai.api_key.is_none());
        assert!(cfg.tenants.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let cfg: PesanConfig = toml::from_str(
            r#"
            [data]
            dir = "/var/lib/pesan"

            [transport]
            sidecar_url = "ws://10.0.0.5:4000"

            [ai]
            model = "llama-3.1-8b"
            api_key = "sk-test"

            [tenants.shop-1]
            webhook_url = "https://erp.example.com/hook"
            ai_enabled = true
            system_prompt = "Jawab singkat."
            complaint_keywords = ["komplain", "rusak"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.data.dir.as_deref(), Some(Path::new("/var/lib/pesan")));
        assert_eq!(cfg.transport.sidecar_url, "ws://10.0.0.5:4000");
        assert_eq!(cfg.ai.model, "llama-3.1-8b");
        assert_eq!(cfg.ai.api_key.unwrap().expose_secret(), "sk-test");

        let tenant = &cfg.tenants["shop-1"];
        let reply = tenant.reply_config();
        assert!(reply.ai_enabled);
        assert_eq!(reply.system_prompt, "Jawab singkat.");
        assert_eq!(reply.complaint_keywords, vec!["komplain", "rusak"]);
        // Unset fields fall back to the built-in defaults.
        assert_eq!(reply.product_context, "");
    }

    #[test]
    fn env_placeholders_are_substituted() {
        let out = substitute_env_with("key = \"${API_KEY}\" url = \"${MISSING}\"", |name| {
            (name == "API_KEY").then(|| "sk-live".to_string())
        });
        assert_eq!(out, "key = \"sk-live\" url = \"${MISSING}\"");
    }

    #[test]
    fn malformed_placeholder_passes_through() {
        let out = substitute_env_with("tail ${UNCLOSED", |_| None);
        assert_eq!(out, "tail ${UNCLOSED");
    }
}
