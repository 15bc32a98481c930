use crate::errors::{AvatarError, AvatarResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_VOICE_ID: &str = "Xb7hH8MSUJpSbSDYk0k2";
pub const DEFAULT_TTS_MODEL: &str = "eleven_monolingual_v1";
pub const DEFAULT_TTS_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_AUDIO_DIR: &str = "audios";
pub const DEFAULT_TRANSCODE_COMMAND: &str = "ffmpeg -y -i {input} {output}";
pub const DEFAULT_LIPSYNC_COMMAND: &str = "rhubarb -f json -o {output} {input} -r phonetic";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a virtual girlfriend.
You will always reply with a JSON array of messages. With a maximum of 3 messages.
Each message has a text, facialExpression, and animation property.
The different facial expressions are: smile, sad, angry, surprised, funnyFace, and default.
The different animations are: Talking_0, Talking_1, Talking_2, Crying, Laughing, Rumba, Idle, Terrified, and Angry.";

/// Top-level configuration for the avatar chat daemon.
///
/// Every field is optional so that partial layers (file, environment, CLI)
/// can be merged on top of the built-in defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AvatarConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Azure OpenAI chat-completions settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LlmConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

/// ElevenLabs text-to-speech settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TtsConfig {
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Audio working directory and external tool settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MediaConfig {
    pub audio_dir: Option<PathBuf>,
    /// Shell template with `{input}` (mp3) and `{output}` (wav) placeholders
    pub transcode_command: Option<String>,
    /// Shell template with `{input}` (wav) and `{output}` (json) placeholders
    pub lipsync_command: Option<String>,
    pub command_timeout_secs: Option<u64>,
    pub keep_artifacts: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServerConfig {
    pub bind_addr: Option<String>,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                endpoint: None,
                api_key: None,
                deployment: None,
                api_version: Some(DEFAULT_API_VERSION.to_string()),
                system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
                temperature: Some(0.6),
                top_p: Some(0.95),
                max_tokens: Some(1000),
                request_timeout_secs: Some(60),
            },
            tts: TtsConfig {
                api_key: None,
                voice_id: Some(DEFAULT_VOICE_ID.to_string()),
                model_id: Some(DEFAULT_TTS_MODEL.to_string()),
                base_url: Some(DEFAULT_TTS_BASE_URL.to_string()),
                request_timeout_secs: Some(60),
            },
            media: MediaConfig {
                audio_dir: Some(PathBuf::from(DEFAULT_AUDIO_DIR)),
                transcode_command: Some(DEFAULT_TRANSCODE_COMMAND.to_string()),
                lipsync_command: Some(DEFAULT_LIPSYNC_COMMAND.to_string()),
                command_timeout_secs: Some(DEFAULT_COMMAND_TIMEOUT_SECS),
                keep_artifacts: Some(false),
            },
            server: ServerConfig {
                bind_addr: Some(DEFAULT_BIND_ADDR.to_string()),
            },
        }
    }
}

impl AvatarConfig {
    /// A configuration layer with nothing set
    pub fn empty() -> Self {
        Self {
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            media: MediaConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Loads configuration from a file if it exists, otherwise returns an empty layer
    pub fn load_from_file(path: &Path) -> AvatarResult<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            AvatarError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content)
            .map_err(|e| AvatarError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// Builds a layer from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a layer from an arbitrary variable lookup.
    ///
    /// Recognised keys: `AZURE_LLM_ENDPOINT`, `AZURE_LLM_API_KEY`,
    /// `AZURE_DEPLOYMENT_NAME`, `AZURE_API_VERSION`, `ELEVEN_LABS_API_KEY`,
    /// `AVATAR_AUDIO_DIR` and `AVATAR_BIND_ADDR`. Empty values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::empty();
        config.llm.endpoint = get("AZURE_LLM_ENDPOINT");
        config.llm.api_key = get("AZURE_LLM_API_KEY");
        config.llm.deployment = get("AZURE_DEPLOYMENT_NAME");
        config.llm.api_version = get("AZURE_API_VERSION");
        config.tts.api_key = get("ELEVEN_LABS_API_KEY");
        config.media.audio_dir = get("AVATAR_AUDIO_DIR").map(PathBuf::from);
        config.server.bind_addr = get("AVATAR_BIND_ADDR");
        config
    }

    /// Merges this config with another config, preferring values from the other config if present
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            llm: self.llm.merge(&other.llm),
            tts: self.tts.merge(&other.tts),
            media: self.media.merge(&other.media),
            server: ServerConfig {
                bind_addr: other
                    .server
                    .bind_addr
                    .clone()
                    .or_else(|| self.server.bind_addr.clone()),
            },
        }
    }

    /// Checks that everything needed to talk to the upstream APIs is present
    pub fn validate(&self) -> AvatarResult<()> {
        let missing: Vec<&str> = [
            ("llm.endpoint / AZURE_LLM_ENDPOINT", self.llm.endpoint.is_none()),
            ("llm.api_key / AZURE_LLM_API_KEY", self.llm.api_key.is_none()),
            ("llm.deployment / AZURE_DEPLOYMENT_NAME", self.llm.deployment.is_none()),
            ("tts.api_key / ELEVEN_LABS_API_KEY", self.tts.api_key.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(AvatarError::ConfigError(format!(
                "Missing required settings: {}",
                missing.join(", ")
            )));
        }

        self.server.bind_addr()?;
        Ok(())
    }
}

impl LlmConfig {
    fn merge(&self, other: &Self) -> Self {
        Self {
            endpoint: other.endpoint.clone().or_else(|| self.endpoint.clone()),
            api_key: other.api_key.clone().or_else(|| self.api_key.clone()),
            deployment: other.deployment.clone().or_else(|| self.deployment.clone()),
            api_version: other.api_version.clone().or_else(|| self.api_version.clone()),
            system_prompt: other
                .system_prompt
                .clone()
                .or_else(|| self.system_prompt.clone()),
            temperature: other.temperature.or(self.temperature),
            top_p: other.top_p.or(self.top_p),
            max_tokens: other.max_tokens.or(self.max_tokens),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

impl TtsConfig {
    fn merge(&self, other: &Self) -> Self {
        Self {
            api_key: other.api_key.clone().or_else(|| self.api_key.clone()),
            voice_id: other.voice_id.clone().or_else(|| self.voice_id.clone()),
            model_id: other.model_id.clone().or_else(|| self.model_id.clone()),
            base_url: other.base_url.clone().or_else(|| self.base_url.clone()),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
        }
    }
}

impl MediaConfig {
    fn merge(&self, other: &Self) -> Self {
        Self {
            audio_dir: other.audio_dir.clone().or_else(|| self.audio_dir.clone()),
            transcode_command: other
                .transcode_command
                .clone()
                .or_else(|| self.transcode_command.clone()),
            lipsync_command: other
                .lipsync_command
                .clone()
                .or_else(|| self.lipsync_command.clone()),
            command_timeout_secs: other.command_timeout_secs.or(self.command_timeout_secs),
            keep_artifacts: other.keep_artifacts.or(self.keep_artifacts),
        }
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.audio_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_DIR))
    }

    pub fn transcode_command(&self) -> &str {
        self.transcode_command
            .as_deref()
            .unwrap_or(DEFAULT_TRANSCODE_COMMAND)
    }

    pub fn lipsync_command(&self) -> &str {
        self.lipsync_command
            .as_deref()
            .unwrap_or(DEFAULT_LIPSYNC_COMMAND)
    }

    pub fn command_timeout_secs(&self) -> u64 {
        self.command_timeout_secs
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
    }

    pub fn keep_artifacts(&self) -> bool {
        self.keep_artifacts.unwrap_or(false)
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> AvatarResult<SocketAddr> {
        let raw = self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        raw.parse().map_err(|e| {
            AvatarError::ConfigError(format!("Invalid bind address '{}': {}", raw, e))
        })
    }
}

/// Loads a `.env` file from the working directory or its parents, if any
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Helper function to get default config directory
pub fn get_default_config_dir(app_name: &str) -> AvatarResult<PathBuf> {
    let home_dir = dirs::home_dir().ok_or_else(|| {
        AvatarError::ConfigError("Could not determine home directory".to_string())
    })?;

    Ok(home_dir.join(".config").join(app_name))
}

/// Helper function to get default config file path
pub fn get_default_config_file(app_name: &str) -> AvatarResult<PathBuf> {
    let config_dir = get_default_config_dir(app_name)?;
    Ok(config_dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_carry_fixed_constants() {
        let config = AvatarConfig::default();
        assert_eq!(config.tts.voice_id.as_deref(), Some(DEFAULT_VOICE_ID));
        assert_eq!(config.server.bind_addr().unwrap().port(), 3000);
        assert_eq!(config.llm.temperature, Some(0.6));
        assert_eq!(config.llm.top_p, Some(0.95));
        assert_eq!(config.llm.max_tokens, Some(1000));
        assert!(config.llm.system_prompt().starts_with("You are a virtual girlfriend."));
    }

    #[test]
    fn test_env_layer_overrides_defaults() {
        let env = AvatarConfig::from_lookup(lookup_from(&[
            ("AZURE_LLM_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_LLM_API_KEY", "llm-key"),
            ("AZURE_DEPLOYMENT_NAME", "gpt-4o"),
            ("ELEVEN_LABS_API_KEY", "tts-key"),
            ("AZURE_API_VERSION", ""),
        ]));

        let merged = AvatarConfig::default().merge(&env);
        assert_eq!(
            merged.llm.endpoint.as_deref(),
            Some("https://example.openai.azure.com")
        );
        assert_eq!(merged.llm.deployment.as_deref(), Some("gpt-4o"));
        assert_eq!(merged.tts.api_key.as_deref(), Some("tts-key"));
        // Empty variables do not clobber defaults
        assert_eq!(merged.llm.api_version.as_deref(), Some(DEFAULT_API_VERSION));
        assert!(merged.validate().is_ok());
    }

    #[test]
    fn test_validate_lists_missing_settings() {
        let err = AvatarConfig::default().validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("AZURE_LLM_ENDPOINT"));
        assert!(message.contains("ELEVEN_LABS_API_KEY"));
    }

    #[test]
    fn test_invalid_bind_addr_is_config_error() {
        let mut config = AvatarConfig::default();
        config.server.bind_addr = Some("not-an-addr".to_string());
        assert!(matches!(
            config.server.bind_addr(),
            Err(AvatarError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[media]\naudio_dir = \"/tmp/avatar\"\nkeep_artifacts = true\n\n[server]\nbind_addr = \"0.0.0.0:8080\""
        )
        .unwrap();

        let layer = AvatarConfig::load_from_file(file.path()).unwrap();
        assert!(layer.llm.endpoint.is_none());

        let merged = AvatarConfig::default().merge(&layer);
        assert_eq!(merged.media.audio_dir(), PathBuf::from("/tmp/avatar"));
        assert!(merged.media.keep_artifacts());
        assert_eq!(merged.media.transcode_command(), DEFAULT_TRANSCODE_COMMAND);
        assert_eq!(merged.server.bind_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_missing_file_is_empty_layer() {
        let layer = AvatarConfig::load_from_file(Path::new("/definitely/not/here.toml")).unwrap();
        assert!(layer.server.bind_addr.is_none());
        assert!(layer.media.audio_dir.is_none());
    }
}
