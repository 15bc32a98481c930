use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{TtsConfig, DEFAULT_TTS_BASE_URL, DEFAULT_TTS_MODEL, DEFAULT_VOICE_ID};
use crate::errors::{AvatarError, AvatarResult};

/// Common trait for text-to-speech backends that render to an audio file
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` and write the encoded MP3 to `output`
    async fn synthesize_to_file(&self, text: &str, output: &Path) -> AvatarResult<()>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// ElevenLabs text-to-speech client
#[derive(Debug, Clone)]
pub struct ElevenLabsClient {
    client: Client,
    base_url: String,
    voice_id: String,
    model_id: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

impl ElevenLabsClient {
    /// Create a new ElevenLabs client
    pub fn new(config: &TtsConfig) -> AvatarResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AvatarError::ConfigError("TTS API key is required".to_string()))?;

        let mut headers = HeaderMap::new();
        let mut key_header = HeaderValue::from_str(&api_key)
            .map_err(|e| AvatarError::ConfigError(format!("Invalid API key format: {}", e)))?;
        key_header.set_sensitive(true);
        headers.insert("xi-api-key", key_header);
        headers.insert(ACCEPT, HeaderValue::from_static("audio/mpeg"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.unwrap_or(60)))
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_TTS_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            voice_id: config
                .voice_id
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            model_id: config
                .model_id
                .clone()
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
        })
    }

    fn api_url(&self) -> String {
        format!("{}/v1/text-to-speech/{}", self.base_url, self.voice_id)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize_to_file(&self, text: &str, output: &Path) -> AvatarResult<()> {
        info!(voice = %self.voice_id, text_len = text.len(), "ElevenLabs TTS request");

        let request = SpeechRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.5,
            },
        };

        let response = self
            .client
            .post(self.api_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| AvatarError::RequestError(format!("TTS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AvatarError::HttpError {
                status_code: status.as_u16(),
                message: format!("TTS API error: {}", body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AvatarError::ResponseError(format!("Failed to read TTS audio: {}", e)))?;
        if bytes.is_empty() {
            return Err(AvatarError::ResponseError(
                "TTS API returned no audio".to_string(),
            ));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, &bytes).await?;
        debug!(path = %output.display(), bytes = bytes.len(), "Wrote synthesized audio");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path as AxumPath;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::net::SocketAddr;

    async fn fake_tts(
        AxumPath(voice): AxumPath<String>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let authorised = headers.get("xi-api-key").map(|v| v.as_bytes()) == Some(b"tts-key".as_slice());
        if !authorised || voice != "voice-1" {
            return (StatusCode::UNAUTHORIZED, b"bad key".to_vec());
        }
        let text = body["text"].as_str().unwrap_or_default();
        (StatusCode::OK, format!("ID3:{}", text).into_bytes())
    }

    async fn spawn() -> SocketAddr {
        let router = Router::new().route("/v1/text-to-speech/:voice", post(fake_tts));
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = axum::Server::bind(&addr).serve(router.into_make_service());
        let local = server.local_addr();
        tokio::spawn(server);
        local
    }

    fn config_for(addr: SocketAddr, key: &str) -> TtsConfig {
        TtsConfig {
            api_key: Some(key.to_string()),
            voice_id: Some("voice-1".to_string()),
            model_id: None,
            base_url: Some(format!("http://{}", addr)),
            request_timeout_secs: Some(5),
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        assert!(matches!(
            ElevenLabsClient::new(&TtsConfig::default()),
            Err(AvatarError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_synthesize_writes_audio_file() {
        let addr = spawn().await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("message_0.mp3");

        let client = ElevenLabsClient::new(&config_for(addr, "tts-key")).unwrap();
        client.synthesize_to_file("Hello", &output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"ID3:Hello");
    }

    #[tokio::test]
    async fn test_rejected_key_is_http_error() {
        let addr = spawn().await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("message_0.mp3");

        let client = ElevenLabsClient::new(&config_for(addr, "wrong")).unwrap();
        let err = client.synthesize_to_file("Hello", &output).await.unwrap_err();

        assert!(matches!(err, AvatarError::HttpError { status_code: 401, .. }));
        assert!(!output.exists());
    }
}
