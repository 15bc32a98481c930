use anyhow::{Context, Result};
use avatar_chatd::coordinator::Coordinator;
use avatar_chatd::http_server;
use avatar_chatd::session::Conversation;
use avatar_core::client::{AzureChatClient, ChatCompletion};
use avatar_core::config::{self, AvatarConfig};
use avatar_core::tts::{ElevenLabsClient, SpeechSynthesizer};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "avatar-daemon",
    about = "Chat endpoint that voices and lip-syncs LLM replies for a 3D avatar",
    version
)]
struct Args {
    /// Path to config file (defaults to ~/.config/avatar-chat/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP server address
    #[arg(long)]
    bind_addr: Option<String>,

    /// Directory holding intro assets and per-request media
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    /// Deadline for each ffmpeg / rhubarb invocation, in seconds
    #[arg(long)]
    command_timeout_secs: Option<u64>,

    /// Keep per-request mp3/wav/json files instead of deleting them
    #[arg(long)]
    keep_artifacts: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AVATAR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn as_layer(&self) -> AvatarConfig {
        let mut layer = AvatarConfig::empty();
        layer.server.bind_addr = self.bind_addr.clone();
        layer.media.audio_dir = self.audio_dir.clone();
        layer.media.command_timeout_secs = self.command_timeout_secs;
        layer.media.keep_artifacts = self.keep_artifacts.then_some(true);
        layer
    }
}

fn load_config(args: &Args) -> Result<AvatarConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => config::get_default_config_file("avatar-chat")
            .context("Failed to determine default config path")?,
    };
    let file_layer = AvatarConfig::load_from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    info!("Using configuration file {}", path.display());

    let merged = AvatarConfig::default()
        .merge(&file_layer)
        .merge(&AvatarConfig::from_env())
        .merge(&args.as_layer());
    merged.validate().context("Configuration error")?;
    Ok(merged)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_file = config::load_env_file();
    let args = Args::parse();

    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    info!("Starting avatar chat daemon");
    match env_file {
        Some(path) => info!("Loaded environment from {}", path.display()),
        None => warn!("No .env file found, using process environment only"),
    }

    let config = load_config(&args)?;

    let llm: Arc<dyn ChatCompletion> = Arc::new(
        AzureChatClient::new(&config.llm).context("Failed to initialize LLM client")?,
    );
    info!(provider = llm.provider_name(), model = %llm.model_name(), "Initialized LLM client");

    let tts: Arc<dyn SpeechSynthesizer> = Arc::new(
        ElevenLabsClient::new(&config.tts).context("Failed to initialize TTS client")?,
    );
    info!(provider = tts.provider_name(), "Initialized TTS client");

    let audio_dir = config.media.audio_dir();
    tokio::fs::create_dir_all(&audio_dir)
        .await
        .with_context(|| format!("Failed to create audio directory {}", audio_dir.display()))?;

    let conversation = Conversation::shared(config.llm.system_prompt());
    let coordinator = Arc::new(Coordinator::new(llm, tts, conversation, &config.media));

    let addr = config.server.bind_addr()?;
    info!("Avatar chat daemon listening on {}", addr);
    http_server::run_server(coordinator, addr).await
}
