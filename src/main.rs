use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use realtime_edge_rs::audio::{AudioConfig, AudioStreams, BYTES_PER_SAMPLE};
use realtime_edge_rs::config::{load_config, SessionConfig, DEFAULT_MODEL, DEFAULT_REALTIME_URL};
use realtime_edge_rs::frame_buffer::frame_buffer;
use realtime_edge_rs::playback::{PlaybackGate, PlaybackSelector};
use realtime_edge_rs::session::RealtimeSession;
use realtime_edge_rs::tools::{create_default_registry, remote::load_manifest};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Realtime websocket endpoint
    #[arg(long, default_value = DEFAULT_REALTIME_URL)]
    url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = "alloy")]
    voice: String,

    /// System instructions for the assistant
    #[arg(long, default_value = "")]
    instructions: String,

    /// Substring of the microphone device name
    #[arg(long)]
    input_device: Option<String>,

    /// Substring of the speaker device name
    #[arg(long)]
    output_device: Option<String>,

    /// Capture buffer capacity in bytes
    #[arg(long, default_value_t = 4096)]
    input_buffer_size: usize,

    #[arg(long, default_value_t = 10)]
    pump_interval_ms: u64,

    /// 0 waits for the session acknowledgment indefinitely
    #[arg(long, default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// JSON manifest of HTTP tools
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Run without opening audio devices
    #[arg(long)]
    no_audio: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            url: self.url.clone(),
            model: self.model.clone(),
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            input_buffer_size: self.input_buffer_size,
            pump_interval: Duration::from_millis(self.pump_interval_ms.max(1)),
            handshake_timeout: (self.handshake_timeout_secs > 0)
                .then(|| Duration::from_secs(self.handshake_timeout_secs)),
            ..SessionConfig::default()
        }
    }

    fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            ..AudioConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    log::info!("🚀 Initializing realtime-edge");

    let args = Args::parse();
    let api = load_config().context("Failed to load configuration")?;

    let mut registry = create_default_registry();
    if let Some(manifest) = &args.tools {
        let tools = load_manifest(manifest).context("Failed to load tool manifest")?;
        registry = registry.register_all(tools);
    }
    let registry = registry.build();
    log::info!("🔧 {} tools registered: {:?}", registry.len(), registry.names());

    let config = args.session_config();
    let (capture_writer, capture_reader) = frame_buffer(config.input_buffer_size);
    let session = RealtimeSession::new(config, Some(api), registry);

    let hardware = if args.no_audio {
        log::info!("Audio disabled, running without devices");
        None
    } else {
        let selector = PlaybackSelector::new(
            session.state().responses(),
            PlaybackGate::new(),
            BYTES_PER_SAMPLE,
        );
        let streams = AudioStreams::start(args.audio_config(), capture_writer, selector)
            .context("Failed to start audio")?;
        Some(streams)
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received Ctrl+C, shutting down...");
                cancel.cancel();
            }
        }
    });

    println!("🎧 Talk to the assistant, press Ctrl+C to exit");
    let outcome = session
        .run(capture_reader, hardware, cancel)
        .await
        .context("Realtime session failed")?;

    log::info!(
        "Session closed ({:?}): {} audio chunks sent, {} tool calls",
        outcome.reason,
        outcome.pump.chunks_sent,
        outcome.tool_calls
    );
    println!("\n👋 Goodbye!");
    Ok(())
}
