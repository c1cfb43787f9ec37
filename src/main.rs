//! Application entry point: voice assistant.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] (first argument, else the platform config file).
//! 3. Create the [`tokio`] runtime.
//! 4. Load the Whisper model.
//! 5. Open the microphone and the speaker; the speaker stream runs for the
//!    whole session, fed from the playback buffer.
//! 6. Start the MCP tool servers, build the chat client and check that the
//!    model server answers.
//! 7. Spawn the conversation controller on the runtime.
//! 8. Run [`eframe::run_native`]: blocks the main thread until the window
//!    is closed.
//!
//! Any failure before step 8 is fatal.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use eframe::egui;
use tokio::sync::mpsc;

use voice_assistant::{
    app::TranscriptApp,
    audio::{playback_buffer, AudioOutput, Microphone, SegmenterConfig},
    config::{AppConfig, AppPaths},
    conversation::{ChannelSink, Collaborators, ControllerSettings, ConversationController},
    llm::{ChatClient, ToolCallLoop},
    stt::{TranscribeParams, WhisperEngine},
    tools::{mcp::DEFAULT_CALL_TIMEOUT, McpToolbox, NoTools, ToolInvoker},
    tts::{HttpSynthesizer, SYNTHESIS_SAMPLE_RATE},
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config() -> anyhow::Result<AppConfig> {
    match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from(Path::new(&path))
            .with_context(|| format!("failed to load config from {path}")),
        None => Ok(AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        })),
    }
}

/// Start the configured tool servers.  Missing or unreadable server lists
/// mean "no tools", not a startup failure.
async fn load_tools(config: &AppConfig, paths: &AppPaths) -> Arc<dyn ToolInvoker> {
    let Some(file) = &config.model.servers_file else {
        return Arc::new(NoTools);
    };
    let path = paths.resolve(file);
    if !path.exists() {
        log::info!("No tool servers configured ({} not found)", path.display());
        return Arc::new(NoTools);
    }

    match McpToolbox::from_file(&path, DEFAULT_CALL_TIMEOUT).await {
        Ok(toolbox) => Arc::new(toolbox),
        Err(e) => {
            log::warn!("Ignoring tool servers in {}: {e}", path.display());
            Arc::new(NoTools)
        }
    }
}

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let (width, height) = config.ui.window_size;
    let mut vp = egui::ViewportBuilder::default()
        .with_title("Voice Assistant")
        .with_inner_size([width, height])
        .with_min_inner_size([400.0, 300.0]);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Voice assistant starting up");

    // 2. Configuration
    let config = load_config()?;
    let paths = AppPaths::new();

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Speech-to-text
    let model_path = paths.model_file(&config.stt.model);
    let stt = WhisperEngine::load(&model_path, TranscribeParams::from(&config.stt))
        .with_context(|| format!("failed to load Whisper model {}", model_path.display()))?;
    log::info!("Whisper model loaded: {}", model_path.display());

    // 5. Audio devices
    let (microphone, _input_stream) = Microphone::open(SegmenterConfig::from(&config.audio))
        .context("microphone unavailable")?;

    if config.audio.output_sample_rate != SYNTHESIS_SAMPLE_RATE {
        log::warn!(
            "Output rate {} Hz differs from synthesized speech ({} Hz); playback pitch will be off",
            config.audio.output_sample_rate,
            SYNTHESIS_SAMPLE_RATE
        );
    }
    let (producer, consumer) = playback_buffer(config.audio.playback_queue_capacity.max(1));
    let monitor = consumer.monitor();
    let output = AudioOutput::new(config.audio.output_sample_rate, config.audio.frames_per_buffer)
        .context("speaker unavailable")?;
    let _output_stream = output
        .start(consumer)
        .context("failed to start speaker stream")?;

    // 6. Tools and model
    let tools = rt.block_on(load_tools(&config, &paths));
    let model = Arc::new(ChatClient::from_config(&config.model, &tools.tools()));
    rt.block_on(model.check_connection())
        .with_context(|| format!("model server at {} is unreachable", config.model.base_url))?;
    log::info!(
        "Model {} at {} with {} tools",
        config.model.model,
        config.model.base_url,
        tools.tools().len()
    );

    let synthesizer = Arc::new(HttpSynthesizer::from_config(
        &config.synthesis,
        rt.handle().clone(),
    ));

    // 7. Conversation controller
    let (sink, events_rx) = ChannelSink::new();
    let (query_tx, query_rx) = mpsc::unbounded_channel::<String>();

    let controller = ConversationController::new(
        Collaborators {
            capture: Arc::new(microphone),
            stt: Arc::new(stt),
            tool_loop: ToolCallLoop::new(model, tools, config.assistant.max_tool_rounds),
            synthesizer,
            playback: producer,
            monitor,
            sink: Arc::new(sink),
        },
        ControllerSettings::from_config(&config),
    );
    rt.spawn(controller.run(query_rx));

    // 8. Transcript window (blocks until closed)
    let app = TranscriptApp::new(events_rx, query_tx);
    eframe::run_native(
        "Voice Assistant",
        native_options(&config),
        Box::new(move |_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("window failed: {e}"))?;

    log::info!("Voice assistant shutting down");
    Ok(())
}
