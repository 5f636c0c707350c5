//! Exam Telemetry CLI
//!
//! Replays recorded page signals through the logger against a live exam API.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use exam_telemetry::{
    capture::{
        ClipboardSnapshot, KeySignal, MemoryEventSource, PageState, Signal, SignalTarget,
        StaticClipboard, Viewport, Visibility,
    },
    observer, AuthTransport, ClientConfig, EventType, Logger, LoggerConfig, ReqwestBackend,
    Session, MONITORING_NOTICE, VERSION,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exam-telemetry")]
#[command(version = VERSION)]
#[command(about = "Behavioral telemetry capture and delivery for proctored tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL file of page signals through the logger
    Replay {
        /// Signal file, one JSON object per line
        #[arg(long)]
        file: PathBuf,

        /// Test instance the telemetry belongs to
        #[arg(long)]
        instance: String,

        /// Exam API base URL (defaults to the saved config)
        #[arg(long)]
        api_url: Option<String>,

        /// Telemetry endpoint (defaults to the instance endpoint)
        #[arg(long)]
        endpoint: Option<String>,

        /// Maximum events per request
        #[arg(long, default_value = "50")]
        batch_size: usize,

        /// Flush interval in milliseconds
        #[arg(long, default_value = "5000")]
        interval_ms: u64,
    },

    /// List the event types the logger records
    Types,

    /// Display the monitoring notice shown to test takers
    Notice,

    /// Show configuration
    Config,

    /// Log in and save the access token
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Exam API base URL (defaults to the saved config)
        #[arg(long)]
        api_url: Option<String>,
    },
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordedSignal {
    /// Listener target; ignored for host events
    #[serde(default = "default_target")]
    target: SignalTarget,
    /// DOM event name, such as `paste` or `visibilitychange`
    #[serde(default)]
    event: Option<String>,
    /// Wait before applying this line
    #[serde(default)]
    delay_ms: u64,
    key: Option<KeySignal>,
    clipboard: Option<StaticClipboard>,
    viewport: Option<Viewport>,
    visibility: Option<Visibility>,
    fullscreen: Option<bool>,
    url: Option<String>,
    /// Host event recorded directly, such as TESTSTART
    event_type: Option<EventType>,
    #[serde(default)]
    event_data: Value,
}

fn default_target() -> SignalTarget {
    SignalTarget::Document
}

impl RecordedSignal {
    fn apply_state(&self, state: &mut PageState) {
        if let Some(viewport) = self.viewport {
            state.viewport = viewport;
        }
        if let Some(visibility) = self.visibility {
            state.visibility = visibility;
        }
        if let Some(fullscreen) = self.fullscreen {
            state.fullscreen = fullscreen;
        }
        if let Some(url) = &self.url {
            state.url = url.clone();
        }
    }

    fn signal(&self) -> Signal {
        if let Some(key) = &self.key {
            return Signal::Key(key.clone());
        }
        match &self.clipboard {
            Some(clipboard) => {
                let snapshot: Arc<dyn ClipboardSnapshot> = Arc::new(clipboard.clone());
                Signal::Clipboard(Some(snapshot))
            }
            None => Signal::Empty,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Replay {
            file,
            instance,
            api_url,
            endpoint,
            batch_size,
            interval_ms,
        } => {
            cmd_replay(
                &file,
                &instance,
                api_url,
                endpoint,
                batch_size,
                interval_ms,
                cli.verbose,
            )
            .await
        }
        Commands::Types => {
            cmd_types();
            Ok(())
        }
        Commands::Notice => {
            println!("{MONITORING_NOTICE}");
            Ok(())
        }
        Commands::Config => cmd_config(),
        Commands::Login {
            email,
            password,
            api_url,
        } => cmd_login(&email, &password, api_url).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn resolve_api_url(flag: Option<String>, config: &ClientConfig) -> Result<String> {
    match flag.or_else(|| config.api_url.clone()) {
        Some(url) => Ok(url),
        None => bail!(
            "no API URL given; pass --api-url or set apiUrl in {}",
            ClientConfig::config_path().display()
        ),
    }
}

fn session_from(config: &ClientConfig) -> Arc<Session> {
    let session = Session::new();
    session.set_access_token(config.access_token.clone());
    session.set_role(config.role.clone());
    Arc::new(session)
}

async fn cmd_replay(
    file: &Path,
    instance: &str,
    api_url: Option<String>,
    endpoint: Option<String>,
    batch_size: usize,
    interval_ms: u64,
    verbose: bool,
) -> Result<()> {
    println!("Exam Telemetry v{VERSION}");
    println!();

    let client = ClientConfig::load().context("loading client config")?;
    let api_url = resolve_api_url(api_url, &client)?;
    if client.access_token.is_none() {
        eprintln!("Warning: no saved access token; run `exam-telemetry login` first.");
    }

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let mut signals = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let signal: RecordedSignal = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid signal", file.display(), index + 1))?;
        signals.push(signal);
    }

    let mut config = LoggerConfig::for_instance(&api_url, instance)
        .with_max_batch_size(batch_size)
        .with_send_interval(Duration::from_millis(interval_ms))
        .with_debug(verbose);
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }

    let transport = AuthTransport::new(&api_url, session_from(&client), ReqwestBackend::new()?)?;
    let source = Arc::new(MemoryEventSource::default());
    let (event_observer, events) = observer::channel(256);
    let logger = Logger::builder(config)
        .observer(event_observer)
        .build(Arc::new(transport), source.clone())?;

    println!("Replaying {} signals", signals.len());
    println!("  Endpoint: {}", logger.config().endpoint);
    println!("  Page ID: {}", logger.page_id());
    println!("  Batch size: {batch_size}");
    println!("  Interval: {interval_ms}ms");
    println!();

    logger.start()?;
    for signal in &signals {
        if signal.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(signal.delay_ms)).await;
        }
        source.update_state(|state| signal.apply_state(state));

        if let Some(event_type) = signal.event_type {
            logger.record(event_type, signal.event_data.clone());
        } else if let Some(name) = &signal.event {
            if source.dispatch(signal.target, name, &signal.signal()) == 0 {
                tracing::warn!(listener = ?signal.target, event = %name, "no listener for signal");
            }
        }

        for event in events.try_iter() {
            println!("  {} {}", event.event_type, event.event_data);
        }
    }
    logger.stop();

    println!();
    println!("Waiting for deliveries (Ctrl+C to abandon)...");
    tokio::select! {
        outcomes = logger.wait_for_deliveries() => {
            println!("{} batches finished", outcomes.len());
        }
        _ = tokio::signal::ctrl_c() => {
            logger.abort_deliveries();
            let pending = logger.deliveries();
            eprintln!("Abandoned {} deliveries", pending.len());
        }
    }

    for event in events.try_iter() {
        println!("  {} {}", event.event_type, event.event_data);
    }
    println!();
    println!("{}", logger.stats().summary());
    Ok(())
}

fn cmd_types() {
    println!("Recorded event types:");
    for event_type in EventType::ALL {
        println!("  {event_type}");
    }
}

fn cmd_config() -> Result<()> {
    let config = ClientConfig::load().context("loading client config")?;

    println!("Exam Telemetry Configuration");
    println!("============================");
    println!();
    println!("Config file: {:?}", ClientConfig::config_path());
    println!(
        "  API URL: {}",
        config.api_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  Access token: {}",
        if config.access_token.is_some() {
            "saved"
        } else {
            "(none)"
        }
    );
    println!(
        "  Role: {}",
        config.role.as_deref().unwrap_or(exam_telemetry::transport::session::DEFAULT_ROLE)
    );
    println!();

    let defaults = LoggerConfig::default();
    println!("Logger defaults:");
    println!("  Send interval: {}ms", defaults.send_interval.as_millis());
    println!("  Max batch size: {}", defaults.max_batch_size);
    Ok(())
}

async fn cmd_login(email: &str, password: &str, api_url: Option<String>) -> Result<()> {
    let mut config = ClientConfig::load().context("loading client config")?;
    let api_url = resolve_api_url(api_url, &config)?;

    let session = Arc::new(Session::new());
    let transport = AuthTransport::new(&api_url, session.clone(), ReqwestBackend::new()?)?;
    if !transport.login(email, password).await {
        bail!("login failed for {email}");
    }

    config.api_url = Some(api_url);
    config.access_token = session.access_token();
    config.save().context("saving client config")?;
    println!("Logged in. Token saved to {:?}", ClientConfig::config_path());
    Ok(())
}
