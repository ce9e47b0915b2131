//! cellgate: bridge calls between a cellular line and a SIP PBX
//!
//! `run` starts the full gateway with the terminal standing in for the
//! modem. `register` and `stun` check the SIP side on their own, and
//! `config` prints the effective configuration.

mod audio;
mod console;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cellgate_call_engine::{BridgeOrchestrator, GatewayContext, RtpMedia};
use cellgate_dialog_core::{stun, RegistrationState, SipUserAgent};
use cellgate_infra_common::{load_config, load_config_with_prefix, log_welcome, setup_logging, GatewayConfig, ENV_PREFIX};
use cellgate_media_core::AudioSource;

use crate::audio::{MeterSink, NullSource, ToneSource};
use crate::console::{run_console, ConsoleCellular};

#[derive(Parser, Debug)]
#[command(name = "cellgate", version, about = "Cellular to SIP PBX gateway")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CELLGATE_CONFIG", default_value = "cellgate.toml")]
    config: PathBuf,

    /// Log at debug level regardless of the configured level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway with a console-driven cellular leg
    Run {
        /// Send a sine tone of this frequency (Hz) instead of silence
        #[arg(long)]
        tone: Option<f32>,
    },
    /// Perform one registration cycle and exit
    Register,
    /// Discover the public address through the configured STUN servers
    Stun,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match execute(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            1
        }
    };
    // a pending stdin read would otherwise hold the runtime open
    std::process::exit(code);
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Config => {
            // no file yet: print the defaults as a template
            let path = cli.config.exists().then_some(cli.config.as_path());
            let config = load_config_with_prefix(path, ENV_PREFIX)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Stun => {
            let config = load_optional(&cli.config)?;
            init_logging(&config, cli.verbose)?;
            discover(&config).await
        }
        Command::Register => {
            let config = load_config(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            init_logging(&config, cli.verbose)?;
            register(config).await
        }
        Command::Run { tone } => {
            let config = load_config(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            init_logging(&config, cli.verbose)?;
            run(config, tone).await
        }
    }
}

fn load_optional(path: &Path) -> anyhow::Result<GatewayConfig> {
    let path = path.exists().then_some(path);
    Ok(load_config_with_prefix(path, ENV_PREFIX)?)
}

fn init_logging(config: &GatewayConfig, verbose: bool) -> anyhow::Result<()> {
    let mut logging = config.logging.to_logging_config("cellgate")?;
    if verbose {
        logging.level = tracing::Level::DEBUG;
    }
    setup_logging(logging)?;
    log_welcome("cellgate", env!("CARGO_PKG_VERSION"));
    Ok(())
}

async fn discover(config: &GatewayConfig) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(SocketAddr::new(config.sip.bind_address, 0)).await?;
    let public = stun::discover(&socket, &config.sip.stun_servers, config.sip.stun_timeout())
        .await
        .context("STUN discovery failed")?;
    println!("local  {}", socket.local_addr()?);
    println!("public {}", public);
    Ok(())
}

async fn register(config: GatewayConfig) -> anyhow::Result<()> {
    let agent = SipUserAgent::start(config.sip).await?;
    let outcome = agent.register().await;
    match agent.registration_state() {
        RegistrationState::Registered => {
            println!("✅ registered as {}", agent.identity().contact());
            if let Some(public) = agent.public_addr() {
                println!("   public address {}", public);
            }
        }
        state => println!("❌ registration {:?}", state),
    }
    agent.shutdown().await;
    outcome.context("registration failed")?;
    Ok(())
}

async fn run(config: GatewayConfig, tone: Option<f32>) -> anyhow::Result<()> {
    let rate = config.media.device_sample_rate;
    let source: Arc<dyn AudioSource> = match tone {
        Some(frequency) if frequency <= 0.0 || frequency >= rate as f32 / 2.0 => {
            bail!("tone must lie between 0 and {} Hz", rate / 2)
        }
        Some(frequency) => Arc::new(ToneSource::new(rate, frequency, 6000)),
        None => Arc::new(NullSource::new(rate)),
    };
    let sink = Arc::new(MeterSink::new(rate));

    let agent = SipUserAgent::start(config.sip.clone()).await?;
    let sip_events = agent.subscribe();
    if let Err(e) = agent.register().await {
        warn!(error = %e, "initial registration failed, the monitor keeps retrying");
    }
    agent.start_monitor();

    let (cellular, cellular_events) = ConsoleCellular::new();
    let media = Arc::new(RtpMedia::new(config.media.clone(), source, sink.clone()));
    let ctx = GatewayContext::new(config.bridge.clone(), Arc::new(agent.clone()), cellular.clone(), media);
    let orchestrator = BridgeOrchestrator::new(ctx);

    let mut updates = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update.reason {
                Some(reason) => println!("☎  {} ({})", update.state, reason),
                None => println!("☎  {}", update.state),
            }
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            interrupt.cancel();
        }
    });

    let bridge = tokio::spawn(orchestrator.clone().run(sip_events, cellular_events, cancel.clone()));
    info!(sip = %agent.local_addr(), media_ip = %agent.media_ip(), "gateway ready");

    run_console(BufReader::new(tokio::io::stdin()), cellular, orchestrator, cancel).await;

    bridge.await.context("bridge task failed")?;
    agent.shutdown().await;
    info!(playback_frames = sink.frames(), "gateway stopped");
    Ok(())
}
