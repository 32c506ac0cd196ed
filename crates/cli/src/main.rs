use clap::{Parser, Subcommand};
use larkrelay_core::audit::AUDIT_TARGET;
use larkrelay_core::config::AppConfig;
use larkrelay_server::gateway::Gateway;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod verify;

#[derive(Parser)]
#[command(name = "larkrelay")]
#[command(version)]
#[command(about = "Feishu/Lark bot webhook relay to DashScope Qwen")]
struct Cli {
    /// Config file layered under the environment
    #[arg(short, long, global = true, env = "LARKRELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server (default)
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
        /// Write logs and the audit trail to daily files in this directory
        #[arg(long, env = "LARKRELAY_LOG_DIR")]
        log_dir: Option<PathBuf>,
    },
    /// Check Feishu and DashScope credentials against the live APIs
    Check,
    /// Print the effective configuration with secrets masked
    Status,
}

fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
            .init();
        return None;
    };

    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "audit.jsonl"));

    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(false)
        .with_file(false)
        .with_line_number(false)
        .without_time() // timestamp is in the JSON line
        .with_filter(
            tracing_subscriber::filter::Targets::new().with_target(AUDIT_TARGET, Level::INFO),
        );

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(env_filter())
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() != AUDIT_TARGET
        }));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(audit_layer)
        .init();

    Some(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve {
        port: None,
        log_dir: None,
    });

    let log_dir = match &command {
        Commands::Serve { log_dir, .. } => log_dir.clone(),
        _ => None,
    };
    let _guard = init_tracing(log_dir.as_ref());

    let config = AppConfig::load(cli.config.clone())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    match command {
        Commands::Status => {
            run_status(&config, cli.config.as_ref())?;
            Ok(())
        }
        Commands::Check => run_check(&config).await,
        Commands::Serve { port, .. } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            run_serve(config).await
        }
    }
}

async fn run_serve(config: AppConfig) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("{}. Set them in the environment or a config file.", e))?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        model = %config.dashscope.model,
        app_id = %config.feishu.app_id,
        "starting larkrelay"
    );

    let gateway = Gateway::from_config(&config);
    if let Err(e) = gateway.start().await {
        error!(error = %e, "gateway exited with error");
        return Err(e);
    }
    Ok(())
}

async fn run_check(config: &AppConfig) -> anyhow::Result<()> {
    println!("larkrelay credential check\n");

    let mut failures = 0;
    for result in [
        verify::verify_feishu(&config.feishu).await,
        verify::verify_dashscope(&config.dashscope).await,
    ] {
        match result {
            Ok(msg) => println!("{}", msg),
            Err(e) => {
                failures += 1;
                println!("{}", e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} check(s) failed", failures);
    }
    Ok(())
}

fn run_status(config: &AppConfig, path: Option<&PathBuf>) -> anyhow::Result<()> {
    println!("larkrelay status\n");

    match path {
        Some(p) => println!("Config file: {} ✓", p.display()),
        None => println!("Config file: none (defaults + environment)"),
    }

    match config.validate() {
        Ok(()) => println!("Credentials: ✓"),
        Err(e) => println!("Credentials: ✗ {}", e),
    }

    println!("\n{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}
