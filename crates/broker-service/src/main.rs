use anyhow::{Context, Result};
use broker_config::ConfigLoader;
use broker_core::BrokerBuilder;
use broker_providers::{InMemoryProvider, ProviderRegistry, ProviderService};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "federation-broker")]
#[command(about = "Cloud federation broker", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "BROKER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the broker
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_broker(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_broker(cli: Cli) -> Result<()> {
	info!("starting federation broker");
	info!("loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("failed to load configuration")?;

	info!(site = %config.site.member_id, "configuration loaded");

	let controller = BrokerBuilder::new()
		.with_config(config)
		.with_providers(in_memory_providers())
		.build()
		.context("failed to build broker")?;

	controller.start().await.context("failed to start broker")?;
	info!("federation broker started");

	shutdown_signal().await;

	info!("shutdown signal received, stopping broker");
	controller.shutdown();
	info!("federation broker stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("failed to load configuration")?;

	info!("configuration is valid");
	info!("  site: {}", config.site.member_id);
	info!("  scheduler period: {:?}", config.timers.scheduler_period());
	info!("  forward timeout: {}ms", config.timers.forward_timeout_ms);
	info!("  maximum peer capacity: {}", config.capacity.maximum_capacity);
	info!("  snapshot path: {}", config.storage.path);
	Ok(())
}

/// Stand-in providers for single-binary deployments; a real site replaces
/// these with its IaaS plugins through the builder.
fn in_memory_providers() -> ProviderRegistry {
	ProviderRegistry::new(
		Arc::new(ProviderService::new(Box::new(InMemoryProvider::new(20)))),
		Arc::new(ProviderService::new(Box::new(InMemoryProvider::new(50)))),
		Arc::new(ProviderService::new(Box::new(InMemoryProvider::new(50)))),
	)
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
