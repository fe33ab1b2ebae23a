// # switchyardd - Switchyard Daemon
//
// Thin integration layer around switchyard-core. The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Building the factory table from the compiled-in provider crates
// 3. Registering providers from a JSON configuration file
// 4. Starting everything in dependency order and supervising it
// 5. Stopping everything in reverse order on SIGTERM/SIGINT
//
// No registry, lifecycle or migration logic lives here. The file's
// `migration` section is validated for embedders sharing the same file,
// but the daemon never builds a migration engine.
//
// ## Configuration
//
// - `SWITCHYARD_CONFIG_PATH`: JSON configuration file (required)
// - `SWITCHYARD_LOG_LEVEL`: trace, debug, info, warn, error (default info)
// - `SWITCHYARD_START_TIMEOUT_SECS`: lifecycle timeout override
// - `SWITCHYARD_HEALTH_INTERVAL_SECS`: health sweep interval override
// - `SWITCHYARD_METRICS_INTERVAL_SECS`: metrics sweep interval override
// - `SWITCHYARD_AUTO_FAILOVER`: true/false, overrides the file setting
// - `SWITCHYARD_FORCE_START`: start what can be started, skip the rest
//
// SIGHUP re-reads the configuration file and applies changed settings.
//
// ## Example
//
// ```bash
// export SWITCHYARD_CONFIG_PATH=/etc/switchyard/providers.json
// export SWITCHYARD_LOG_LEVEL=debug
//
// switchyardd
// ```

use anyhow::Result;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::registry::{FactoryTable, LifecycleOptions, ProviderRegistry, Severity, Supervisor};
use switchyard_core::{FileConfigSource, MigrationConfig, ProviderEvent};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SwitchyardExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<SwitchyardExitCode> for ExitCode {
    fn from(code: SwitchyardExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
#[derive(Debug)]
struct Config {
    config_path: String,
    log_level: String,
    start_timeout_secs: Option<u64>,
    health_interval_secs: Option<u64>,
    metrics_interval_secs: Option<u64>,
    auto_failover: Option<bool>,
    force_start: bool,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = lookup("SWITCHYARD_CONFIG_PATH").ok_or_else(|| {
            anyhow::anyhow!(
                "SWITCHYARD_CONFIG_PATH is required. \
                Set it via: export SWITCHYARD_CONFIG_PATH=/etc/switchyard/providers.json"
            )
        })?;

        Ok(Self {
            config_path,
            log_level: lookup("SWITCHYARD_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            start_timeout_secs: parse_number(&lookup, "SWITCHYARD_START_TIMEOUT_SECS")?,
            health_interval_secs: parse_number(&lookup, "SWITCHYARD_HEALTH_INTERVAL_SECS")?,
            metrics_interval_secs: parse_number(&lookup, "SWITCHYARD_METRICS_INTERVAL_SECS")?,
            auto_failover: parse_flag(&lookup, "SWITCHYARD_AUTO_FAILOVER")?,
            force_start: parse_flag(&lookup, "SWITCHYARD_FORCE_START")?.unwrap_or(false),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.config_path.trim().is_empty() {
            anyhow::bail!("SWITCHYARD_CONFIG_PATH cannot be empty");
        }

        let path = std::path::Path::new(&self.config_path);
        if !path.is_file() {
            anyhow::bail!(
                "SWITCHYARD_CONFIG_PATH does not point to a file: {}",
                path.display()
            );
        }

        if let Some(timeout) = self.start_timeout_secs
            && !(1..=3600).contains(&timeout)
        {
            anyhow::bail!(
                "SWITCHYARD_START_TIMEOUT_SECS must be between 1 and 3600 seconds. Got: {}",
                timeout
            );
        }

        for (name, value) in [
            ("SWITCHYARD_HEALTH_INTERVAL_SECS", self.health_interval_secs),
            ("SWITCHYARD_METRICS_INTERVAL_SECS", self.metrics_interval_secs),
        ] {
            if let Some(interval) = value
                && !(1..=86_400).contains(&interval)
            {
                anyhow::bail!(
                    "{} must be between 1 and 86400 seconds. Got: {}",
                    name,
                    interval
                );
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "SWITCHYARD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn tracing_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn lifecycle_options(&self) -> LifecycleOptions {
        let mut options = LifecycleOptions::default();
        if let Some(secs) = self.start_timeout_secs {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        if self.force_start {
            options = options.forced();
        }
        options
    }
}

fn parse_number<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds. Got: {}", key, raw))
        })
        .transpose()
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow::anyhow!("{} must be true or false. Got: {}", key, raw)),
        })
        .transpose()
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return SwitchyardExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return SwitchyardExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.tracing_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SwitchyardExitCode::ConfigError.into();
    }

    info!("Starting switchyardd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SwitchyardExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let (registry, source) = match build_registry(&config).await {
            Ok(built) => built,
            Err(e) => {
                error!("Startup error: {}", e);
                return SwitchyardExitCode::ConfigError;
            }
        };

        if let Err(e) = run_daemon(registry, source, &config).await {
            error!("Daemon error: {}", e);
            SwitchyardExitCode::RuntimeError
        } else {
            SwitchyardExitCode::CleanShutdown
        }
    });

    result.into()
}

fn factory_table() -> FactoryTable {
    #[allow(unused_mut)]
    let mut factories = FactoryTable::new();

    #[cfg(feature = "memory")]
    {
        info!("Registering in-memory providers");
        switchyard_provider_memory::register(&mut factories);
    }

    factories
}

/// Load the configuration file and register every provider it lists
/// The daemon exposes no migration surface
fn migration_section_notice(migration: &MigrationConfig) -> String {
    format!(
        "Migration settings ignored by the daemon (history {}, step timeout {}s); they apply to embedded engines only",
        migration.history_capacity, migration.step_timeout_secs
    )
}

async fn build_registry(config: &Config) -> Result<(Arc<ProviderRegistry>, FileConfigSource)> {
    let source = FileConfigSource::load(&config.config_path).await?;
    let file_config = source.config().await;
    file_config.validate()?;

    let mut registry_config = file_config.registry.clone();
    if let Some(secs) = config.start_timeout_secs {
        registry_config.lifecycle_timeout_secs = secs;
    }
    if let Some(secs) = config.health_interval_secs {
        registry_config.health_check_interval_secs = secs;
    }
    if let Some(secs) = config.metrics_interval_secs {
        registry_config.metrics_interval_secs = secs;
    }
    if let Some(enabled) = config.auto_failover {
        registry_config.auto_failover = enabled;
    }
    registry_config.validate()?;
    info!("{}", migration_section_notice(&file_config.migration));

    let factories = factory_table();
    if factories.is_empty() {
        anyhow::bail!("No provider types compiled in. Rebuild with the `memory` feature.");
    }
    info!("Provider types available: {}", factories.provider_types().join(", "));

    let registry = Arc::new(ProviderRegistry::new(factories, registry_config));
    let report = registry.register_from_source(&source).await?;
    for failure in &report.failed {
        error!("Provider {} not registered: {}", failure.name, failure.message);
    }
    if !report.failed.is_empty() {
        anyhow::bail!("{} provider(s) failed to register", report.failed.len());
    }

    info!(
        "Configuration loaded from {}: {} provider(s)",
        source.path().display(),
        report.succeeded.len()
    );
    Ok((registry, source))
}

fn log_event(event: &ProviderEvent) {
    let error = event.error.as_deref().unwrap_or("");
    match event.severity {
        Severity::Info => info!("[{}] {} {}", event.provider_id, event.event_type, error),
        Severity::Warning => warn!("[{}] {} {}", event.provider_id, event.event_type, error),
        Severity::Error => error!("[{}] {} {}", event.provider_id, event.event_type, error),
    }
}

/// Run the daemon
async fn run_daemon(
    registry: Arc<ProviderRegistry>,
    source: FileConfigSource,
    config: &Config,
) -> Result<()> {
    let subscription = registry.subscribe_to_events(log_event);

    let report = registry
        .start_all_providers(config.lifecycle_options())
        .await?;
    info!(
        "Started {} provider(s), {} skipped, {} failed",
        report.succeeded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        warn!("Provider {} failed to start: {}", failure.name, failure.message);
    }

    let supervisor = Supervisor::spawn(Arc::clone(&registry));
    info!("Daemon initialized successfully");

    let outcome = wait_for_shutdown(&registry, &source).await;
    match &outcome {
        Ok(name) => info!("Received shutdown signal: {}", name),
        Err(e) => error!("Signal handling error: {}", e),
    }

    info!("Shutting down daemon");
    supervisor.shutdown().await;

    let stopped = registry
        .stop_all_providers(LifecycleOptions::default().forced())
        .await?;
    for failure in &stopped.failed {
        warn!("Provider {} did not stop cleanly: {}", failure.name, failure.message);
    }

    subscription.unsubscribe();
    outcome.map(|_| ())
}

/// Wait for SIGTERM or SIGINT; SIGHUP reloads the configuration file
#[cfg(unix)]
async fn wait_for_shutdown(
    registry: &ProviderRegistry,
    source: &FileConfigSource,
) -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            _ = sighup.recv() => {
                info!("SIGHUP: reloading {}", source.path().display());
                match registry.reload_from_source(source).await {
                    Ok(report) => info!(
                        "Reload applied: {} updated or added, {} failed",
                        report.succeeded.len(),
                        report.failed.len()
                    ),
                    Err(e) => warn!("Reload failed, keeping current configuration: {}", e),
                }
            }
        }
    }
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown(
    _registry: &ProviderRegistry,
    _source: &FileConfigSource,
) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
