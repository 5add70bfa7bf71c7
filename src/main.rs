use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobmill::{
    AsyncBackgroundProcess, BackgroundJob, CorePerformer, FilterCollection, FilteredPerformer,
    Job, JobCancellation, JobFilter, JobPerformer, JobRegistry, JobStorage, NoopStorage,
    PerformContext, PerformFilter, PerformedContext, PerformingContext, ProcessContext,
    ProcessHandle, ProcessingServer, ServerSettings,
};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML configuration file with a [server] table.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Interval of the demo ticker process, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub tick_millis: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: ServerSettings,
}

/// Demo process that logs a line on a fixed interval until the server
/// begins stopping.
struct TickerProcess {
    interval: Duration,
}

#[async_trait]
impl AsyncBackgroundProcess for TickerProcess {
    fn name(&self) -> &'static str {
        "ticker"
    }

    async fn execute(&self, ctx: &ProcessContext) -> Result<()> {
        while ctx.wait(self.interval).await {
            info!("Server {} is alive", ctx.server_id);
        }
        Ok(())
    }
}

/// Logs before and after each job performance.
struct LoggingFilter;

impl PerformFilter for LoggingFilter {
    fn before_perform(&self, ctx: &mut PerformingContext) -> Result<()> {
        info!("About to perform job {}", ctx.perform.background_job.id);
        Ok(())
    }

    fn after_perform(&self, ctx: &mut PerformedContext) -> Result<()> {
        info!(
            "Performed job {} -> {:?}",
            ctx.perform.background_job.id, ctx.result
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let cli_args = CliArgs::parse();

    let settings = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            let raw = std::fs::read_to_string(path)?;
            toml::from_str::<FileConfig>(&raw)?.server
        }
        None => ServerSettings::default(),
    };

    let storage: Arc<dyn JobStorage> = Arc::new(NoopStorage);

    // Run one job through the filtered pipeline so the demo exercises both
    // halves of the crate.
    let mut registry = JobRegistry::new();
    registry.register("greet", |ctx| async move {
        info!("Greetings from job {}", ctx.background_job.id);
        Ok(Some(serde_json::json!("hello")))
    })?;

    let mut filters = FilterCollection::new();
    filters.add(JobFilter::perform(Arc::new(LoggingFilter)));

    let performer = FilteredPerformer::new(
        Arc::new(filters),
        Arc::new(CorePerformer::new(registry)),
    );
    let job = BackgroundJob::new("demo-1", Job::new("Demo", "greet", vec![]));
    let ctx = PerformContext::new(job, storage.connect()?, JobCancellation::detached());
    let result = performer.perform(&ctx).await?;
    info!("Pipeline returned {:?}", result);

    let server = ProcessingServer::new(
        vec![ProcessHandle::Async(Arc::new(TickerProcess {
            interval: Duration::from_millis(cli_args.tick_millis),
        }))],
        storage,
        HashMap::new(),
        settings,
    )?;
    info!("Server {} running, press Ctrl+C to stop", server.server_id());

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, initiating graceful shutdown");

    let stopped = server.shutdown().await?;
    info!("Server stopped cleanly: {}", stopped);
    server.dispose().await;

    Ok(())
}
