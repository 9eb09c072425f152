//! Commerce pipeline service binary

use anyhow::Result;
use tracing::info;

use pipeline_service::{initialize_logging, setup_signal_handlers, Pipeline, PipelineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = PipelineConfig::load()?;
    initialize_logging(&config.logging)?;

    info!("Commerce pipeline service starting");

    let shutdown = setup_signal_handlers()?;
    let pipeline = Pipeline::new(config).await?;
    pipeline.run(shutdown).await?;

    info!("Commerce pipeline service stopped");
    Ok(())
}
