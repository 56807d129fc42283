mod catalog;
mod config;
mod gcs;
mod http;
mod links;
mod metrics;
mod models;
mod pipeline;
mod plan;
mod platform;
mod progress;

use config::ImportConfig;
use pipeline::Importer;
use platform::PlatformClient;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        error!(target = "upc_import", "import failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let config = ImportConfig::from_env()?;
    let platform = PlatformClient::from_env()?;
    info!(
        target = "upc_import",
        team_id = config.team_id,
        workspace_id = config.workspace_id,
        directory = %config.directory_path,
        "starting import"
    );

    let importer = Importer::new(platform, config);
    let summary = importer.run().await.inspect_err(|err| {
        error!(
            target = "upc_import",
            stage = err.stage(),
            kind = ?err.kind(),
            detail = err.detail(),
            "pipeline stage failed"
        );
    })?;
    info!(
        target = "upc_import",
        "{}",
        serde_json::to_string(&summary.stages).unwrap_or_default()
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
