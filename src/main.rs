//! main.rs — Generación completa: CSV de ciudades → JSONL de registros (config por ENV)

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridcast::models::types::AppCfg;
use gridcast::pipeline;
use gridcast::server::fetch::OpenMeteoClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppCfg::from_env();
    info!("Entrada: {} | país: {:?} | salida: {}", cfg.input_path, cfg.country, cfg.output_path);

    let source = OpenMeteoClient::new(&cfg)?;
    let summary = pipeline::run_to_jsonl(&cfg, &source).await?;

    info!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.rate_limited {
        warn!("Ejecución incompleta por rate limit: volver a lanzar para reanudar desde el checkpoint");
    }
    Ok(())
}
