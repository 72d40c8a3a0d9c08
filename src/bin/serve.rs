//! serve.rs — API de consulta sobre el JSONL generado por `gridcast`

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gridcast::models::types::AppCfg;
use gridcast::server::api::{router, ApiState};
use gridcast::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppCfg::from_env();
    info!("Cargando registros: {}", cfg.output_path);
    let store = MemoryStore::load_jsonl(&cfg.output_path)?;
    info!("{} registros en memoria", store.len());

    let app = router(ApiState {
        store: Arc::new(store),
        grid_deg: cfg.grid_deg,
        policy: cfg.disambiguation.clone(),
    });
    info!("Escuchando en http://{}", cfg.bind);
    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    let serve = axum::serve(listener, app);
    tokio::select! {
        r = serve => { r?; },
        _ = signal::ctrl_c() => { info!("Señal de salida recibida"); }
    }
    Ok(())
}
