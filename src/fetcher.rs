//! fetcher.rs
//!
//! Descarga de datos reales para las anclas con checkpoint y reanudación.
//!
//! - Las anclas ya presentes en la caché no se vuelven a pedir.
//! - HTTP 429 corta el bucle: se guarda la caché y se avisa al operador.
//! - Cualquier otro fallo se registra y el ancla queda fuera de la caché.
//! - La caché se vuelca cada `checkpoint_every` peticiones y siempre al final.

use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, ForecastCache};
use crate::error::FetchError;
use crate::models::types::{AppCfg, CellRepresentative};
use crate::server::fetch::ForecastSource;

#[derive(Clone, Debug)]
pub struct FetchOpts {
    /// Pausa entre peticiones
    pub delay: Duration,
    pub checkpoint_every: usize,
    pub hours: usize,
    pub days: usize,
}

impl From<&AppCfg> for FetchOpts {
    fn from(cfg: &AppCfg) -> Self {
        Self {
            delay: Duration::from_millis(cfg.request_delay_ms),
            checkpoint_every: cfg.checkpoint_every.max(1),
            hours: cfg.hours,
            days: cfg.days,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchReport {
    pub anchors: usize,
    /// Anclas que ya venían del checkpoint
    pub already_cached: usize,
    pub requested: usize,
    pub fetched: usize,
    /// (GridID, error) de las anclas que fallaron; el 429 va en `rate_limited`
    pub failed: Vec<(String, FetchError)>,
    pub rate_limited: bool,
}

pub async fn fetch_anchors<S: ForecastSource + ?Sized>(
    source: &S,
    anchors: &[CellRepresentative],
    cache: &mut ForecastCache,
    checkpoint: &Checkpoint,
    opts: &FetchOpts,
) -> Result<FetchReport> {
    let mut rep = FetchReport { anchors: anchors.len(), ..Default::default() };
    let every = opts.checkpoint_every.max(1);
    info!("Descargando datos reales para {} anclas", anchors.len());

    for (i, cell) in anchors.iter().enumerate() {
        if cache.contains(&cell.grid_id) {
            rep.already_cached += 1;
            continue;
        }
        if rep.requested > 0 && !opts.delay.is_zero() {
            sleep(opts.delay).await;
        }

        info!("[{}/{}] {} ({})", i + 1, anchors.len(), cell.name, cell.grid_id);
        rep.requested += 1;
        let outcome = source
            .forecast(cell.lat, cell.lon)
            .await
            .and_then(|p| {
                p.check_usable(opts.hours, opts.days).map_err(FetchError::Payload)?;
                Ok(p)
            });

        match outcome {
            Ok(p) => {
                cache.insert(cell.grid_id.clone(), p);
                rep.fetched += 1;
            }
            Err(FetchError::RateLimited) => {
                warn!("Rate limit (429) tras {} peticiones: se detiene la descarga, reanudar más tarde", rep.requested);
                rep.rate_limited = true;
                break;
            }
            Err(e) => {
                warn!("{}: {e}", cell.grid_id);
                rep.failed.push((cell.grid_id.clone(), e));
            }
        }

        if rep.requested % every == 0 {
            checkpoint.save(cache)?;
        }
    }

    checkpoint.save(cache)?;
    info!(
        "Descarga terminada: {} nuevas, {} desde checkpoint, {} fallidas{}",
        rep.fetched,
        rep.already_cached,
        rep.failed.len(),
        if rep.rate_limited { " (cortada por rate limit)" } else { "" }
    );
    Ok(rep)
}
