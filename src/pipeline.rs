//! pipeline.rs
//! Orquestador: ciudades → celdas → anclas → descarga → síntesis → subida.
//!
//! Las fases 1 y 2 no hacen E/S; la 3 es la única que llama a la fuente de
//! previsión y la 5 la única que escribe en el almacén.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::fetcher::{fetch_anchors, FetchOpts};
use crate::grid::GridIndex;
use crate::interp::{synthesize_all, AnchorIndex, SynthOpts};
use crate::models::types::{AppCfg, CellRepresentative, OutputRecord};
use crate::persist::{persist, PersistOpts};
use crate::points::load_points;
use crate::sampler::select_anchors;
use crate::server::fetch::ForecastSource;
use crate::store::{JsonlStore, RecordStore};

/// Resumen final de la ejecución.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub points: usize,
    pub skipped_rows: usize,
    pub unique_cells: usize,
    pub anchors_spatial: usize,
    pub anchors_population: usize,
    pub fetched: usize,
    pub from_checkpoint: usize,
    pub fetch_failed: usize,
    pub rate_limited: bool,
    pub valid_anchors: usize,
    pub satellites: usize,
    pub generated: usize,
    pub written: usize,
    pub skipped_duplicates: usize,
    pub failed_to_write: usize,
    pub elapsed_s: f64,
    pub records_per_s: f64,
    pub finished_utc: String,
}

pub async fn run<S, W>(cfg: &AppCfg, source: &S, store: &W) -> Result<RunSummary>
where
    S: ForecastSource + ?Sized,
    W: RecordStore + ?Sized,
{
    let start = Instant::now();
    let mut sum = RunSummary::default();

    // 1) Ciudades y celdas
    info!("FASE 1: rejilla de {}° sobre {}", cfg.grid_deg, cfg.input_path);
    let loaded = load_points(&cfg.input_path, cfg.country.as_deref())?;
    sum.points = loaded.points.len();
    sum.skipped_rows = loaded.skipped;
    let GridIndex { mut cells, lookups } = GridIndex::build(&loaded.points, cfg.grid_deg);
    sum.unique_cells = cells.len();

    // 2) Anclas
    info!("FASE 2: muestreo de anclas (f={} por pasada)", cfg.anchor_fraction);
    let mut rng = match cfg.seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    };
    let sel = select_anchors(&cells, cfg.anchor_fraction, &mut rng);
    sel.apply(&mut cells);
    sum.anchors_spatial = sel.spatial.len();
    sum.anchors_population = sel.population.len();

    // 3) Datos reales
    info!("FASE 3: descarga de previsiones reales");
    let checkpoint = Checkpoint::new(&cfg.checkpoint_path);
    let mut cache = checkpoint.load()?;
    let anchors: Vec<CellRepresentative> = cells.iter().filter(|c| c.is_anchor).cloned().collect();
    let fetch = fetch_anchors(source, &anchors, &mut cache, &checkpoint, &FetchOpts::from(cfg)).await?;
    sum.fetched = fetch.fetched;
    sum.from_checkpoint = fetch.already_cached;
    sum.fetch_failed = fetch.failed.len();
    sum.rate_limited = fetch.rate_limited;
    if fetch.rate_limited {
        warn!(
            "Descarga cortada por rate limit; checkpoint en {}. Se sigue con las anclas disponibles, relanzar más tarde para completar",
            checkpoint.path().display()
        );
    }

    // 4) Interpolación
    info!("FASE 4: datos sintéticos por vecino más cercano");
    let index = AnchorIndex::build(&cells, &cache)?;
    sum.valid_anchors = index.len();
    let synth = synthesize_all(&cells, &index, &cache, &SynthOpts::from(cfg), cfg.seed)?;
    sum.satellites = synth.satellites;

    let mut records: Vec<OutputRecord> = Vec::with_capacity(lookups.len() + synth.records.len());
    records.extend(lookups.iter().map(OutputRecord::from));
    records.extend(synth.records);
    sum.generated = records.len();

    // 5) Subida
    info!("FASE 5: escritura de {} registros", records.len());
    let rep = persist(store, records, &PersistOpts::from(cfg)).await;
    sum.written = rep.written;
    sum.skipped_duplicates = rep.skipped_duplicates;
    sum.failed_to_write = rep.failed_records;

    let elapsed = start.elapsed().as_secs_f64();
    sum.elapsed_s = elapsed;
    sum.records_per_s = rep.throughput();
    sum.finished_utc = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    info!(
        "Pipeline completo en {:.1}s: generados={} descargados={} duplicados={} fallidos_escritura={}",
        elapsed, sum.generated, sum.fetched, sum.skipped_duplicates, sum.failed_to_write
    );
    Ok(sum)
}

/// `run` sobre el artefacto JSONL de `cfg.output_path`. La salida anterior
/// sólo se sustituye si la ejecución termina bien.
pub async fn run_to_jsonl<S>(cfg: &AppCfg, source: &S) -> Result<RunSummary>
where
    S: ForecastSource + ?Sized,
{
    let store = JsonlStore::create(&cfg.output_path)?;
    let outcome = run(cfg, source, &store).await;
    match outcome {
        Ok(sum) => {
            let path = store.finish()?;
            info!("Salida escrita en {}", path.display());
            Ok(sum)
        }
        Err(e) => {
            store.discard();
            Err(e)
        }
    }
}
