//! interp.rs
//!
//! Interpolación por vecino más cercano y síntesis de la serie completa.
//!
//! - `AnchorIndex` construye un `RTree` sobre las anclas válidas (las que
//!   tienen payload en la caché), con coordenadas (lat, lon) del centro.
//! - Una celda que es su propia ancla más cercana emite la serie real tal cual.
//! - Una celda satélite copia la serie de su ancla más cercana y suma a
//!   temperatura y viento un ruido `N(0, σ) + d · gain · U(-1, 1)`, uno por
//!   celda. Viento con suelo en 0.
//!
//! Las celdas son independientes entre sí; `synthesize_all` las reparte con
//! rayon y da a cada una su propio stream ChaCha derivado de la semilla.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use tracing::{debug, info};

use crate::checkpoint::ForecastCache;
use crate::error::PipelineError;
use crate::models::forecast::ForecastPayload;
use crate::models::types::{AppCfg, CellRepresentative, OutputRecord, WeatherRow};

type AnchorPoint = GeomWithData<[f64; 2], usize>;

// -------------------------------
// Índice espacial de anclas
// -------------------------------
pub struct AnchorIndex {
    tree: RTree<AnchorPoint>,
    ids: Vec<String>,
}

impl AnchorIndex {
    /// Anclas válidas = celdas cuyo GridID está en la caché.
    pub fn build(cells: &[CellRepresentative], cache: &ForecastCache) -> Result<Self, PipelineError> {
        let mut ids = Vec::new();
        let mut items = Vec::new();
        for c in cells.iter().filter(|c| cache.contains(&c.grid_id)) {
            items.push(AnchorPoint::new([c.lat, c.lon], ids.len()));
            ids.push(c.grid_id.clone());
        }
        if ids.is_empty() {
            return Err(PipelineError::NoValidAnchors);
        }
        info!("Índice espacial con {} anclas válidas", ids.len());
        Ok(Self { tree: RTree::bulk_load(items), ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ancla más cercana (distancia euclídea en grados). Empates: la de
    /// menor índice de construcción.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<(&str, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (p, d2) in self.tree.nearest_neighbor_iter_with_distance_2(&[lat, lon]) {
            match best {
                Some((_, bd2)) if d2 > bd2 => break,
                Some((bi, _)) if p.data >= bi => {}
                _ => best = Some((p.data, d2)),
            }
        }
        best.map(|(i, d2)| (self.ids[i].as_str(), d2.sqrt()))
    }
}

// -------------------------------
// Síntesis
// -------------------------------
#[derive(Clone, Debug)]
pub struct SynthOpts {
    pub hours: usize,
    pub days: usize,
    pub noise_sigma: f64,
    pub distance_gain: f64,
}

impl From<&AppCfg> for SynthOpts {
    fn from(cfg: &AppCfg) -> Self {
        Self {
            hours: cfg.hours,
            days: cfg.days,
            noise_sigma: cfg.noise_sigma,
            distance_gain: cfg.distance_gain,
        }
    }
}

/// Resultado por celda.
#[derive(Clone, Debug)]
pub struct CellSynthesis {
    pub records: Vec<OutputRecord>,
    pub is_anchor: bool,
    pub source_grid: String,
    pub distance: f64,
    pub noise: f64,
}

#[derive(Clone, Debug, Default)]
pub struct Synthesis {
    pub records: Vec<OutputRecord>,
    pub anchors: usize,
    pub satellites: usize,
}

#[inline]
fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn daily_timestamp(day: &str) -> String {
    match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(d) => d.format("%Y-%m-%dT12:00:00").to_string(),
        Err(_) => format!("{day}T12:00:00"),
    }
}

fn noise_dist(opts: &SynthOpts) -> Result<Normal<f64>> {
    Normal::new(0.0, opts.noise_sigma).map_err(|e| anyhow!("sigma de ruido inválida ({}): {e}", opts.noise_sigma))
}

/// Serie para una celda a partir de su ancla más cercana.
pub fn synthesize_cell<R: Rng + ?Sized>(
    cell: &CellRepresentative,
    index: &AnchorIndex,
    cache: &ForecastCache,
    opts: &SynthOpts,
    normal: &Normal<f64>,
    rng: &mut R,
) -> Result<CellSynthesis> {
    let (source_id, distance) = index
        .nearest(cell.lat, cell.lon)
        .ok_or(PipelineError::NoValidAnchors)?;
    let src = cache
        .get(source_id)
        .ok_or_else(|| anyhow!("ancla {source_id} indexada pero ausente en la caché"))?;

    let is_anchor = source_id == cell.grid_id;
    let noise = if is_anchor {
        0.0
    } else {
        normal.sample(rng) + distance * opts.distance_gain * rng.gen_range(-1.0..1.0)
    };

    let records = emit_records(cell, src, is_anchor, noise, opts);
    Ok(CellSynthesis { records, is_anchor, source_grid: source_id.to_string(), distance, noise })
}

fn emit_records(
    cell: &CellRepresentative,
    src: &ForecastPayload,
    is_anchor: bool,
    noise: f64,
    opts: &SynthOpts,
) -> Vec<OutputRecord> {
    // anclas: valor real sin tocar; satélites: ruido + redondeo a 1 decimal
    let temp = |v: Option<f64>| if is_anchor { v } else { v.map(|t| round1(t + noise)) };
    let wind = |v: Option<f64>| if is_anchor { v } else { v.map(|w| round1((w + noise).max(0.0))) };
    let row = |timestamp: String| WeatherRow {
        grid_id: cell.grid_id.clone(),
        timestamp,
        location_name: cell.name.clone(),
        country: cell.country.clone(),
        lat: cell.lat,
        lon: cell.lon,
        is_anchor,
        temperature: None,
        humidity: None,
        chance_of_rain: None,
        precipitation: None,
        wind_speed: None,
    };

    let h = &src.hourly;
    let d = &src.daily;
    let hours = opts.hours.min(h.aligned_len());
    let days = opts.days.min(d.aligned_len().saturating_sub(1));
    let mut out = Vec::with_capacity(hours + days);

    for i in 0..hours {
        out.push(OutputRecord::Hourly(WeatherRow {
            temperature: temp(h.temperature[i]),
            humidity: h.humidity[i],
            chance_of_rain: h.precipitation_probability[i],
            precipitation: h.precipitation[i],
            wind_speed: wind(h.wind_speed[i]),
            ..row(h.time[i].clone())
        }));
    }
    // día 0 = hoy, ya cubierto por la serie horaria
    for i in 1..=days {
        out.push(OutputRecord::Daily(WeatherRow {
            temperature: temp(d.temperature_max[i]),
            chance_of_rain: d.precipitation_probability_max[i],
            precipitation: d.precipitation_sum[i],
            wind_speed: wind(d.wind_speed_max[i]),
            ..row(daily_timestamp(&d.time[i]))
        }));
    }
    out
}

/// Sintetiza todas las celdas en paralelo. Con `seed` fijo la salida no
/// depende del reparto entre hilos.
pub fn synthesize_all(
    cells: &[CellRepresentative],
    index: &AnchorIndex,
    cache: &ForecastCache,
    opts: &SynthOpts,
    seed: Option<u64>,
) -> Result<Synthesis> {
    let normal = noise_dist(opts)?;
    let base = seed.unwrap_or_else(rand::random);

    let per_cell: Vec<CellSynthesis> = cells
        .par_iter()
        .enumerate()
        .map(|(i, cell)| {
            let mut rng = ChaCha8Rng::seed_from_u64(base);
            rng.set_stream(i as u64);
            synthesize_cell(cell, index, cache, opts, &normal, &mut rng)
        })
        .collect::<Result<_>>()?;

    let mut out = Synthesis::default();
    let mut max_distance: f64 = 0.0;
    for (cell, c) in cells.iter().zip(per_cell) {
        if c.is_anchor {
            out.anchors += 1;
        } else {
            out.satellites += 1;
            max_distance = max_distance.max(c.distance);
            debug!("{} ← {} (d={:.3}°, ruido={:+.2})", cell.grid_id, c.source_grid, c.distance, c.noise);
        }
        out.records.extend(c.records);
    }
    info!(
        "Síntesis: {} celdas reales, {} satélites, {} registros (distancia máx. a ancla {:.2}°)",
        out.anchors,
        out.satellites,
        out.records.len(),
        max_distance
    );
    Ok(out)
}
