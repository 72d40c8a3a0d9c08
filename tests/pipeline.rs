//! Pipeline completo contra una fuente falsa y el almacén en memoria.

use async_trait::async_trait;
use serde_json::Map;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

use gridcast::checkpoint::Checkpoint;
use gridcast::error::{FetchError, PipelineError};
use gridcast::grid::grid_id;
use gridcast::models::forecast::{DailySeries, ForecastPayload, HourlySeries};
use gridcast::models::types::{AppCfg, OutputRecord};
use gridcast::pipeline::{run, run_to_jsonl};
use gridcast::server::fetch::ForecastSource;
use gridcast::store::MemoryStore;

/// 20x20 celdas distintas + 2 ciudades extra en la primera celda, una fila de
/// otro país y una fila con latitud inválida.
fn write_cities(path: &Path) {
    let mut csv = String::from("city,city_ascii,lat,lng,country,population\n");
    for i in 0..400 {
        let lat = 30.05 + (i / 20) as f64 * 0.18;
        let lon = 130.05 + (i % 20) as f64 * 0.18;
        writeln!(csv, "C{i},City{i},{lat:.4},{lon:.4},Japan,{}", 1000 + (i * 37) % 997).unwrap();
    }
    writeln!(csv, "S1,Suburb One,30.055,130.06,Japan,10").unwrap();
    writeln!(csv, "S2,Suburb Two,30.058,130.07,Japan,").unwrap();
    writeln!(csv, "P,Paris,48.85,2.35,France,11000000").unwrap();
    writeln!(csv, "B,Broken,abc,130.0,Japan,5").unwrap();
    std::fs::write(path, csv).unwrap();
}

fn payload(lat: f64, lon: f64) -> ForecastPayload {
    let (h, d) = (48, 7);
    let t = (lat - 30.0) + (lon - 130.0) / 10.0;
    ForecastPayload {
        hourly: HourlySeries {
            time: (0..h).map(|i| format!("2025-03-{:02}T{:02}:00", 1 + i / 24, i % 24)).collect(),
            temperature: (0..h).map(|i| Some(t + i as f64 * 0.1)).collect(),
            humidity: vec![Some(55.0); h],
            precipitation_probability: vec![Some(10.0); h],
            precipitation: vec![Some(0.0); h],
            wind_speed: vec![Some(0.2); h],
        },
        daily: DailySeries {
            time: (0..d).map(|i| format!("2025-03-{:02}", 1 + i)).collect(),
            temperature_max: vec![Some(t + 5.0); d],
            precipitation_sum: vec![Some(0.0); d],
            precipitation_probability_max: vec![Some(30.0); d],
            wind_speed_max: vec![Some(0.4); d],
        },
        extra: Map::new(),
    }
}

/// Responde con datos deterministas; tras `limit` llamadas devuelve 429.
struct FakeSource {
    calls: AtomicUsize,
    limit: Option<usize>,
    fail_all: bool,
}

impl FakeSource {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0), limit: None, fail_all: false }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastSource for FakeSource {
    async fn forecast(&self, lat: f64, lon: f64) -> Result<ForecastPayload, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(FetchError::Status(503));
        }
        if self.limit.is_some_and(|l| n >= l) {
            return Err(FetchError::RateLimited);
        }
        Ok(payload(lat, lon))
    }
}

fn test_cfg(dir: &Path) -> AppCfg {
    AppCfg {
        input_path: dir.join("cities.csv").display().to_string(),
        checkpoint_path: dir.join("state/checkpoint.json").display().to_string(),
        output_path: dir.join("out/records.jsonl").display().to_string(),
        seed: Some(7),
        request_delay_ms: 0,
        backoff_base_ms: 0,
        checkpoint_every: 5,
        ..AppCfg::default()
    }
}

#[tokio::test]
async fn full_run_covers_every_cell_once() {
    let dir = tempdir().unwrap();
    write_cities(&dir.path().join("cities.csv"));
    let cfg = test_cfg(dir.path());
    let source = FakeSource::new();
    let store = MemoryStore::new();

    let sum = run(&cfg, &source, &store).await.unwrap();

    assert_eq!(sum.points, 402);
    assert_eq!(sum.skipped_rows, 1);
    assert_eq!(sum.unique_cells, 400);
    assert_eq!(sum.anchors_spatial, 20);
    assert_eq!(sum.anchors_population, 20);
    assert_eq!(sum.fetched, 40);
    assert_eq!(source.calls(), 40);
    assert_eq!(sum.valid_anchors, 40);
    assert_eq!(sum.satellites, 360);
    assert!(!sum.rate_limited);

    // 402 lookups + 400 celdas x (24 horas + 6 días)
    assert_eq!(sum.generated, 402 + 400 * 30);
    assert_eq!(sum.skipped_duplicates, 0);
    assert_eq!(sum.written, sum.generated);
    assert_eq!(store.len(), sum.generated);

    let all = store.all();
    let keys: HashSet<_> = all.iter().map(|r| r.composite_key()).collect();
    assert_eq!(keys.len(), all.len());

    let mut real_cells = HashSet::new();
    for r in &all {
        if let Some(w) = r.as_weather() {
            assert!(w.wind_speed.unwrap_or(0.0) >= 0.0);
            if w.is_anchor {
                real_cells.insert(w.grid_id.clone());
            }
        }
    }
    assert_eq!(real_cells.len(), 40);

    // City0 y los dos suburbios comparten celda (722, 166): tres lookups, una previsión
    assert_eq!(grid_id(30.058, 130.07, cfg.grid_deg), "GRID#722#166");
    let shared = store.by_grid(&grid_id(30.05, 130.05, cfg.grid_deg));
    let lookups = shared.iter().filter(|r| matches!(r, OutputRecord::CityLookup(_))).count();
    assert_eq!(lookups, 3);
    assert_eq!(shared.len(), 3 + 30);
    assert_eq!(store.by_name("Suburb Two").len(), 1);
}

#[tokio::test]
async fn interrupted_run_resumes_from_checkpoint() {
    let dir = tempdir().unwrap();
    write_cities(&dir.path().join("cities.csv"));
    let cfg = test_cfg(dir.path());

    // 1ª ejecución: 429 a partir de la llamada 15
    let limited = FakeSource { limit: Some(15), ..FakeSource::new() };
    let sum = run(&cfg, &limited, &MemoryStore::new()).await.unwrap();
    assert!(sum.rate_limited);
    assert_eq!(sum.fetch_failed, 0);
    assert_eq!(sum.fetched, 15);
    assert_eq!(sum.valid_anchors, 15);
    assert_eq!(Checkpoint::new(&cfg.checkpoint_path).load().unwrap().len(), 15);

    // 2ª ejecución: sólo se piden las que faltan
    let source = FakeSource::new();
    let resumed = MemoryStore::new();
    let sum = run(&cfg, &source, &resumed).await.unwrap();
    assert!(!sum.rate_limited);
    assert_eq!(sum.from_checkpoint, 15);
    assert_eq!(source.calls(), 25);
    assert_eq!(sum.valid_anchors, 40);

    // Igual que una ejecución sin cortes
    let clean_dir = tempdir().unwrap();
    write_cities(&clean_dir.path().join("cities.csv"));
    let clean_cfg = test_cfg(clean_dir.path());
    let clean = MemoryStore::new();
    run(&clean_cfg, &FakeSource::new(), &clean).await.unwrap();

    assert_eq!(
        Checkpoint::new(&cfg.checkpoint_path).load().unwrap(),
        Checkpoint::new(&clean_cfg.checkpoint_path).load().unwrap()
    );
    assert_eq!(resumed.all(), clean.all());
}

#[tokio::test]
async fn missing_input_aborts_before_any_request() {
    let dir = tempdir().unwrap();
    let cfg = test_cfg(dir.path());
    let source = FakeSource::new();
    let store = MemoryStore::new();

    let err = run(&cfg, &source, &store).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InputMissing(_))));
    assert_eq!(source.calls(), 0);
    assert!(store.is_empty());
    assert!(!Path::new(&cfg.checkpoint_path).exists());
}

#[tokio::test]
async fn no_valid_anchors_is_fatal() {
    let dir = tempdir().unwrap();
    write_cities(&dir.path().join("cities.csv"));
    let cfg = test_cfg(dir.path());
    let source = FakeSource { fail_all: true, ..FakeSource::new() };
    let store = MemoryStore::new();

    let err = run(&cfg, &source, &store).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::NoValidAnchors)));
    assert_eq!(source.calls(), 40);
    assert!(store.is_empty());
}

fn seed_previous_output(cfg: &AppCfg) {
    let out = Path::new(&cfg.output_path);
    std::fs::create_dir_all(out.parent().unwrap()).unwrap();
    std::fs::write(out, "{\"previous\":\"good run\"}\n").unwrap();
}

#[tokio::test]
async fn aborted_runs_keep_previous_output() {
    let dir = tempdir().unwrap();
    let cfg = test_cfg(dir.path());
    seed_previous_output(&cfg);

    // sin CSV de entrada
    let err = run_to_jsonl(&cfg, &FakeSource::new()).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InputMissing(_))));
    assert_eq!(std::fs::read_to_string(&cfg.output_path).unwrap(), "{\"previous\":\"good run\"}\n");

    // sin anclas válidas
    write_cities(&dir.path().join("cities.csv"));
    let failing = FakeSource { fail_all: true, ..FakeSource::new() };
    assert!(run_to_jsonl(&cfg, &failing).await.is_err());
    assert_eq!(std::fs::read_to_string(&cfg.output_path).unwrap(), "{\"previous\":\"good run\"}\n");
    assert!(!Path::new(&format!("{}.tmp", cfg.output_path)).exists());
}

#[tokio::test]
async fn successful_run_replaces_output() {
    let dir = tempdir().unwrap();
    write_cities(&dir.path().join("cities.csv"));
    let cfg = test_cfg(dir.path());
    seed_previous_output(&cfg);

    let sum = run_to_jsonl(&cfg, &FakeSource::new()).await.unwrap();
    let loaded = MemoryStore::load_jsonl(&cfg.output_path).unwrap();
    assert_eq!(loaded.len(), sum.written);
    assert!(!Path::new(&format!("{}.tmp", cfg.output_path)).exists());
}
