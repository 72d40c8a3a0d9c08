//! persist.rs
//!
//! Escritura por lotes al almacén sin colisiones de clave.
//!
//! 1. Los `CityLookup` pasan de la clave `METADATA` a `METADATA#<nombre>`
//!    (varias ciudades comparten GridID).
//! 2. Se descartan y cuentan las claves (GridID, clave) ya vistas en esta
//!    ejecución: un duplicado dentro de un lote haría fallar el lote entero.
//! 3. Lotes de como mucho `batch_size` items. Los items que el almacén
//!    devuelve sin procesar se reintentan con backoff exponencial; si se
//!    agotan los intentos el lote se da por perdido y se sigue con el resto.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::models::types::{AppCfg, OutputRecord, LOOKUP_KEY, MAX_BATCH_ITEMS};
use crate::store::RecordStore;

#[derive(Clone, Debug)]
pub struct PersistOpts {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl From<&AppCfg> for PersistOpts {
    fn from(cfg: &AppCfg) -> Self {
        Self {
            batch_size: cfg.batch_size,
            max_attempts: cfg.max_write_attempts,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistReport {
    pub received: usize,
    pub written: usize,
    pub skipped_duplicates: usize,
    pub failed_batches: usize,
    pub failed_records: usize,
    pub elapsed: Duration,
}

impl PersistReport {
    /// Registros escritos por segundo.
    pub fn throughput(&self) -> f64 {
        let s = self.elapsed.as_secs_f64();
        if s > 0.0 { self.written as f64 / s } else { self.written as f64 }
    }
}

/// Deja sólo alfanuméricos ASCII; el resto pasa a `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

#[inline]
pub fn lookup_key(name: &str) -> String {
    format!("{LOOKUP_KEY}#{}", sanitize_name(name))
}

/// Reescribe claves de lookup y elimina duplicados (en una sola hebra, antes
/// de despachar ningún lote). Devuelve los registros únicos y cuántos se
/// descartaron.
pub fn prepare(records: Vec<OutputRecord>) -> (Vec<OutputRecord>, usize) {
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(records.len());
    let mut out = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for mut r in records {
        if let OutputRecord::CityLookup(row) = &r {
            let key = lookup_key(&row.location_name);
            r.set_key(key);
        }
        if seen.insert(r.composite_key()) {
            out.push(r);
        } else {
            skipped += 1;
        }
    }
    (out, skipped)
}

pub async fn persist<S: RecordStore + ?Sized>(
    store: &S,
    records: Vec<OutputRecord>,
    opts: &PersistOpts,
) -> PersistReport {
    let start = Instant::now();
    let mut rep = PersistReport { received: records.len(), ..Default::default() };

    let (unique, skipped) = prepare(records);
    rep.skipped_duplicates = skipped;
    if skipped > 0 {
        warn!("{skipped} registros con clave duplicada descartados");
    }

    let size = opts.batch_size.clamp(1, MAX_BATCH_ITEMS);
    let n_batches = unique.len().div_ceil(size);
    info!("Subiendo {} registros en {} lotes de {}", unique.len(), n_batches, size);

    for (b, chunk) in unique.chunks(size).enumerate() {
        let mut pending: Vec<OutputRecord> = chunk.to_vec();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match store.batch_write(pending.clone()).await {
                Ok(left) => {
                    rep.written += pending.len() - left.len();
                    pending = left;
                }
                Err(e) => warn!("lote {b}: intento {attempt} fallido: {e:?}"),
            }
            if pending.is_empty() { break; }
            if attempt >= opts.max_attempts.max(1) {
                warn!("lote {b}: {} registros sin escribir tras {attempt} intentos", pending.len());
                rep.failed_batches += 1;
                rep.failed_records += pending.len();
                break;
            }
            let wait = opts.backoff_base.saturating_mul(1u32 << (attempt - 1).min(16));
            sleep(wait).await;
        }

        if (b + 1) % 200 == 0 {
            info!("   {}/{} lotes", b + 1, n_batches);
        }
    }

    rep.elapsed = start.elapsed();
    info!(
        "Subida completa: {} escritos, {} duplicados, {} fallidos ({:.0} reg/s)",
        rep.written,
        rep.skipped_duplicates,
        rep.failed_records,
        rep.throughput()
    );
    rep
}
