//! store.rs
//! Almacenes de salida clave-valor, clave compuesta (GridID, Timestamp).
//!
//! - `RecordStore`: escritura por lotes con items no procesados (throttling).
//! - `MemoryStore`: mapa ordenado en memoria con consulta por GridID y por
//!   nombre; también es lo que sirve la API tras cargar un JSONL.
//! - `JsonlStore`: artefacto JSON Lines, una línea por registro.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use crate::models::types::OutputRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Escribe un lote y devuelve los items que el almacén no procesó.
    /// Un `Err` significa que no se escribió nada del lote.
    async fn batch_write(&self, items: Vec<OutputRecord>) -> Result<Vec<OutputRecord>>;
}

// -------------------------------
// En memoria
// -------------------------------
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<(String, String), OutputRecord>>,
    /// Nº de llamadas que aún devolverán parte del lote sin procesar
    throttled_calls: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Las próximas `calls` escrituras sólo procesan el primer item del lote.
    pub fn with_throttle(self, calls: usize) -> Self {
        self.throttled_calls.store(calls, Ordering::SeqCst);
        self
    }

    pub fn from_records(records: impl IntoIterator<Item = OutputRecord>) -> Self {
        let s = Self::new();
        {
            let mut m = s.items.write().unwrap_or_else(|e| e.into_inner());
            for r in records {
                m.insert(r.composite_key(), r);
            }
        }
        s
    }

    /// Carga un artefacto JSONL generado por `JsonlStore`.
    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("abriendo {}", path.display()))?;
        let mut records = Vec::new();
        for (n, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            let rec: OutputRecord = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}", path.display(), n + 1))?;
            records.push(rec);
        }
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nº de llamadas a `batch_write` recibidas.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Todos los registros de una celda, ordenados por clave secundaria.
    pub fn by_grid(&self, grid_id: &str) -> Vec<OutputRecord> {
        let m = self.items.read().unwrap_or_else(|e| e.into_inner());
        m.range((grid_id.to_string(), String::new())..)
            .take_while(|((g, _), _)| g == grid_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Índice secundario por nombre de localidad (coincidencia exacta).
    pub fn by_name(&self, name: &str) -> Vec<OutputRecord> {
        let m = self.items.read().unwrap_or_else(|e| e.into_inner());
        m.values().filter(|r| r.location_name() == name).cloned().collect()
    }

    pub fn get(&self, grid_id: &str, key: &str) -> Option<OutputRecord> {
        let m = self.items.read().unwrap_or_else(|e| e.into_inner());
        m.get(&(grid_id.to_string(), key.to_string())).cloned()
    }

    /// Claves de previsión (horarias y diarias) presentes, sin lookups.
    pub fn forecast_timestamps(&self) -> BTreeSet<String> {
        let m = self.items.read().unwrap_or_else(|e| e.into_inner());
        m.values().filter(|r| r.as_weather().is_some()).map(|r| r.key().to_string()).collect()
    }

    pub fn all(&self) -> Vec<OutputRecord> {
        let m = self.items.read().unwrap_or_else(|e| e.into_inner());
        m.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn batch_write(&self, mut items: Vec<OutputRecord>) -> Result<Vec<OutputRecord>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let throttled = self
            .throttled_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let unprocessed = if throttled && items.len() > 1 { items.split_off(1) } else { Vec::new() };

        let mut m = self.items.write().unwrap_or_else(|e| e.into_inner());
        for r in items {
            m.insert(r.composite_key(), r);
        }
        Ok(unprocessed)
    }
}

// -------------------------------
// JSON Lines
// -------------------------------
/// Escribe en `<ruta>.tmp` y sólo sustituye el artefacto al llamar a
/// `finish`; una ejecución abortada deja intacta la salida anterior.
pub struct JsonlStore {
    out: Mutex<BufWriter<File>>,
    tmp: PathBuf,
    dest: PathBuf,
}

impl JsonlStore {
    /// Crea (o trunca) el fichero temporal junto al de salida.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let dest = path.as_ref().to_path_buf();
        if let Some(dir) = dest.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut name = dest.as_os_str().to_owned();
        name.push(".tmp");
        let tmp = PathBuf::from(name);
        let f = File::create(&tmp).with_context(|| format!("creando {}", tmp.display()))?;
        Ok(Self { out: Mutex::new(BufWriter::new(f)), tmp, dest })
    }

    /// Vuelca y renombra el temporal sobre la ruta final.
    pub fn finish(self) -> Result<PathBuf> {
        let mut w = self.out.into_inner().unwrap_or_else(|e| e.into_inner());
        w.flush()?;
        drop(w);
        std::fs::rename(&self.tmp, &self.dest)
            .with_context(|| format!("renombrando {} → {}", self.tmp.display(), self.dest.display()))?;
        Ok(self.dest)
    }

    /// Descarta lo escrito; la salida anterior (si la hay) no se toca.
    pub fn discard(self) {
        drop(self.out);
        let _ = std::fs::remove_file(&self.tmp);
    }
}

#[async_trait]
impl RecordStore for JsonlStore {
    async fn batch_write(&self, items: Vec<OutputRecord>) -> Result<Vec<OutputRecord>> {
        let mut w = self.out.lock().unwrap_or_else(|e| e.into_inner());
        for r in &items {
            serde_json::to_writer(&mut *w, r)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
        Ok(Vec::new())
    }
}
