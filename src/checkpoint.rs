//! checkpoint.rs
//! Caché de datos reales por GridID y su volcado a disco.
//!
//! El checkpoint es el único estado que sobrevive entre ejecuciones: se lee
//! al arrancar, se sobrescribe cada K peticiones y al final de la pasada.
//! La escritura va a un fichero temporal y se renombra, así un corte a
//! mitad de volcado deja el checkpoint anterior intacto.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::forecast::ForecastPayload;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForecastCache {
    entries: BTreeMap<String, ForecastPayload>,
}

impl ForecastCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, grid_id: &str) -> bool {
        self.entries.contains_key(grid_id)
    }

    pub fn get(&self, grid_id: &str) -> Option<&ForecastPayload> {
        self.entries.get(grid_id)
    }

    pub fn insert(&mut self, grid_id: String, payload: ForecastPayload) {
        self.entries.insert(grid_id, payload);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Artefacto en disco: JSON `{ GridID: payload }`.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Caché vacía si el fichero no existe; error si existe y está corrupto.
    pub fn load(&self) -> Result<ForecastCache> {
        if !self.path.exists() {
            info!("Sin checkpoint previo en {}", self.path.display());
            return Ok(ForecastCache::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("leyendo checkpoint {}", self.path.display()))?;
        let entries: BTreeMap<String, ForecastPayload> =
            serde_json::from_str(&text).context("checkpoint corrupto")?;
        info!("Checkpoint cargado: {} anclas ya descargadas", entries.len());
        Ok(ForecastCache { entries })
    }

    pub fn save(&self, cache: &ForecastCache) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec(&cache.entries)?;
        std::fs::write(&tmp, body).with_context(|| format!("escribiendo {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renombrando a {}", self.path.display()))?;
        debug!("Checkpoint guardado ({} entradas)", cache.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forecast::fixtures::payload;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_empty_cache() {
        let dir = tempdir().unwrap();
        let cp = Checkpoint::new(dir.path().join("none.json"));
        assert!(cp.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_is_exact() {
        let dir = tempdir().unwrap();
        let cp = Checkpoint::new(dir.path().join("sub/cp.json"));
        let mut cache = ForecastCache::new();
        let mut p = payload(0.1 + 0.2, 3.0);
        p.hourly.temperature[3] = Some(-17.123456789012345);
        p.hourly.humidity[0] = None;
        p.extra.insert("timezone".into(), "Asia/Tokyo".into());
        cache.insert("GRID#1#2".into(), p);

        cp.save(&cache).unwrap();
        let back = cp.load().unwrap();
        assert_eq!(back, cache);
        assert!(!cp.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Checkpoint::new(path).load().is_err());
    }
}
