//! grid.rs
//!
//! Rejilla regular lat/lon y deduplicado de ciudades por celda.
//!
//! Funcionalidad principal:
//! - `GridKey::from_latlon()` asigna un punto a su celda `(gx, gy)` con
//!   `gx = floor(lon / G)`, `gy = floor(lat / G)`. La misma fórmula la usa la
//!   consulta por coordenadas; si cambia aquí, las búsquedas fallan en silencio.
//! - `GridIndex::build()` elige un representante por celda (la ciudad más
//!   poblada, empate = la primera vista) y emite un lookup por ciudad.

use std::collections::HashMap;
use std::fmt;
use tracing::info;

use crate::models::types::{CellRepresentative, LookupRecord, PointRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridKey {
    pub gx: i64,
    pub gy: i64,
}

impl GridKey {
    #[inline]
    pub fn from_latlon(lat: f64, lon: f64, grid_deg: f64) -> Self {
        Self {
            gx: (lon / grid_deg).floor() as i64,
            gy: (lat / grid_deg).floor() as i64,
        }
    }

    /// Centro de la celda como (lat, lon).
    #[inline]
    pub fn center(&self, grid_deg: f64) -> (f64, f64) {
        let half = grid_deg / 2.0;
        (
            (self.gy as f64 * grid_deg) + half,
            (self.gx as f64 * grid_deg) + half,
        )
    }

    /// Inversa de `Display`: `"GRID#776#198"` → `(776, 198)`.
    pub fn parse(id: &str) -> Option<Self> {
        let mut it = id.split('#');
        if it.next()? != "GRID" { return None; }
        let gx = it.next()?.parse().ok()?;
        let gy = it.next()?.parse().ok()?;
        if it.next().is_some() { return None; }
        Some(Self { gx, gy })
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GRID#{}#{}", self.gx, self.gy)
    }
}

/// GridID canónico de un punto.
#[inline]
pub fn grid_id(lat: f64, lon: f64, grid_deg: f64) -> String {
    GridKey::from_latlon(lat, lon, grid_deg).to_string()
}

/// Resultado del indexado: celdas únicas (en orden de primera aparición) y
/// un lookup por ciudad original.
#[derive(Clone, Debug)]
pub struct GridIndex {
    pub cells: Vec<CellRepresentative>,
    pub lookups: Vec<LookupRecord>,
}

impl GridIndex {
    pub fn build(points: &[PointRecord], grid_deg: f64) -> Self {
        let mut slot: HashMap<GridKey, usize> = HashMap::new();
        let mut cells: Vec<CellRepresentative> = Vec::new();
        let mut lookups: Vec<LookupRecord> = Vec::with_capacity(points.len());

        for p in points {
            let key = GridKey::from_latlon(p.lat, p.lon, grid_deg);
            let id = key.to_string();
            let pop = p.population_or_zero();

            lookups.push(LookupRecord {
                grid_id: id.clone(),
                name: p.name.clone(),
                country: p.country.clone(),
                lat: p.lat,
                lon: p.lon,
                population: pop,
            });

            let (clat, clon) = key.center(grid_deg);
            let candidate = CellRepresentative {
                grid_id: id,
                gx: key.gx,
                gy: key.gy,
                name: p.name.clone(),
                country: p.country.clone(),
                lat: clat,
                lon: clon,
                population: pop,
                is_anchor: false,
            };

            match slot.get(&key) {
                // colisión: sólo gana si es estrictamente más poblada
                Some(&i) => {
                    if pop > cells[i].population { cells[i] = candidate; }
                }
                None => {
                    slot.insert(key, cells.len());
                    cells.push(candidate);
                }
            }
        }

        info!("{} ciudades reducidas a {} celdas únicas", points.len(), cells.len());
        Self { cells, lookups }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(name: &str, lat: f64, lon: f64, pop: Option<f64>) -> PointRecord {
        PointRecord { name: name.into(), country: "Japan".into(), lat, lon, population: pop }
    }

    #[test]
    fn tokyo_grid_id_and_center() {
        let k = GridKey::from_latlon(35.68, 139.69, 0.18);
        assert_eq!((k.gx, k.gy), (776, 198));
        assert_eq!(k.to_string(), "GRID#776#198");
        let (lat, lon) = k.center(0.18);
        assert!((lat - 35.73).abs() < 1e-9);
        assert!((lon - 139.77).abs() < 1e-9);
    }

    #[test]
    fn grid_id_is_stable_and_floor_handles_negatives() {
        assert_eq!(grid_id(35.68, 139.69, 0.18), grid_id(35.68, 139.69, 0.18));
        assert_eq!(grid_id(-0.01, -0.01, 0.18), "GRID#-1#-1");
        assert_eq!(GridKey::parse("GRID#-1#-1"), Some(GridKey { gx: -1, gy: -1 }));
        assert_eq!(GridKey::parse("GRID#1"), None);
        assert_eq!(GridKey::parse("CELL#1#2"), None);
    }

    #[test]
    fn keeps_most_populous_and_first_on_tie() {
        let points = vec![
            pt("Small", 35.68, 139.69, Some(10.0)),
            pt("Big", 35.70, 139.70, Some(1000.0)),
            pt("TieBig", 35.69, 139.71, Some(1000.0)),
            pt("NoPop", 35.69, 139.72, None),
            pt("Elsewhere", 34.69, 135.50, None),
        ];
        let idx = GridIndex::build(&points, 0.18);
        assert_eq!(idx.cells.len(), 2);
        assert_eq!(idx.lookups.len(), points.len());

        let tokyo = &idx.cells[0];
        assert_eq!(tokyo.name, "Big");
        // centro de celda, no coordenadas de la ciudad
        assert!((tokyo.lat - 35.73).abs() < 1e-9);
        for p in &points[..4] {
            assert!(tokyo.population >= p.population_or_zero());
        }
        assert_eq!(idx.cells[1].name, "Elsewhere");
        assert_eq!(idx.cells[1].population, 0.0);
    }

    #[test]
    fn lookups_keep_raw_coordinates() {
        let points = vec![pt("A", 35.68, 139.69, Some(1.0)), pt("B", 35.70, 139.70, Some(2.0))];
        let idx = GridIndex::build(&points, 0.18);
        assert_eq!(idx.lookups[0].lat, 35.68);
        assert_eq!(idx.lookups[0].grid_id, idx.lookups[1].grid_id);
        assert_eq!(idx.lookups[0].population, 1.0);
    }
}
