//! query.rs
//! Superficie de consulta sobre el almacén generado.
//!
//! - Por coordenadas: misma fórmula `(gx, gy)` que la generación.
//! - Por nombre: candidatos `CityLookup` ordenados por población.
//! - Por recuadro: el registro de un instante para cada celda del recuadro.
//! - Desambiguación con política explícita (`DisambiguationPolicy`) en vez
//!   de caer en silencio en la primera opción.

use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

use crate::grid::{grid_id, GridKey};
use crate::models::types::{CityLookupRow, OutputRecord, WeatherRow};
use crate::store::MemoryStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisambiguationPolicy {
    /// Elección válida si la hay; si no, el candidato más poblado.
    MostPopulous,
    /// Sin elección válida no se resuelve.
    RequireChoice,
    /// Restringe a un país y toma el más poblado de ese país.
    Country(String),
}

impl FromStr for DisambiguationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "most-populous" => Ok(Self::MostPopulous),
            "require-choice" => Ok(Self::RequireChoice),
            other => match other.strip_prefix("country:") {
                Some(c) if !c.is_empty() => Ok(Self::Country(c.to_string())),
                _ => Err(format!("política de desambiguación desconocida: {other}")),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "candidates", rename_all = "snake_case")]
pub enum NameResolution {
    NotFound,
    Resolved(CityLookupRow),
    Ambiguous(Vec<CityLookupRow>),
}

/// GridID para unas coordenadas crudas.
#[inline]
pub fn resolve_coords(lat: f64, lon: f64, grid_deg: f64) -> String {
    grid_id(lat, lon, grid_deg)
}

/// Candidatos para un nombre (sensible a mayúsculas), más poblado primero.
pub fn search_by_name(store: &MemoryStore, name: &str) -> Vec<CityLookupRow> {
    let mut v: Vec<CityLookupRow> = store
        .by_name(name)
        .into_iter()
        .filter_map(|r| match r {
            OutputRecord::CityLookup(c) => Some(c),
            _ => None,
        })
        .collect();
    v.sort_by(|a, b| b.population.total_cmp(&a.population));
    v
}

/// `choice` es 1-based, como se muestra al usuario.
pub fn disambiguate(
    mut candidates: Vec<CityLookupRow>,
    policy: &DisambiguationPolicy,
    choice: Option<usize>,
) -> NameResolution {
    if candidates.is_empty() {
        return NameResolution::NotFound;
    }
    if candidates.len() == 1 {
        return NameResolution::Resolved(candidates.swap_remove(0));
    }
    let picked = choice.filter(|&c| c >= 1 && c <= candidates.len()).map(|c| c - 1);
    match policy {
        DisambiguationPolicy::MostPopulous => {
            let i = picked.unwrap_or(0);
            NameResolution::Resolved(candidates[i].clone())
        }
        DisambiguationPolicy::RequireChoice => match picked {
            Some(i) => NameResolution::Resolved(candidates[i].clone()),
            None => NameResolution::Ambiguous(candidates),
        },
        DisambiguationPolicy::Country(country) => {
            if let Some(i) = picked {
                return NameResolution::Resolved(candidates[i].clone());
            }
            match candidates.iter().find(|c| &c.country == country) {
                Some(c) => NameResolution::Resolved(c.clone()),
                None => NameResolution::Ambiguous(candidates),
            }
        }
    }
}

/// Informe de una celda: contexto (ciudades) + previsión.
#[derive(Clone, Debug, Serialize)]
pub struct GridReport {
    pub grid_id: String,
    pub location_name: Option<String>,
    pub country: Option<String>,
    /// `true` si la celda tiene dato real, `false` si es interpolada
    pub is_real: bool,
    pub cities: Vec<CityLookupRow>,
    pub hourly: Vec<WeatherRow>,
    pub daily: Vec<WeatherRow>,
}

pub fn grid_report(store: &MemoryStore, grid_id: &str) -> Option<GridReport> {
    let items = store.by_grid(grid_id);
    if items.is_empty() {
        return None;
    }
    let mut cities = Vec::new();
    let mut hourly = Vec::new();
    let mut daily = Vec::new();
    for r in items {
        match r {
            OutputRecord::CityLookup(c) => cities.push(c),
            OutputRecord::Hourly(w) => hourly.push(w),
            OutputRecord::Daily(w) => daily.push(w),
        }
    }
    cities.sort_by(|a, b| b.population.total_cmp(&a.population));
    hourly.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    daily.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let reference = hourly.first().or(daily.first());
    Some(GridReport {
        grid_id: grid_id.to_string(),
        location_name: reference.map(|w| w.location_name.clone()),
        country: reference.map(|w| w.country.clone()),
        is_real: reference.map(|w| w.is_anchor).unwrap_or(false),
        cities,
        hourly,
        daily,
    })
}

/// Tope de celdas por consulta de recuadro.
pub const MAX_BBOX_CELLS: i64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum BBoxError {
    #[error("recuadro inválido (mínimos mayores que máximos o fuera de rango)")]
    Invalid,
    #[error("recuadro demasiado grande: {0} celdas (máx. {MAX_BBOX_CELLS})")]
    TooLarge(i64),
}

/// Instantes con previsión en el almacén, ordenados.
pub fn available_timestamps(store: &MemoryStore) -> Vec<String> {
    store.forecast_timestamps().into_iter().collect()
}

/// Registro de `timestamp` para cada celda con datos dentro del recuadro.
/// Las celdas se recorren con la misma fórmula `(gx, gy)` que la generación.
pub fn weather_in_bbox(
    store: &MemoryStore,
    timestamp: &str,
    bbox: &BBox,
    grid_deg: f64,
) -> Result<Vec<WeatherRow>, BBoxError> {
    let in_range = (-90.0..=90.0).contains(&bbox.min_lat)
        && (-90.0..=90.0).contains(&bbox.max_lat)
        && (-180.0..=180.0).contains(&bbox.min_lon)
        && (-180.0..=180.0).contains(&bbox.max_lon);
    if !in_range || bbox.min_lat > bbox.max_lat || bbox.min_lon > bbox.max_lon {
        return Err(BBoxError::Invalid);
    }
    let lo = GridKey::from_latlon(bbox.min_lat, bbox.min_lon, grid_deg);
    let hi = GridKey::from_latlon(bbox.max_lat, bbox.max_lon, grid_deg);
    let cells = (hi.gx - lo.gx + 1) * (hi.gy - lo.gy + 1);
    if cells > MAX_BBOX_CELLS {
        return Err(BBoxError::TooLarge(cells));
    }

    let mut out = Vec::new();
    for gx in lo.gx..=hi.gx {
        for gy in lo.gy..=hi.gy {
            let id = GridKey { gx, gy }.to_string();
            if let Some(w) = store.get(&id, timestamp).as_ref().and_then(OutputRecord::as_weather) {
                out.push(w.clone());
            }
        }
    }
    Ok(out)
}
