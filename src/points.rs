//! points.rs
//!
//! Lectura de la fuente de ciudades (CSV tipo `worldcities.csv`).
//!
//! - Localiza las columnas por nombre de cabecera, admitiendo variantes
//!   (`lat`/`latitude`, `lng`/`lon`/`longitude`, `city_ascii`/`name`/`city`).
//! - Aplica el filtro de región (país) antes de devolver nada.
//! - Las filas con coordenadas no numéricas se descartan y se cuentan.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::models::types::PointRecord;

const NAME_COLS: [&str; 3] = ["city_ascii", "name", "city"];
const LAT_COLS: [&str; 2] = ["lat", "latitude"];
const LON_COLS: [&str; 3] = ["lng", "lon", "longitude"];

#[derive(Debug, Default)]
pub struct LoadedPoints {
    pub points: Vec<PointRecord>,
    /// Filas descartadas por coordenadas inválidas
    pub skipped: usize,
}

struct Columns {
    name: usize,
    country: Option<usize>,
    lat: usize,
    lon: usize,
    population: Option<usize>,
}

fn find_col(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|c| {
        headers.iter().position(|h| h.trim().eq_ignore_ascii_case(c))
    })
}

fn columns(headers: &csv::StringRecord) -> Result<Columns> {
    let name = find_col(headers, &NAME_COLS).context("falta columna de nombre (city_ascii/name/city)")?;
    let lat = find_col(headers, &LAT_COLS).context("falta columna de latitud (lat/latitude)")?;
    let lon = find_col(headers, &LON_COLS).context("falta columna de longitud (lng/lon/longitude)")?;
    Ok(Columns {
        name,
        country: find_col(headers, &["country"]),
        lat,
        lon,
        population: find_col(headers, &["population"]),
    })
}

/// Parsea el CSV y devuelve los puntos que pasan el filtro de país.
pub fn parse_points_csv<R: Read>(raw: R, country: Option<&str>) -> Result<LoadedPoints> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(raw);
    let cols = columns(rdr.headers()?)?;

    let mut out = LoadedPoints::default();
    for rec in rdr.records() {
        let rec = rec.context("CSV de ciudades")?;
        let field = |i: usize| rec.get(i).map(str::trim).unwrap_or("");
        let c = cols.country.map(field).unwrap_or("");
        if let Some(target) = country {
            if c != target { continue; }
        }

        let lat: f64 = field(cols.lat).parse().unwrap_or(f64::NAN);
        let lon: f64 = field(cols.lon).parse().unwrap_or(f64::NAN);
        if !lat.is_finite() || !lon.is_finite() {
            out.skipped += 1;
            continue;
        }
        // población vacía o no numérica = ausente
        let population = cols
            .population
            .map(field)
            .and_then(|p| p.parse::<f64>().ok())
            .filter(|p| p.is_finite() && *p >= 0.0);

        out.points.push(PointRecord {
            name: field(cols.name).to_string(),
            country: c.to_string(),
            lat,
            lon,
            population,
        });
    }
    Ok(out)
}

/// Carga el fichero completo en memoria. Si no existe devuelve
/// `PipelineError::InputMissing` sin haber hecho nada más.
pub fn load_points(path: impl AsRef<Path>, country: Option<&str>) -> Result<LoadedPoints> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PipelineError::InputMissing(path.display().to_string()).into());
    }
    let f = std::fs::File::open(path).with_context(|| format!("abriendo {}", path.display()))?;
    let loaded = parse_points_csv(f, country)?;
    if loaded.skipped > 0 {
        warn!("{} filas descartadas por coordenadas inválidas", loaded.skipped);
    }
    info!(
        "Cargadas {} ciudades de {} (filtro país: {})",
        loaded.points.len(),
        path.display(),
        country.unwrap_or("ninguno")
    );
    Ok(loaded)
}
