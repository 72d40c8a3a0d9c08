//! types.rs
//! Modelos de datos compartidos por el pipeline: puntos de entrada (ciudades),
//! celdas representativas, registros de salida y configuración de la ejecución.

use serde::{Deserialize, Serialize};
use std::env;

use crate::query::DisambiguationPolicy;

/// Clave secundaria con la que nacen los registros `CityLookup`; el persister
/// la reescribe a `METADATA#<nombre>` antes de escribir.
pub const LOOKUP_KEY: &str = "METADATA";

/// Ciudad leída de la fuente tabular. Inmutable tras la carga.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PointRecord {
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub population: Option<f64>,
}

impl PointRecord {
    /// Población para comparar colisiones (ausente = 0).
    #[inline]
    pub fn population_or_zero(&self) -> f64 {
        self.population.unwrap_or(0.0)
    }
}

/// Ciudad elegida para representar una celda. Las coordenadas son las del
/// centro de la celda, no las de la ciudad.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CellRepresentative {
    pub grid_id: String,
    pub gx: i64,
    pub gy: i64,
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub population: f64,
    pub is_anchor: bool,
}

/// Una entrada por ciudad original (sin deduplicar), con sus coordenadas reales.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LookupRecord {
    pub grid_id: String,
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub population: f64,
}

// -------------------------------
// Registros de salida
// -------------------------------

/// Fila de búsqueda/desambiguación (sin campos meteorológicos).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CityLookupRow {
    #[serde(rename = "GridID")]
    pub grid_id: String,
    pub timestamp: String,
    pub location_name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub population: f64,
}

/// Fila meteorológica, compartida por `Hourly` y `Daily`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct WeatherRow {
    #[serde(rename = "GridID")]
    pub grid_id: String,
    pub timestamp: String,
    pub location_name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub is_anchor: bool,
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub chance_of_rain: Option<f64>,
    pub precipitation: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// Registro de salida. Todos comparten la clave compuesta (GridID, Timestamp).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "Type")]
pub enum OutputRecord {
    CityLookup(CityLookupRow),
    Hourly(WeatherRow),
    Daily(WeatherRow),
}

impl OutputRecord {
    pub fn grid_id(&self) -> &str {
        match self {
            OutputRecord::CityLookup(r) => &r.grid_id,
            OutputRecord::Hourly(r) | OutputRecord::Daily(r) => &r.grid_id,
        }
    }

    /// Componente secundaria de la clave (timestamp o clave de lookup).
    pub fn key(&self) -> &str {
        match self {
            OutputRecord::CityLookup(r) => &r.timestamp,
            OutputRecord::Hourly(r) | OutputRecord::Daily(r) => &r.timestamp,
        }
    }

    pub fn set_key(&mut self, key: String) {
        match self {
            OutputRecord::CityLookup(r) => r.timestamp = key,
            OutputRecord::Hourly(r) | OutputRecord::Daily(r) => r.timestamp = key,
        }
    }

    pub fn location_name(&self) -> &str {
        match self {
            OutputRecord::CityLookup(r) => &r.location_name,
            OutputRecord::Hourly(r) | OutputRecord::Daily(r) => &r.location_name,
        }
    }

    pub fn composite_key(&self) -> (String, String) {
        (self.grid_id().to_string(), self.key().to_string())
    }

    pub fn as_weather(&self) -> Option<&WeatherRow> {
        match self {
            OutputRecord::CityLookup(_) => None,
            OutputRecord::Hourly(r) | OutputRecord::Daily(r) => Some(r),
        }
    }
}

impl From<&LookupRecord> for OutputRecord {
    fn from(l: &LookupRecord) -> Self {
        OutputRecord::CityLookup(CityLookupRow {
            grid_id: l.grid_id.clone(),
            timestamp: LOOKUP_KEY.to_string(),
            location_name: l.name.clone(),
            country: l.country.clone(),
            lat: l.lat,
            lon: l.lon,
            population: l.population,
        })
    }
}

// -------------------------------
// Configuración
// -------------------------------

#[derive(Clone, Debug)]
pub struct AppCfg {
    /// CSV de ciudades (lat, lng, population, city_ascii, country)
    pub input_path: String,
    /// Filtro de región por país. `None` procesa todo el fichero.
    pub country: Option<String>,

    /// Tamaño de celda en grados (G)
    pub grid_deg: f64,
    /// Fracción objetivo de cada pasada de muestreo (f)
    pub anchor_fraction: f64,
    /// Semilla opcional; sin ella el muestreo y el ruido no son reproducibles
    pub seed: Option<u64>,

    /// Endpoint de previsión (Open-Meteo)
    pub api_url: String,
    pub timezone: String,
    pub forecast_days: u32,
    pub request_timeout_s: u64,
    /// Pausa entre peticiones para quedar por debajo de las cuotas
    pub request_delay_ms: u64,

    pub checkpoint_path: String,
    /// Volcado del checkpoint cada K peticiones
    pub checkpoint_every: usize,

    /// Pasos horarios y diarios emitidos por celda
    pub hours: usize,
    pub days: usize,
    pub noise_sigma: f64,
    pub distance_gain: f64,

    pub output_path: String,
    /// Máximo de items por escritura en lote (límite duro 25)
    pub batch_size: usize,
    pub max_write_attempts: u32,
    pub backoff_base_ms: u64,

    /// Dirección/puerto del servidor HTTP de consulta
    pub bind: String,
    pub disambiguation: DisambiguationPolicy,
}

/// Límite de items por petición del almacén.
pub const MAX_BATCH_ITEMS: usize = 25;

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            input_path: "data/worldcities.csv".into(),
            country: Some("Japan".into()),
            grid_deg: 0.18,
            anchor_fraction: 0.05,
            seed: None,
            api_url: "https://api.open-meteo.com/v1/forecast".into(),
            timezone: "Asia/Tokyo".into(),
            forecast_days: 7,
            request_timeout_s: 5,
            request_delay_ms: 500,
            checkpoint_path: "data/forecast_checkpoint.json".into(),
            checkpoint_every: 25,
            hours: 24,
            days: 6,
            noise_sigma: 0.5,
            distance_gain: 2.0,
            output_path: "data/weather_records.jsonl".into(),
            batch_size: MAX_BATCH_ITEMS,
            max_write_attempts: 5,
            backoff_base_ms: 100,
            bind: "0.0.0.0:8080".into(),
            disambiguation: DisambiguationPolicy::MostPopulous,
        }
    }
}

impl AppCfg {
    pub fn from_env() -> Self {
        Self::from_vars(|k| env::var(k).ok())
    }

    /// Igual que `from_env` pero con un lector de variables inyectable.
    /// Un valor que no parsea conserva el valor por defecto.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = AppCfg::default();
        if let Some(v) = var("INPUT_PATH") { c.input_path = v; }
        if let Some(v) = var("TARGET_COUNTRY") {
            c.country = if v.is_empty() || v == "*" { None } else { Some(v) };
        }
        if let Some(v) = var("GRID_DEG") { c.grid_deg = v.parse().unwrap_or(c.grid_deg); }
        if let Some(v) = var("ANCHOR_FRACTION") { c.anchor_fraction = v.parse().unwrap_or(c.anchor_fraction); }
        if let Some(v) = var("SEED") { c.seed = v.parse().ok().or(c.seed); }
        if let Some(v) = var("FORECAST_URL") { c.api_url = v; }
        if let Some(v) = var("FORECAST_TZ") { c.timezone = v; }
        if let Some(v) = var("FORECAST_DAYS") { c.forecast_days = v.parse().unwrap_or(c.forecast_days); }
        if let Some(v) = var("REQUEST_TIMEOUT_S") { c.request_timeout_s = v.parse().unwrap_or(c.request_timeout_s); }
        if let Some(v) = var("REQUEST_DELAY_MS") { c.request_delay_ms = v.parse().unwrap_or(c.request_delay_ms); }
        if let Some(v) = var("CHECKPOINT_PATH") { c.checkpoint_path = v; }
        if let Some(v) = var("CHECKPOINT_EVERY") { c.checkpoint_every = v.parse().unwrap_or(c.checkpoint_every); }
        if let Some(v) = var("HOURS") { c.hours = v.parse().unwrap_or(c.hours); }
        if let Some(v) = var("DAYS") { c.days = v.parse().unwrap_or(c.days); }
        if let Some(v) = var("NOISE_SIGMA") { c.noise_sigma = v.parse().unwrap_or(c.noise_sigma); }
        if let Some(v) = var("DISTANCE_GAIN") { c.distance_gain = v.parse().unwrap_or(c.distance_gain); }
        if let Some(v) = var("OUTPUT_PATH") { c.output_path = v; }
        if let Some(v) = var("BATCH_SIZE") { c.batch_size = v.parse().unwrap_or(c.batch_size); }
        if let Some(v) = var("MAX_WRITE_ATTEMPTS") { c.max_write_attempts = v.parse().unwrap_or(c.max_write_attempts); }
        if let Some(v) = var("BACKOFF_BASE_MS") { c.backoff_base_ms = v.parse().unwrap_or(c.backoff_base_ms); }
        if let Some(v) = var("BIND") { c.bind = v; }
        if let Some(v) = var("DISAMBIGUATION") { c.disambiguation = v.parse().unwrap_or(c.disambiguation); }

        c.batch_size = c.batch_size.clamp(1, MAX_BATCH_ITEMS);
        c.checkpoint_every = c.checkpoint_every.max(1);
        // G <= 0 manda todos los puntos a una sola celda saturada; f fuera de (0, 1] no muestrea
        let def = AppCfg::default();
        if !(c.grid_deg.is_finite() && c.grid_deg > 0.0) { c.grid_deg = def.grid_deg; }
        if !(c.anchor_fraction > 0.0 && c.anchor_fraction <= 1.0) { c.anchor_fraction = def.anchor_fraction; }
        if !(c.noise_sigma.is_finite() && c.noise_sigma >= 0.0) { c.noise_sigma = def.noise_sigma; }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn cfg_env_overrides_and_clamps() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("GRID_DEG", "0.25"),
            ("TARGET_COUNTRY", "*"),
            ("BATCH_SIZE", "100"),
            ("SEED", "42"),
            ("HOURS", "not-a-number"),
        ]);
        let c = AppCfg::from_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.grid_deg, 0.25);
        assert_eq!(c.country, None);
        assert_eq!(c.batch_size, MAX_BATCH_ITEMS);
        assert_eq!(c.seed, Some(42));
        assert_eq!(c.hours, 24);
    }

    #[test]
    fn cfg_rejects_degenerate_grid_and_fraction() {
        for (g, f) in [("0", "0"), ("-0.18", "1.5"), ("inf", "NaN")] {
            let vars = HashMap::from([("GRID_DEG", g), ("ANCHOR_FRACTION", f)]);
            let c = AppCfg::from_vars(|k| vars.get(k).map(|v| v.to_string()));
            assert_eq!(c.grid_deg, 0.18, "GRID_DEG={g}");
            assert_eq!(c.anchor_fraction, 0.05, "ANCHOR_FRACTION={f}");
        }
        let vars = HashMap::from([("ANCHOR_FRACTION", "1")]);
        assert_eq!(AppCfg::from_vars(|k| vars.get(k).map(|v| v.to_string())).anchor_fraction, 1.0);
    }

    #[test]
    fn output_record_serializes_with_type_tag() {
        let rec = OutputRecord::Hourly(WeatherRow {
            grid_id: "GRID#776#198".into(),
            timestamp: "2025-01-01T00:00".into(),
            location_name: "Tokyo".into(),
            country: "Japan".into(),
            lat: 35.73,
            lon: 139.77,
            is_anchor: true,
            temperature: Some(5.2),
            humidity: None,
            chance_of_rain: Some(10.0),
            precipitation: Some(0.0),
            wind_speed: Some(3.1),
        });
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["Type"], "Hourly");
        assert_eq!(v["GridID"], "GRID#776#198");
        assert!(v.get("Humidity").is_none());

        let back: OutputRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, rec);
    }
}
