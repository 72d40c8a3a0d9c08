//! forecast.rs
//! Respuesta de la fuente de previsión (formato Open-Meteo): series horaria y
//! diaria, cada una con su propio array de tiempos.
//!
//! Es también el formato que se guarda en el checkpoint, así que debe
//! sobrevivir a un ciclo serializar/deserializar sin pérdida.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HourlySeries {
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m")]
    pub temperature: Vec<Option<f64>>,
    #[serde(rename = "relative_humidity_2m")]
    pub humidity: Vec<Option<f64>>,
    pub precipitation_probability: Vec<Option<f64>>,
    pub precipitation: Vec<Option<f64>>,
    #[serde(rename = "wind_speed_10m")]
    pub wind_speed: Vec<Option<f64>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DailySeries {
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m_max")]
    pub temperature_max: Vec<Option<f64>>,
    pub precipitation_sum: Vec<Option<f64>>,
    pub precipitation_probability_max: Vec<Option<f64>>,
    #[serde(rename = "wind_speed_10m_max")]
    pub wind_speed_max: Vec<Option<f64>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ForecastPayload {
    pub hourly: HourlySeries,
    pub daily: DailySeries,
    /// Resto de campos de la respuesta (latitude, timezone, *_units...), se
    /// guardan tal cual.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HourlySeries {
    /// Nº de muestras alineadas (todas las columnas tienen al menos este largo).
    pub fn aligned_len(&self) -> usize {
        [
            self.time.len(),
            self.temperature.len(),
            self.humidity.len(),
            self.precipitation_probability.len(),
            self.precipitation.len(),
            self.wind_speed.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0)
    }
}

impl DailySeries {
    pub fn aligned_len(&self) -> usize {
        [
            self.time.len(),
            self.temperature_max.len(),
            self.precipitation_sum.len(),
            self.precipitation_probability_max.len(),
            self.wind_speed_max.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0)
    }
}

impl ForecastPayload {
    /// Comprueba que hay `hours` muestras horarias y `days + 1` diarias
    /// (el día 0 no se emite).
    pub fn check_usable(&self, hours: usize, days: usize) -> Result<(), String> {
        let h = self.hourly.aligned_len();
        if h < hours {
            return Err(format!("serie horaria corta: {h} < {hours}"));
        }
        let d = self.daily.aligned_len();
        if d < days + 1 {
            return Err(format!("serie diaria corta: {d} < {}", days + 1));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_meteo_shape_and_keeps_extra_fields() {
        let raw = r#"{
            "latitude": 35.73, "longitude": 139.77, "timezone": "Asia/Tokyo",
            "hourly_units": {"temperature_2m": "°C"},
            "hourly": {
                "time": ["2025-03-01T00:00"],
                "temperature_2m": [4.1],
                "relative_humidity_2m": [71],
                "precipitation_probability": [null],
                "precipitation": [0.0],
                "wind_speed_10m": [6.3]
            },
            "daily": {
                "time": ["2025-03-01"],
                "temperature_2m_max": [11.2],
                "precipitation_sum": [0.0],
                "precipitation_probability_max": [5],
                "wind_speed_10m_max": [14.9]
            }
        }"#;
        let p: ForecastPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(p.hourly.aligned_len(), 1);
        assert_eq!(p.hourly.precipitation_probability[0], None);
        assert_eq!(p.extra["timezone"], "Asia/Tokyo");
        assert!(p.check_usable(1, 0).is_ok());
        assert!(p.check_usable(24, 0).is_err());
    }

    #[test]
    fn misaligned_columns_count_as_short() {
        let mut p = fixtures::payload(10.0, 3.0);
        p.hourly.wind_speed.truncate(10);
        assert_eq!(p.hourly.aligned_len(), 10);
        assert!(p.check_usable(24, 6).is_err());
    }
}
