//! fetch.rs
//! Cliente de la fuente de previsión. Una petición por ancla, por coordenadas
//! del centro de celda; el código de estado decide el resultado:
//! 200 = payload, 429 = rate limit, resto = fallo transitorio.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::FetchError;
use crate::models::forecast::ForecastPayload;
use crate::models::types::AppCfg;

const HOURLY_VARS: &str =
    "temperature_2m,relative_humidity_2m,precipitation_probability,precipitation,wind_speed_10m";
const DAILY_VARS: &str =
    "temperature_2m_max,precipitation_sum,precipitation_probability_max,wind_speed_10m_max";

#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn forecast(&self, lat: f64, lon: f64) -> Result<ForecastPayload, FetchError>;
}

/// Cliente Open-Meteo (`/v1/forecast`).
pub struct OpenMeteoClient {
    pub(crate) http: Client,
    pub base_url: String,
    pub timezone: String,
    pub forecast_days: u32,
}

impl OpenMeteoClient {
    pub fn new(cfg: &AppCfg) -> anyhow::Result<Self> {
        // timeout fijo: ninguna petición bloquea indefinidamente
        let http = Client::builder()
            .brotli(true)
            .gzip(true)
            .deflate(true)
            .timeout(Duration::from_secs(cfg.request_timeout_s))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.api_url.clone(),
            timezone: cfg.timezone.clone(),
            forecast_days: cfg.forecast_days,
        })
    }

    fn params(&self, lat: f64, lon: f64) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("hourly", HOURLY_VARS.to_string()),
            ("daily", DAILY_VARS.to_string()),
            ("timezone", self.timezone.clone()),
            ("forecast_days", self.forecast_days.to_string()),
        ]
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoClient {
    async fn forecast(&self, lat: f64, lon: f64) -> Result<ForecastPayload, FetchError> {
        let resp = self.http.get(&self.base_url).query(&self.params(lat, lon)).send().await?;
        match resp.status() {
            StatusCode::OK => {
                let bytes = resp.bytes().await?;
                serde_json::from_slice(&bytes).map_err(|e| FetchError::Payload(e.to_string()))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
            s => Err(FetchError::Status(s.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_cell_center_and_series() {
        let cfg = AppCfg::default();
        let c = OpenMeteoClient::new(&cfg).unwrap();
        let p = c.params(35.73, 139.77);
        assert!(p.contains(&("latitude", "35.73".to_string())));
        assert!(p.contains(&("longitude", "139.77".to_string())));
        assert!(p.contains(&("forecast_days", "7".to_string())));
        assert!(p.iter().any(|(k, v)| *k == "hourly" && v.contains("wind_speed_10m")));
    }
}
