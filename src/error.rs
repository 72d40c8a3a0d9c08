//! error.rs
//! Taxonomía de errores del pipeline. Los fallos de E/S genéricos viajan como
//! `anyhow::Error`; aquí sólo los casos que el orquestador distingue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fichero de entrada ausente: se aborta antes de tocar ningún estado.
    #[error("no existe el fichero de entrada: {0}")]
    InputMissing(String),

    /// Sin anclas válidas no se puede construir el índice espacial.
    #[error("no hay anclas válidas en la caché, imposible interpolar")]
    NoValidAnchors,
}

/// Resultado de una petición individual a la fuente de previsión.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// HTTP 429: el bucle deja de pedir y el operador reanuda más tarde.
    #[error("límite de peticiones alcanzado (HTTP 429)")]
    RateLimited,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("transporte: {0}")]
    Transport(String),

    /// Respuesta 200 pero inutilizable (JSON inválido o series cortas).
    #[error("payload inválido: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(s) = e.status() {
            if s == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return FetchError::RateLimited;
            }
            return FetchError::Status(s.as_u16());
        }
        if e.is_decode() {
            return FetchError::Payload(e.to_string());
        }
        FetchError::Transport(e.to_string())
    }
}
