//! gridcast
//! Rejilla de previsión meteorológica: pocas llamadas reales (anclas) y el
//! resto de celdas rellenadas por vecino más cercano con ruido.

pub mod checkpoint;
pub mod error;
pub mod fetcher;
pub mod grid;
pub mod interp;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod points;
pub mod query;
pub mod sampler;
pub mod server;
pub mod store;
