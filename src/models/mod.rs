pub mod forecast;
pub mod types;
