pub mod calculations;
pub mod config;
pub mod models;
pub mod services;
#[cfg(feature = "http-server")]
pub mod web; // JSON + multipart API
