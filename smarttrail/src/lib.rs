mod cv_utils;
mod routes;
mod server;
mod stream;
mod telemetry;

pub mod app;
pub mod camera;
pub mod config;
pub mod detection;
pub mod navigation;
pub mod prediction;
pub mod robot;

pub use app::start_app;
