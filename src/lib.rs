mod model;
mod model_builder;
mod model_config;
mod ovms_connector;
mod postprocessing;
mod preprocessing;
mod routes;
mod server;

pub mod app;
pub mod config;

pub use app::start_app;
