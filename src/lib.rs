pub mod app;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod render;
pub mod utils;

pub use app::App;
pub use config::Settings;
pub use error::{ReportError, Result};
pub use models::ReportModel;
