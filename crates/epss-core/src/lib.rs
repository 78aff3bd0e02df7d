pub mod cache;
pub mod client;
pub mod config;
pub mod cve;
pub mod enrich;
pub mod error;
pub mod service;
pub mod store;
pub mod types;

pub use cache::ScoreCache;
pub use client::{EpssSource, HttpSource};
pub use config::EpssConfig;
pub use cve::CveId;
pub use error::{EpssError, Result};
pub use service::EpssService;
pub use types::EpssScore;
