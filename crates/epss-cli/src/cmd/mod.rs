pub mod cache;
pub mod config;
pub mod enrich;
pub mod extract;
pub mod lookup;
