// Library exports for the binary and integration tests

pub mod config;
pub mod db;
pub mod import;
pub mod library;

pub use config::Config;
