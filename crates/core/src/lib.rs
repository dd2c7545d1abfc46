pub mod config;
pub mod models;
