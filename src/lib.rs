//! Lab report analyzer
//!
//! Accepts lab report PDFs over HTTP, runs them through an ordered pipeline of
//! specialist analysis stages on background workers, and serves the per-stage
//! findings and an aggregate report once the job completes.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
