//! Workload scaler daemon
//!
//! Re-runs one configured scaling request on an interval and serves
//! health and Prometheus endpoints.

pub mod api;
pub mod config;
pub mod runner;
