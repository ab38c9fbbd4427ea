//! StatusWatch - service availability monitor.
//!
//! Probes the configured services on a fixed interval, keeps a bounded
//! history of results, summarizes it into uptime views and alerts when a
//! service starts a sustained degradation.

pub mod aggregate;
pub mod config;
pub mod correlator;
pub mod db;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod web;
