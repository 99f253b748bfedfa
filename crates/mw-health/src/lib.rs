//! # mw-health: cluster reachability reports
//!
//! Turns a membership snapshot into a per-member UP/DOWN report using
//! concurrent, bounded-timeout TCP probes, and serves it over HTTP.

pub mod aggregator;
pub mod probe;
pub mod report;
pub mod server;

pub use aggregator::HealthAggregator;
pub use probe::{ProbeResult, ProbeStatus, Prober, TcpProbe};
pub use report::{HealthEntry, HealthReport};
pub use server::ReportServer;
