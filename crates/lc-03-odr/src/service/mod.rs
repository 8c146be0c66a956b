//! # Service Layer

pub mod bloom_service;
pub mod metrics;
pub mod odr;

#[cfg(test)]
mod tests;

pub use bloom_service::BloomBitsService;
pub use metrics::{OdrMetrics, OdrMetricsSnapshot};
pub use odr::Odr;
