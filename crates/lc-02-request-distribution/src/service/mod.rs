//! # Service Layer

pub mod distributor;
pub mod metrics;
pub mod registry;
pub mod retrieve;


pub use distributor::{Distributor, RequestTicket};
pub use metrics::{DistributorMetrics, DistributorMetricsSnapshot};
pub use registry::PeerRegistry;
pub use retrieve::RetrieveManager;
