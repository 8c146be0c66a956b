//! # Ports Layer

pub mod outbound;

pub use outbound::{HeaderSource, LiveRootCheck, NoLiveRoots, SectionProgress};
