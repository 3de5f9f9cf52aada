//! C1: Extent cache — interval container backing every in-memory graph.

pub mod extent_cache;

pub use extent_cache::{DeviceExtentCache, ExtentCache};
