//! Block device simulation and free-space strategies

pub mod allocator;
pub mod config;
pub mod device;
pub mod error;
pub mod workload;
