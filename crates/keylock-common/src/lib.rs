//! Keylock Common - shared constants and configuration
//!
//! This crate provides:
//! - Lock key naming and protocol constants
//! - Store connection configuration (standalone, cluster, ring)
//! - Configuration loading from files and environment

pub mod config;
pub mod constants;
pub mod error;

pub use config::{
    ClusterConfig, ConnectionOptions, KeylockConfig, LockSettings, RingConfig, StandaloneConfig,
    StoreConfig, Topology,
};
pub use constants::*;
pub use error::ConfigError;
