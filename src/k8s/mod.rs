//! Kubernetes API integration module
//!
//! This module provides:
//! - Payload structs for the resource kinds a trace job uses
//! - The `ClusterApi` trait and its REST implementation
//! - Connection settings

pub mod client;
pub mod config;
pub mod resources;

pub use client::{ClusterApi, ClusterError, KubeClient};
pub use config::ClusterConfig;
pub use resources::*;
