//! Cluster lifecycle reconciliation
//!
//! This crate implements [`ClusterReconciler`](unibench_core::ClusterReconciler)
//! on top of a cloud control-plane API:
//!
//! - [`AtlasClient`]: authenticated HTTP client for the cluster, process and
//!   measurement endpoints
//! - [`ClusterLifecycleManager`]: create/modify/delete plus state polling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod manager;

pub use client::{
    cluster_payload, AtlasClient, AtlasConfig, AtlasCredentials, ControlPlane, ATLAS_ACCEPT,
    DEFAULT_BASE_URL,
};
pub use manager::ClusterLifecycleManager;

use unibench_core::{ClusterError, PollPolicy};

/// Manager backed by the Atlas API, configured from the environment
pub fn atlas_from_env(poll: PollPolicy) -> Result<ClusterLifecycleManager<AtlasClient>, ClusterError> {
    let client = AtlasClient::new(AtlasConfig::from_env()?)?;
    Ok(ClusterLifecycleManager::new(client, poll))
}
