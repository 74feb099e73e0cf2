pub mod algorithm;
pub mod config;
pub mod policy;

pub use algorithm::{cluster_alerts, resolve_group, ClusterResult};
pub use config::ClusteringConfig;
pub use policy::AlertPolicy;
