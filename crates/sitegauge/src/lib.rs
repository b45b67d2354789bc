//! Sitegauge: structural fingerprinting, template clustering, change
//! detection, and audit storage for incremental site-wide accessibility
//! audits.

pub mod change;
pub mod cluster;
pub mod compliance;
pub mod fingerprint;
pub mod similarity;
pub mod storage;
pub mod types;

pub use change::{ChangeSet, FingerprintCache};
pub use cluster::{cluster_pages, Cluster, ClusterOptions, PageSignature};
pub use compliance::{compliance_rate, weighted_rate, Criterion, Level, RiskAccumulator};
pub use fingerprint::{analyze, fingerprint, PageStructure};
pub use similarity::jaccard;
pub use storage::{PriorTemplate, Store, TemplateEvidence, ERROR_MESSAGE_LIMIT};
pub use types::*;
