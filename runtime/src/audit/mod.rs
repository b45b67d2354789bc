//! Accessibility auditing: violation detection, criterion classification,
//! single-page audits, and template-level dispatch.

pub mod classifier;
pub mod detector;
pub mod dispatcher;
pub mod page_audit;

pub use classifier::{Classifier, GatedClassifier, HttpClassifier};
pub use detector::{BuiltinDetector, ViolationDetector};
pub use dispatcher::{AuditDispatcher, TemplateOutcome};
pub use page_audit::{PageAudit, PageAuditor};
