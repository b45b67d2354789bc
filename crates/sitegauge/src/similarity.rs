//! Set similarity for approximate template matching.

use std::collections::BTreeSet;

/// Jaccard similarity: |A ∩ B| / |A ∪ B|.
///
/// Two empty sets score 0.0 so that pages without a path set never merge.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
