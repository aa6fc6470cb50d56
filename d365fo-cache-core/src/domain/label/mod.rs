// d365fo-cache-core/src/domain/label/mod.rs
//
// Re-architecture of the source's generic, runtime-introspected label walker
//: an explicit `LabelHolder` capability plus a
// `LabelWalker` that knows how to enumerate a node's traversable child
// collections (`properties`, `members`, `navigation_properties`, `actions`,
// `parameters`, `constraints`). Implementers pick this over reflection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub global_version_id: i64,
    pub label_id: String,
    pub language: String,
    pub label_text: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Capability every label-bearing node implements: expose the id to look up,
/// and accept the resolved text back. `ResolveLabels` drives this plus
/// `LabelWalker` to patch an entire metadata tree in one batch lookup.
pub trait LabelHolder {
    fn label_id(&self) -> Option<&str>;
    fn set_label_text(&mut self, text: String);
}

/// A node that can hand out mutable access to its traversable children so a
/// walker can recurse without knowing the concrete type ahead of time.
pub trait LabelWalker {
    /// Collect every label id reachable from `self`, including nested
    /// collections, without mutating anything.
    fn collect_label_ids(&self, out: &mut Vec<String>);

    /// Apply resolved `label_id -> label_text` pairs throughout the tree.
    fn apply_labels(&mut self, resolved: &std::collections::HashMap<String, String>);
}

pub fn is_well_formed_label_id(id: &str) -> bool {
    // "@<module><number>", e.g. "@SYS12345" — at least one leading letter
    // block followed by at least one digit, after the '@'.
    let Some(rest) = id.strip_prefix('@') else {
        return false;
    };
    let letters_end = rest.find(|c: char| c.is_ascii_digit());
    match letters_end {
        Some(idx) if idx > 0 => rest[idx..].chars().all(|c| c.is_ascii_digit()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_well_formed_ids() {
        assert!(is_well_formed_label_id("@SYS12345"));
        assert!(is_well_formed_label_id("@ApplicationFoundation42"));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_well_formed_label_id("SYS12345"));
        assert!(!is_well_formed_label_id("@12345"));
        assert!(!is_well_formed_label_id("@SYS"));
    }
}
