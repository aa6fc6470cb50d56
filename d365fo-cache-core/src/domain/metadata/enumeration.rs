// d365fo-cache-core/src/domain/metadata/enumeration.rs

use crate::domain::label::{LabelHolder, LabelWalker};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerationMember {
    pub name: String,
    pub value: i64,
    pub configuration_enabled: bool,
    pub label_id: Option<String>,
    pub label_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enumeration {
    pub global_version_id: i64,
    pub name: String,
    pub label_id: Option<String>,
    pub label_text: Option<String>,
    pub members: Vec<EnumerationMember>,
}

impl Enumeration {
    /// Invariant from spec §3: member `value`s are unique within an enum.
    pub fn has_unique_member_values(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.members.iter().all(|m| seen.insert(m.value))
    }
}

impl LabelHolder for Enumeration {
    fn label_id(&self) -> Option<&str> {
        self.label_id.as_deref()
    }
    fn set_label_text(&mut self, text: String) {
        self.label_text = Some(text);
    }
}

impl LabelHolder for EnumerationMember {
    fn label_id(&self) -> Option<&str> {
        self.label_id.as_deref()
    }
    fn set_label_text(&mut self, text: String) {
        self.label_text = Some(text);
    }
}

impl LabelWalker for Enumeration {
    fn collect_label_ids(&self, out: &mut Vec<String>) {
        if let Some(id) = self.label_id() {
            out.push(id.to_string());
        }
        for m in &self.members {
            if let Some(id) = m.label_id() {
                out.push(id.to_string());
            }
        }
    }

    fn apply_labels(&mut self, resolved: &std::collections::HashMap<String, String>) {
        if let Some(id) = self.label_id().map(str::to_string) {
            if let Some(text) = resolved.get(&id) {
                self.set_label_text(text.clone());
            }
        }
        for m in &mut self.members {
            if let Some(id) = m.label_id().map(str::to_string) {
                if let Some(text) = resolved.get(&id) {
                    m.set_label_text(text.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, value: i64) -> EnumerationMember {
        EnumerationMember {
            name: name.into(),
            value,
            configuration_enabled: true,
            label_id: None,
            label_text: None,
        }
    }

    #[test]
    fn detects_duplicate_member_values() {
        let e = Enumeration {
            global_version_id: 1,
            name: "NoYes".into(),
            label_id: None,
            label_text: None,
            members: vec![member("No", 0), member("Yes", 0)],
        };
        assert!(!e.has_unique_member_values());
    }

    #[test]
    fn accepts_unique_member_values() {
        let e = Enumeration {
            global_version_id: 1,
            name: "NoYes".into(),
            label_id: None,
            label_text: None,
            members: vec![member("No", 0), member("Yes", 1)],
        };
        assert!(e.has_unique_member_values());
    }
}
