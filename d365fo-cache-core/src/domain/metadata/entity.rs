// d365fo-cache-core/src/domain/metadata/entity.rs

use crate::domain::label::{LabelHolder, LabelWalker};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Master,
    Transaction,
    Document,
    Reference,
    Parameter,
    Miscellaneous,
}

/// Collection-level metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEntity {
    pub global_version_id: i64,
    pub name: String,
    pub entity_set_name: String,
    pub category: EntityCategory,
    pub data_service_enabled: bool,
    pub data_management_enabled: bool,
    pub is_read_only: bool,
    pub label_id: Option<String>,
    pub label_text: Option<String>,
}

/// Structural shape of an entity: properties, navigations, actions.
/// Refers back to its `DataEntity` counterpart by `name` within the same
/// `global_version_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicEntity {
    pub global_version_id: i64,
    pub name: String,
    pub entity_set_name: String,
    pub label_id: Option<String>,
    pub label_text: Option<String>,
    pub properties: Vec<EntityProperty>,
    pub navigation_properties: Vec<NavigationProperty>,
    pub actions: Vec<EntityAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityProperty {
    pub name: String,
    pub type_name: String,
    pub data_type: String,
    pub is_key: bool,
    pub is_mandatory: bool,
    pub allow_edit: bool,
    pub allow_edit_on_create: bool,
    pub is_dimension: bool,
    pub property_order: i64,
    pub label_id: Option<String>,
    pub label_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Referential,
    Fixed,
    Related,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationConstraint {
    pub kind: ConstraintKind,
    pub source_property: String,
    pub target_property: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    pub related_entity: String,
    pub cardinality: Cardinality,
    pub constraints: Vec<RelationConstraint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Unbound,
    BoundToEntitySet,
    BoundToEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    pub type_name: String,
    pub is_collection: bool,
    pub parameter_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAction {
    pub name: String,
    pub binding_kind: BindingKind,
    pub return_type_name: Option<String>,
    pub return_is_collection: bool,
    pub field_lookup: Option<String>,
    pub parameters: Vec<ActionParameter>,
}

// --- LabelHolder capability ---
// Rather than a runtime attribute walker, every node that carries a label
// implements this trait; `ResolveLabels` (application::label_resolver) uses
// it plus a child-collection iterator to walk any metadata tree uniformly.

impl LabelHolder for DataEntity {
    fn label_id(&self) -> Option<&str> {
        self.label_id.as_deref()
    }
    fn set_label_text(&mut self, text: String) {
        self.label_text = Some(text);
    }
}

impl LabelHolder for PublicEntity {
    fn label_id(&self) -> Option<&str> {
        self.label_id.as_deref()
    }
    fn set_label_text(&mut self, text: String) {
        self.label_text = Some(text);
    }
}

impl LabelHolder for EntityProperty {
    fn label_id(&self) -> Option<&str> {
        self.label_id.as_deref()
    }
    fn set_label_text(&mut self, text: String) {
        self.label_text = Some(text);
    }
}

impl LabelWalker for PublicEntity {
    fn collect_label_ids(&self, out: &mut Vec<String>) {
        if let Some(id) = self.label_id() {
            out.push(id.to_string());
        }
        for p in &self.properties {
            if let Some(id) = p.label_id() {
                out.push(id.to_string());
            }
        }
        for n in &self.navigation_properties {
            for c in &n.constraints {
                let _ = c; // constraints carry no labels of their own today
            }
        }
        for a in &self.actions {
            for p in &a.parameters {
                let _ = p; // action parameters carry no labels of their own today
            }
        }
    }

    fn apply_labels(&mut self, resolved: &std::collections::HashMap<String, String>) {
        if let Some(id) = self.label_id().map(str::to_string) {
            if let Some(text) = resolved.get(&id) {
                self.set_label_text(text.clone());
            }
        }
        for p in &mut self.properties {
            if let Some(id) = p.label_id().map(str::to_string) {
                if let Some(text) = resolved.get(&id) {
                    p.set_label_text(text.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_entity_carries_capability_flags() {
        let e = DataEntity {
            global_version_id: 1,
            name: "Customers".into(),
            entity_set_name: "Customers".into(),
            category: EntityCategory::Master,
            data_service_enabled: true,
            data_management_enabled: true,
            is_read_only: false,
            label_id: Some("@SYS1".into()),
            label_text: None,
        };
        assert!(e.data_service_enabled);
        assert_eq!(e.label_id(), Some("@SYS1"));
    }
}
