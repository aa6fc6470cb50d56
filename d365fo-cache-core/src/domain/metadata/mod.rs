pub mod entity;
pub mod enumeration;

pub use entity::{
    ActionParameter, BindingKind, Cardinality, ConstraintKind, DataEntity, EntityAction,
    EntityCategory, EntityProperty, NavigationProperty, PublicEntity, RelationConstraint,
};
pub use enumeration::{Enumeration, EnumerationMember};

/// Tagged variant returned by `GetEntity`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Data(DataEntity),
    Public(PublicEntity),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Data(d) => &d.name,
            Entity::Public(p) => &p.name,
        }
    }
}
