// d365fo-cache-cli/src/commands/action.rs
//
// USE CASE: `GetActions`.

use crate::context;
use comfy_table::Table;
use d365fo_cache_core::domain::metadata::entity::BindingKind;

pub fn list(
    env: &str,
    entity: Option<String>,
    binding: Option<String>,
    name_pattern: Option<String>,
    limit: usize,
    offset: usize,
) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let binding = binding.map(|b| parse_binding(&b)).transpose()?;
    let (actions, total) = core.get_actions(entity.as_deref(), binding, name_pattern.as_deref(), limit, offset)?;

    let mut table = Table::new();
    table.set_header(vec!["entity", "action", "binding", "return type"]);
    for (owner, action) in &actions {
        table.add_row(vec![
            owner.clone(),
            action.name.clone(),
            format!("{:?}", action.binding_kind),
            action.return_type_name.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    println!("{} of {total} total", actions.len());
    Ok(())
}

fn parse_binding(s: &str) -> anyhow::Result<BindingKind> {
    Ok(match s.to_lowercase().as_str() {
        "unbound" => BindingKind::Unbound,
        "bound_to_entity_set" | "boundtoentityset" => BindingKind::BoundToEntitySet,
        "bound_to_entity" | "boundtoentity" => BindingKind::BoundToEntity,
        other => anyhow::bail!("unknown binding kind '{other}'"),
    })
}
