// d365fo-cache-cli/src/commands/entity.rs
//
// USE CASE: `GetEntity`/`ListEntities`.

use crate::context;
use comfy_table::Table;
use d365fo_cache_core::domain::metadata::entity::EntityCategory;

pub fn get(env: &str, name: &str) -> anyhow::Result<()> {
    let core = context::open(env)?;
    match core.get_entity(name)? {
        Some(entity) => println!("{}", serde_json::to_string_pretty(&entity)?),
        None => {
            eprintln!("entity '{name}' not found for the active version");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub fn list(env: &str, category: Option<String>, read_only: Option<bool>, limit: usize, offset: usize) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let category = category.map(|c| parse_category(&c)).transpose()?;
    let (entities, total) = core.list_entities(category, read_only, limit, offset)?;

    let mut table = Table::new();
    table.set_header(vec!["name", "entity set", "category", "read only", "data service"]);
    for e in &entities {
        table.add_row(vec![
            e.name.clone(),
            e.entity_set_name.clone(),
            format!("{:?}", e.category),
            e.is_read_only.to_string(),
            e.data_service_enabled.to_string(),
        ]);
    }
    println!("{table}");
    println!("{} of {total} total", entities.len());
    Ok(())
}

fn parse_category(s: &str) -> anyhow::Result<EntityCategory> {
    Ok(match s.to_lowercase().as_str() {
        "master" => EntityCategory::Master,
        "transaction" => EntityCategory::Transaction,
        "document" => EntityCategory::Document,
        "reference" => EntityCategory::Reference,
        "parameter" => EntityCategory::Parameter,
        "miscellaneous" => EntityCategory::Miscellaneous,
        other => anyhow::bail!("unknown entity category '{other}'"),
    })
}
