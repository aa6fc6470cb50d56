// d365fo-cache-cli/src/commands/search.rs
//
// USE CASE: `Search`.

use crate::context;
use comfy_table::Table;
use d365fo_cache_core::domain::search::{EntityType, SearchFilters, SearchQuery};

pub fn run(env: &str, text: &str, entity_types: Vec<String>, limit: usize, offset: usize, no_fulltext: bool) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let entity_types = entity_types.iter().map(|t| parse_entity_type(t)).collect::<anyhow::Result<Vec<_>>>()?;

    let query = SearchQuery {
        text: text.to_string(),
        entity_types,
        filters: SearchFilters::default(),
        limit,
        offset,
        use_fulltext: !no_fulltext,
    };

    let results = core.search(&query)?;

    let mut table = Table::new();
    table.set_header(vec!["name", "type", "entity set", "relevance", "snippet"]);
    for r in &results {
        table.add_row(vec![
            r.name.clone(),
            format!("{:?}", r.entity_type),
            r.entity_set_name.clone().unwrap_or_default(),
            format!("{:.3}", r.relevance),
            r.snippet.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn parse_entity_type(s: &str) -> anyhow::Result<EntityType> {
    Ok(match s.to_lowercase().replace(['-', '_'], "").as_str() {
        "dataentity" => EntityType::DataEntity,
        "publicentity" => EntityType::PublicEntity,
        "enumeration" => EntityType::Enumeration,
        "action" => EntityType::Action,
        other => anyhow::bail!("unknown entity type '{other}'"),
    })
}
