// d365fo-cache-core/src/domain/search/mod.rs

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    DataEntity,
    PublicEntity,
    Enumeration,
    Action,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub entity_category: Option<String>,
    pub is_read_only: Option<bool>,
    pub data_service_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub entity_types: Vec<EntityType>,
    pub filters: SearchFilters,
    pub limit: usize,
    pub offset: usize,
    pub use_fulltext: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        SearchQuery {
            text: String::new(),
            entity_types: Vec::new(),
            filters: SearchFilters::default(),
            limit: 20,
            offset: 0,
            use_fulltext: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub entity_type: EntityType,
    pub entity_set_name: Option<String>,
    pub description: Option<String>,
    pub relevance: f64,
    pub snippet: Option<String>,
}

/// Tie-break on equal rank: exact case-insensitive name match
/// first, then shorter name, then lexicographic — applied as a `sort_by`
/// comparator over results that already carry a relevance score.
pub fn rank_results(query_text: &str, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    let needle = query_text.to_lowercase();
    results.sort_by(|a, b| compare_for_rank(&needle, a, b));
    results
}

fn compare_for_rank(needle: &str, a: &SearchResult, b: &SearchResult) -> Ordering {
    // Higher relevance first.
    match b.relevance.partial_cmp(&a.relevance) {
        Some(Ordering::Equal) | None => {}
        Some(ord) => return ord,
    }

    let a_exact = a.name.to_lowercase() == needle;
    let b_exact = b.name.to_lowercase() == needle;
    if a_exact != b_exact {
        return if a_exact { Ordering::Less } else { Ordering::Greater };
    }

    match a.name.len().cmp(&b.name.len()) {
        Ordering::Equal => a.name.cmp(&b.name),
        ord => ord,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, relevance: f64) -> SearchResult {
        SearchResult {
            name: name.to_string(),
            entity_type: EntityType::PublicEntity,
            entity_set_name: Some(name.to_string()),
            description: None,
            relevance,
            snippet: None,
        }
    }

    #[test]
    fn exact_match_wins_tie_break() {
        let results = vec![
            result("CustomerGroups", 1.0),
            result("Customers", 1.0),
        ];
        let ranked = rank_results("customers", results);
        assert_eq!(ranked[0].name, "Customers");
    }

    #[test]
    fn shorter_name_wins_when_neither_is_exact() {
        let results = vec![
            result("CustomerGroupExtended", 1.0),
            result("CustomerGroups", 1.0),
        ];
        let ranked = rank_results("customer", results);
        assert_eq!(ranked[0].name, "CustomerGroups");
    }

    #[test]
    fn relevance_takes_priority_over_tie_break() {
        let results = vec![result("Zebra", 0.2), result("Apple", 0.9)];
        let ranked = rank_results("nomatch", results);
        assert_eq!(ranked[0].name, "Apple");
    }
}
