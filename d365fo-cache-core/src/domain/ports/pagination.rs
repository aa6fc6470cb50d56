// src/domain/ports/pagination.rs
//
// Re-architecture of the source's generator-based paginated reads (§9):
// a lazy, finite sequence abstraction with a `next_page_token` cursor,
// restartable by re-issuing the same query with the returned token.

use serde::{Deserialize, Serialize};

/// Opaque cursor into a result set. Round-trips through JSON/CLI flags as a
/// plain string so callers never need to understand its internals (today:
/// a base-10 offset encoded as text; kept opaque so the encoding can change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken(pub String);

impl PageToken {
    pub fn from_offset(offset: usize) -> Self {
        PageToken(offset.to_string())
    }

    pub fn to_offset(&self) -> usize {
        self.0.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<PageToken>,
    pub total_count: Option<u64>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            next_page_token: None,
            total_count: Some(0),
        }
    }
}

/// A query that can be re-issued against successive pages. Implementors
/// only need to know how to fetch one page at a given offset/limit; the
/// cursor bookkeeping lives here so callers just loop on `next_page_token`.
#[derive(Debug, Clone, Copy)]
pub struct PagedQuery {
    pub limit: usize,
    pub offset: usize,
}

impl PagedQuery {
    pub fn first(limit: usize) -> Self {
        PagedQuery { limit, offset: 0 }
    }

    pub fn from_token(limit: usize, token: Option<&PageToken>) -> Self {
        PagedQuery {
            limit,
            offset: token.map(PageToken::to_offset).unwrap_or(0),
        }
    }

    pub fn next(&self, returned: usize, total: Option<u64>) -> Option<PageToken> {
        let next_offset = self.offset + returned;
        let exhausted = returned < self.limit
            || total.is_some_and(|t| next_offset as u64 >= t);
        if exhausted {
            None
        } else {
            Some(PageToken::from_offset(next_offset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_offset() {
        let t = PageToken::from_offset(42);
        assert_eq!(t.to_offset(), 42);
    }

    #[test]
    fn next_is_none_on_short_page() {
        let q = PagedQuery::first(10);
        assert!(q.next(3, Some(3)).is_none());
    }

    #[test]
    fn next_advances_offset_on_full_page() {
        let q = PagedQuery::first(10);
        let tok = q.next(10, Some(100)).expect("more pages remain");
        assert_eq!(tok.to_offset(), 10);
    }
}
