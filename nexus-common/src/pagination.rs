use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Query-side pagination input. Out-of-range values are clamped, not rejected.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl PageParams {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> usize {
        ((self.page() - 1) * self.limit()) as usize
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self { page: None, limit: None }
    }
}

/// Pagination block attached to list envelopes.
#[derive(Debug, Clone, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    #[serde(rename = "nextPage", skip_serializing_if = "Option::is_none")]
    pub next_page: Option<u32>,
    #[serde(rename = "prevPage", skip_serializing_if = "Option::is_none")]
    pub prev_page: Option<u32>,
}

impl PageMeta {
    pub fn new(params: &PageParams, total: u64) -> Self {
        let page = params.page();
        let limit = params.limit();
        let pages = ((total + limit as u64 - 1) / limit as u64).max(1) as u32;
        let has_more = page < pages;
        Self {
            page,
            limit,
            total,
            pages,
            has_more,
            next_page: has_more.then(|| page + 1),
            prev_page: (page > 1).then(|| page - 1),
        }
    }
}

/// A page of records plus the metadata to render the envelope.
#[derive(Debug, Clone)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Paged<T> {
    /// Slice an already-ordered full result set down to the requested page.
    pub fn slice(params: &PageParams, all: Vec<T>) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(params.offset())
            .take(params.limit() as usize)
            .collect();
        Self { items, meta: PageMeta::new(params, total) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page: u32, limit: u32) -> PageParams {
        PageParams { page: Some(page), limit: Some(limit) }
    }

    #[test]
    fn limits_are_clamped() {
        let p = params(0, 5000);
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), MAX_PAGE_LIMIT);
    }

    #[test]
    fn meta_math() {
        let meta = PageMeta::new(&params(2, 10), 35);
        assert_eq!(meta.pages, 4);
        assert!(meta.has_more);
        assert_eq!(meta.next_page, Some(3));
        assert_eq!(meta.prev_page, Some(1));
    }

    #[test]
    fn slice_takes_the_right_window() {
        let all: Vec<u32> = (0..35).collect();
        let page = Paged::slice(&params(4, 10), all);
        assert_eq!(page.items, vec![30, 31, 32, 33, 34]);
        assert!(!page.meta.has_more);
        assert_eq!(page.meta.next_page, None);
    }
}
