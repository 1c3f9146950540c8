//! Pagination descriptor and next-page cursor handling.
//!
//! The loader never learns the gateway's URL shape: a next-page URL is reduced to
//! its query string with [`query_from_next`] and handed back to the gateway as-is.

/// Page descriptor as reported by the feed. `page` is zero-based.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pagination {
    pub size: usize,
    pub page_len: usize,
    pub page: usize,
    pub next: Option<String>,
}

impl Pagination {
    pub fn new(size: usize, page_len: usize, page: usize, next: Option<String>) -> Self {
        Self {
            size,
            page_len,
            page,
            next,
        }
    }

    /// Page length with the divide-by-zero guard applied.
    pub fn effective_page_len(&self) -> usize {
        self.page_len.max(1)
    }

    /// At least one page, even for an empty feed.
    pub fn total_pages(&self) -> usize {
        self.size.div_ceil(self.effective_page_len()).max(1)
    }

    /// Clamp a requested page (possibly negative) into `[0, total_pages - 1]`.
    pub fn clamp_page(&self, requested: i64) -> usize {
        let last = self.total_pages() - 1;
        usize::try_from(requested.max(0)).unwrap_or(usize::MAX).min(last)
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Query portion of a next-page URL (`"https://host/x?page=2&pagelen=10"` →
/// `"page=2&pagelen=10"`). A bare query string is returned unchanged; the fragment,
/// if any, is dropped.
pub fn query_from_next(next: &str) -> String {
    let without_fragment = next.split('#').next().unwrap_or_default();
    match without_fragment.split_once('?') {
        Some((_, query)) => query.to_string(),
        None if without_fragment.contains("://") || without_fragment.starts_with('/') => {
            String::new()
        }
        None => without_fragment.to_string(),
    }
}

/// Query for the first page of a feed.
pub fn first_page_query(page_len: usize) -> String {
    format!("page=1&pagelen={}", page_len.max(1))
}

/// Value of `key` in a query string, if present.
pub fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}
