//! Pagination utilities for the log listings
//!
//! Pages are 1-indexed. Requests past the last page clamp to the last page so
//! infinite-scroll clients never receive an offset beyond the data.

use serde::{Deserialize, Serialize};

/// Page size used when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound on a requested page size
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?page=&limit=` query parameters
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }
    }
}

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    /// Rows per page after clamping
    pub page_size: i64,
    /// Total number of pages
    pub total_pages: i64,
    /// Total number of rows
    pub total_items: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

/// Calculate pagination metadata from total results and requested page
///
/// # Examples
/// ```
/// use taskpulse_server::pagination::{calculate_pagination, PageRequest};
///
/// // 45 results at 20 per page = 3 pages (20 + 20 + 5)
/// let p = calculate_pagination(45, PageRequest::new(2, 20));
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 20);
///
/// // Requesting out-of-bounds page gets clamped
/// let p = calculate_pagination(45, PageRequest::new(99, 20));
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 40);
/// ```
pub fn calculate_pagination(total_items: i64, request: PageRequest) -> Pagination {
    let page_size = request.limit.clamp(1, MAX_PAGE_SIZE);
    let total_items = total_items.max(0);
    let total_pages = (total_items + page_size - 1) / page_size;
    let page = request.page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * page_size;

    Pagination {
        page,
        page_size,
        total_pages,
        total_items,
        offset,
    }
}

/// Pagination block returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl From<Pagination> for PageMeta {
    fn from(p: Pagination) -> Self {
        Self {
            current_page: p.page,
            total_pages: p.total_pages,
            total_items: p.total_items,
            has_next_page: p.page < p.total_pages,
            has_prev_page: p.page > 1,
        }
    }
}

/// One page of items plus its metadata
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_normal() {
        let p = calculate_pagination(250, PageRequest::new(2, 100));
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.offset, 100);
    }

    #[test]
    fn test_pagination_out_of_bounds_high() {
        let p = calculate_pagination(150, PageRequest::new(99, 100));
        assert_eq!(p.page, 2); // Clamped to last page
        assert_eq!(p.offset, 100);
    }

    #[test]
    fn test_pagination_out_of_bounds_low() {
        let p = calculate_pagination(150, PageRequest::new(0, 100));
        assert_eq!(p.page, 1); // Clamped to first page
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_pagination_empty() {
        let p = calculate_pagination(0, PageRequest::default());
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 0);
        assert_eq!(p.offset, 0);

        let meta = PageMeta::from(p);
        assert!(!meta.has_next_page);
        assert!(!meta.has_prev_page);
    }

    #[test]
    fn test_limit_is_clamped() {
        let p = calculate_pagination(1000, PageRequest::new(1, 5000));
        assert_eq!(p.page_size, MAX_PAGE_SIZE);
        let p = calculate_pagination(10, PageRequest::new(1, 0));
        assert_eq!(p.page_size, 1);
        assert_eq!(p.total_pages, 10);
    }

    #[test]
    fn test_page_meta_flags() {
        let meta = PageMeta::from(calculate_pagination(45, PageRequest::new(2, 20)));
        assert_eq!(
            meta,
            PageMeta {
                current_page: 2,
                total_pages: 3,
                total_items: 45,
                has_next_page: true,
                has_prev_page: true,
            }
        );

        let last = PageMeta::from(calculate_pagination(45, PageRequest::new(3, 20)));
        assert!(!last.has_next_page);
    }
}
