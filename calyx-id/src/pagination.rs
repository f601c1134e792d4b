//! Pagination utilities for catalogue browsing

/// Largest page size a client may request
pub const MAX_PAGE_SIZE: i64 = 100;

/// Page size used when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Sanitized page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Current page number (1-indexed)
    pub page: i64,
    /// Rows per page, within 1..=MAX_PAGE_SIZE
    pub limit: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

impl PageRequest {
    /// Clamp a raw request: `limit` into 1..=100, `page` to at least 1
    ///
    /// Unlike a bounded browser, the page is not clamped to the last page:
    /// asking past the end yields an empty page.
    ///
    /// # Examples
    /// ```
    /// use calyx_id::pagination::PageRequest;
    ///
    /// let p = PageRequest::new(3, 20);
    /// assert_eq!(p.offset, 40);
    ///
    /// let p = PageRequest::new(0, 150);
    /// assert_eq!(p.page, 1);
    /// assert_eq!(p.limit, 100);
    /// ```
    pub fn new(requested_page: i64, requested_limit: i64) -> Self {
        let limit = requested_limit.clamp(1, MAX_PAGE_SIZE);
        let page = requested_page.max(1);
        let offset = (page - 1).saturating_mul(limit);

        Self { page, limit, offset }
    }
}

/// Page metadata derived from a total row count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    /// ceil(total / limit)
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Calculate pagination metadata for `request` over `total_results` rows
pub fn calculate_pagination(total_results: i64, request: PageRequest) -> Pagination {
    let total = total_results.max(0);
    let total_pages = (total + request.limit - 1) / request.limit;

    Pagination {
        page: request.page,
        limit: request.limit,
        total_pages,
        has_next: request.page < total_pages,
        has_prev: request.page > 1,
    }
}
