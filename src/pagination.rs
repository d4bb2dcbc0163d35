use crate::models::PageQuery;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// SQL `LIMIT`/`OFFSET` for a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub limit: i64,
    pub offset: i64,
}

impl PageParams {
    /// `page` is zero-based. Sizes outside `1..=100` fall back to 10.
    pub fn from_query(query: &PageQuery) -> Self {
        let limit = parse_int(query.page_size.as_deref())
            .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let page = parse_int(query.page.as_deref()).unwrap_or(0).max(0);

        Self {
            limit,
            offset: limit.saturating_mul(page),
        }
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

fn parse_int(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok())
}
