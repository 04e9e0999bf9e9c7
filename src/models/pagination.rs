//! Page window for the run history listing.

use serde::{Deserialize, Serialize};

const DEFAULT_PER_PAGE: u32 = 25;
const MAX_PER_PAGE: u32 = 100;

/// `?page=&per_page=` query. Pages are 1-based; out-of-range values are
/// clamped rather than rejected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl Pagination {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }
}

/// One page of runs plus enough to render a pager.
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub has_more: bool,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let seen = pagination.offset() + items.len() as u64;
        Self {
            has_more: u64::try_from(total).unwrap_or(0) > seen,
            items,
            total,
            page: pagination.page(),
            per_page: pagination.limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_zero_page_mean_first_page() {
        assert_eq!(Pagination::default().offset(), 0);
        let zero = Pagination {
            page: Some(0),
            per_page: Some(10),
        };
        assert_eq!(zero.page(), 1);
        assert_eq!(zero.offset(), 0);
    }

    #[test]
    fn per_page_is_clamped() {
        let huge = Pagination {
            page: Some(4),
            per_page: Some(10_000),
        };
        assert_eq!(huge.limit(), 100);
        assert_eq!(huge.offset(), 300);
    }

    #[test]
    fn has_more_tracks_remaining_runs() {
        let second = Pagination {
            page: Some(2),
            per_page: Some(10),
        };
        assert!(PagedResult::new(vec![0u8; 10], 25, &second).has_more);
        let last = Pagination {
            page: Some(3),
            per_page: Some(10),
        };
        assert!(!PagedResult::new(vec![0u8; 5], 25, &last).has_more);
    }
}
