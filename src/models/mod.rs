pub mod contact;
pub mod door_activity;
pub mod lead;
pub mod opportunity;
pub mod task;
pub mod user;

use serde::Serialize;

pub use contact::{Account, Contact};
pub use door_activity::{ActivityView, DoorActivity, Outcome};
pub use lead::{address_key, Lead, LeadStatus, PersonSummary};
pub use opportunity::{Opportunity, OpportunityStage};
pub use task::{by_due_date, Task, TaskPriority, TaskStatus};
pub use user::{Role, User, UserProfile};

/// Page request after defaults and bounds are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    pub const MAX_LIMIT: u64 = 100;
    pub const MAX_PAGE: u64 = 1_000_000;

    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(request: PageRequest, total: u64) -> Self {
        Pagination {
            page: request.page,
            limit: request.limit,
            total,
            pages: total.div_ceil(request.limit),
        }
    }
}

/// `{data, pagination}` envelope shared by list endpoints.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_round_up() {
        let request = PageRequest { page: 2, limit: 20 };
        assert_eq!(request.skip(), 20);
        assert_eq!(Pagination::new(request, 41).pages, 3);
        assert_eq!(Pagination::new(request, 40).pages, 2);
        assert_eq!(Pagination::new(request, 0).pages, 0);
    }

    #[test]
    fn skip_saturates_instead_of_wrapping() {
        let request = PageRequest { page: u64::MAX, limit: 100 };
        assert_eq!(request.skip(), u64::MAX);
        assert_eq!(PageRequest { page: 0, limit: 20 }.skip(), 0);
    }
}
