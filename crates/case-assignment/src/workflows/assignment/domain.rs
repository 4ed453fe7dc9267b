use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                raw.trim().parse().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a debt-collection case owned by the case-management module.
    CaseId
);
numeric_id!(
    /// Identifier of an individual mediator.
    MediatorId
);
numeric_id!(
    /// Identifier of a mediation center.
    CenterId
);
numeric_id!(RuleId);
numeric_id!(TaskId);
numeric_id!(PendingAssignmentId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseAssignmentStatus {
    Unassigned,
    Assigned,
}

impl CaseAssignmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unassigned => "unassigned",
            Self::Assigned => "assigned",
        }
    }
}

/// Read-only view of a case as supplied by the case directory.
///
/// Only the fields that assignment conditions can reference are carried here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub case_no: String,
    pub debt_amount: f64,
    pub overdue_days: u32,
    pub debtor_age: Option<u32>,
    pub debtor_gender: Option<String>,
    pub debtor_region: String,
    pub case_type: String,
    pub client_id: u64,
    pub created_on: NaiveDate,
    pub assignment_status: CaseAssignmentStatus,
    pub mediator_id: Option<MediatorId>,
    pub center_id: Option<CenterId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mediator {
    pub id: MediatorId,
    pub name: String,
    pub center_id: CenterId,
    pub specialties: Vec<String>,
    pub current_load: u32,
    pub max_load: u32,
    pub success_rate: f32,
    pub status: DirectoryStatus,
}

impl Mediator {
    pub fn is_active(&self) -> bool {
        self.status == DirectoryStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediationCenter {
    pub id: CenterId,
    pub name: String,
    pub region: String,
    pub status: DirectoryStatus,
}

impl MediationCenter {
    pub fn is_active(&self) -> bool {
        self.status == DirectoryStatus::Active
    }
}

/// 1-based page request shared by every list operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: 10 }
    }
}

impl PageRequest {
    /// Clamp the request so `page >= 1` and `1 <= size <= max_size`.
    pub fn clamped(self, max_size: u32) -> Self {
        Self {
            page: self.page.max(1),
            size: self.size.clamp(1, max_size.max(1)),
        }
    }
}

/// One page of records plus the total count of the filtered set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total: usize,
    pub size: u32,
    pub current: u32,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn paginate(items: Vec<T>, request: PageRequest) -> Self {
        let total = items.len();
        let size = request.size.max(1);
        let current = request.page.max(1);
        let start = (current as usize - 1).saturating_mul(size as usize);
        let records = items
            .into_iter()
            .skip(start)
            .take(size as usize)
            .collect();
        let pages = total.div_ceil(size as usize) as u32;

        Self {
            records,
            total,
            size,
            current,
            pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            records: self.records.into_iter().map(f).collect(),
            total: self.total,
            size: self.size,
            current: self.current,
            pages: self.pages,
        }
    }
}

/// Timestamp helper so every record in the subsystem uses the same clock.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_reports_total_and_page_count() {
        let page = Page::paginate((1..=23).collect::<Vec<_>>(), PageRequest { page: 3, size: 10 });
        assert_eq!(page.records, vec![21, 22, 23]);
        assert_eq!(page.total, 23);
        assert_eq!(page.pages, 3);
        assert_eq!(page.current, 3);
    }

    #[test]
    fn paginate_past_the_end_is_empty() {
        let page = Page::paginate(vec![1, 2], PageRequest { page: 4, size: 5 });
        assert!(page.records.is_empty());
        assert_eq!(page.total, 2);
        assert_eq!(page.pages, 1);
    }

    #[test]
    fn clamped_request_respects_limits() {
        let request = PageRequest { page: 0, size: 500 }.clamped(100);
        assert_eq!(request, PageRequest { page: 1, size: 100 });
    }

    #[test]
    fn ids_parse_from_path_segments() {
        assert_eq!(" 42 ".parse::<TaskId>(), Ok(TaskId(42)));
        assert!("abc".parse::<MediatorId>().is_err());
    }
}
