use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{CaseId, CenterId, MediatorId, PendingAssignmentId};
use super::error::AssignmentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
}

impl PendingStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// A placement waiting for human approval: either a re-assignment of an
/// already assigned case or a case queued by the manual strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAssignmentRequest {
    pub id: PendingAssignmentId,
    pub case_id: CaseId,
    pub from_mediator_id: Option<MediatorId>,
    pub to_mediator_id: Option<MediatorId>,
    pub to_center_id: Option<CenterId>,
    pub reason: String,
    pub status: PendingStatus,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl PendingAssignmentRequest {
    /// Close the request. Decisions are final.
    pub(crate) fn decide(
        &mut self,
        approved: bool,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), AssignmentError> {
        if self.status != PendingStatus::Pending {
            return Err(AssignmentError::AlreadyReviewed {
                request: self.id.0,
                status: self.status.label(),
            });
        }
        self.status = if approved {
            PendingStatus::Approved
        } else {
            PendingStatus::Rejected
        };
        self.review_note = note;
        self.decided_at = Some(now);
        Ok(())
    }
}
