//! Leave request lifecycle.
//!
//! ```text
//! submit ─► pending_manager ─► pending_hr ─► approved ─► pending_cancellation ─► cancelled
//!               │    │             │   │         ▲                │
//!               │    ▼             │   ▼         └────────────────┘ (cancellation rejected)
//!               │  rejected_by_manager  rejected_by_hr
//!               └──────────┴─► cancelled (owner self-cancel before approval)
//! ```
//!
//! The leave type's approval flags may move the entry point forward
//! (`pending_hr` or straight to `approved`) and let manager approval
//! finish the request when HR review is not required. A type that
//! requires HR review never reaches `approved` without `pending_hr`.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString, EnumIter, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveStatus {
    PendingManager,
    PendingHr,
    Approved,
    RejectedByManager,
    RejectedByHr,
    PendingCancellation,
    Cancelled,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString, EnumIter, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveAction {
    Edit,
    Cancel,
    ManagerApprove,
    ManagerReject,
    HrApprove,
    HrReject,
    RequestCancellation,
    ApproveCancellation,
    RejectCancellation,
}

/// Ledger side effect of a transition, applied with the request's `total_days`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BalanceEffect {
    None,
    Debit,
    Credit,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Transition {
    pub from: LeaveStatus,
    pub to: LeaveStatus,
    pub effect: BalanceEffect,
}

/// Which review stages a leave type requires.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ApprovalPolicy {
    pub requires_manager: bool,
    pub requires_hr: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            requires_manager: true,
            requires_hr: true,
        }
    }
}

impl ApprovalPolicy {
    /// Status a fresh submission lands in.
    pub fn on_submit(&self) -> (LeaveStatus, BalanceEffect) {
        if self.requires_manager {
            (LeaveStatus::PendingManager, BalanceEffect::None)
        } else if self.requires_hr {
            (LeaveStatus::PendingHr, BalanceEffect::None)
        } else {
            (LeaveStatus::Approved, BalanceEffect::Debit)
        }
    }

    /// Neither stage required: requests are approved on submission.
    pub fn is_auto_approved(&self) -> bool {
        !self.requires_manager && !self.requires_hr
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {action} a request that is {from}")]
    InvalidTransition { from: LeaveStatus, action: LeaveAction },
    #[error("you are not allowed to {0} this request")]
    NotPermitted(LeaveAction),
    #[error("only the owner may {0} this request")]
    NotOwner(LeaveAction),
    #[error("you cannot review your own leave request")]
    SelfReview,
    #[error("a comment is required to reject a request")]
    CommentRequired,
    #[error("a reason is required to request cancellation")]
    ReasonRequired,
    #[error("cancellation can only be requested before the leave starts")]
    LeaveAlreadyStarted,
    #[error("a medical certificate must be attached before the leave can be approved")]
    MedicalCertificateRequired,
}

impl LeaveStatus {
    /// Statuses whose days are counted as used in the ledger.
    pub fn holds_balance(self) -> bool {
        matches!(self, LeaveStatus::Approved | LeaveStatus::PendingCancellation)
    }

    /// Pure transition table. Actor, ownership and input checks live on
    /// `LeaveRequest::plan`.
    pub fn next(self, action: LeaveAction, policy: ApprovalPolicy) -> Result<Transition, WorkflowError> {
        use BalanceEffect as E;
        use LeaveAction as A;
        use LeaveStatus as S;

        let (to, effect) = match (self, action) {
            (S::PendingManager, A::Edit) => (S::PendingManager, E::None),
            (S::PendingManager, A::ManagerApprove) if policy.requires_hr => (S::PendingHr, E::None),
            (S::PendingManager, A::ManagerApprove) => (S::Approved, E::Debit),
            (S::PendingManager, A::ManagerReject) => (S::RejectedByManager, E::None),
            (S::PendingManager | S::PendingHr, A::Cancel) => (S::Cancelled, E::None),
            (S::PendingHr, A::HrApprove) => (S::Approved, E::Debit),
            (S::PendingHr, A::HrReject) => (S::RejectedByHr, E::None),
            (S::Approved, A::RequestCancellation) => (S::PendingCancellation, E::None),
            (S::PendingCancellation, A::ApproveCancellation) => (S::Cancelled, E::Credit),
            (S::PendingCancellation, A::RejectCancellation) => (S::Approved, E::None),
            (from, action) => return Err(WorkflowError::InvalidTransition { from, action }),
        };

        Ok(Transition {
            from: self,
            to,
            effect,
        })
    }
}

impl TryFrom<String> for LeaveStatus {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
