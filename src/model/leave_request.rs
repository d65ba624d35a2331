use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, mysql::MySqlRow};
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::leave_status::{ApprovalPolicy, LeaveAction, LeaveStatus, Transition, WorkflowError};
use crate::model::role::{Capability, Role};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, AsRefStr, Display, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DurationKind {
    FullDay,
    HalfDayAm,
    HalfDayPm,
    CustomHours,
}

impl Default for DurationKind {
    fn default() -> Self {
        DurationKind::FullDay
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, AsRefStr, Display, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Availability {
    Reachable,
    Limited,
    Unreachable,
}

impl Default for Availability {
    fn default() -> Self {
        Availability::Reachable
    }
}

/// Days charged for a request. Date range is inclusive.
///
/// Half-day and custom-hour requests always count as half a day,
/// whatever the span.
pub fn total_days(start: NaiveDate, end: NaiveDate, duration: DurationKind) -> f64 {
    match duration {
        DurationKind::FullDay => ((end - start).num_days() + 1) as f64,
        DurationKind::HalfDayAm | DurationKind::HalfDayPm | DurationKind::CustomHours => 0.5,
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeaveRequest {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 1000)]
    pub employee_id: u64,
    #[schema(example = 2)]
    pub leave_type_id: u64,
    #[schema(example = "2026-01-05", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-07", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    pub duration: DurationKind,
    #[schema(example = 3.5, nullable = true)]
    pub custom_hours: Option<f64>,
    #[schema(example = 3.0)]
    pub total_days: f64,
    pub reason: Option<String>,
    pub attachment_path: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub availability: Availability,
    pub status: LeaveStatus,
    pub manager_approver_id: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub manager_approved_at: Option<DateTime<Utc>>,
    pub manager_comments: Option<String>,
    pub hr_approver_id: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub hr_approved_at: Option<DateTime<Utc>>,
    pub hr_comments: Option<String>,
    pub cancellation_reason: Option<String>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub cancellation_requested_at: Option<DateTime<Utc>>,
    pub cancellation_hr_comments: Option<String>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub created_at: Option<DateTime<Utc>>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn parse_column<T>(row: &MySqlRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: T::Err| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, MySqlRow> for LeaveRequest {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            leave_type_id: row.try_get("leave_type_id")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            duration: parse_column(row, "duration")?,
            custom_hours: row.try_get("custom_hours")?,
            total_days: row.try_get("total_days")?,
            reason: row.try_get("reason")?,
            attachment_path: row.try_get("attachment_path")?,
            emergency_contact_name: row.try_get("emergency_contact_name")?,
            emergency_contact_phone: row.try_get("emergency_contact_phone")?,
            availability: parse_column(row, "availability")?,
            status: parse_column(row, "status")?,
            manager_approver_id: row.try_get("manager_approver_id")?,
            manager_approved_at: row.try_get("manager_approved_at")?,
            manager_comments: row.try_get("manager_comments")?,
            hr_approver_id: row.try_get("hr_approver_id")?,
            hr_approved_at: row.try_get("hr_approved_at")?,
            hr_comments: row.try_get("hr_comments")?,
            cancellation_reason: row.try_get("cancellation_reason")?,
            cancellation_requested_at: row.try_get("cancellation_requested_at")?,
            cancellation_hr_comments: row.try_get("cancellation_hr_comments")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// The caller of a workflow action.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub employee_id: Option<u64>,
    pub role: Role,
}

impl Actor {
    pub fn owns(&self, request: &LeaveRequest) -> bool {
        self.employee_id == Some(request.employee_id)
    }

    pub fn can_view(&self, request: &LeaveRequest) -> bool {
        self.owns(request) || self.role.is_reviewer()
    }
}

/// Everything about the request's leave type and the clock that a
/// transition depends on.
#[derive(Debug, Clone, Copy)]
pub struct ReviewContext {
    pub policy: ApprovalPolicy,
    pub certificate_required: bool,
    pub today: NaiveDate,
}

fn is_blank(text: Option<&str>) -> bool {
    text.map_or(true, |t| t.trim().is_empty())
}

impl LeaveRequest {
    fn authorize(&self, action: LeaveAction, actor: &Actor) -> Result<(), WorkflowError> {
        let required = match action {
            LeaveAction::Edit | LeaveAction::Cancel | LeaveAction::RequestCancellation => {
                if !actor.owns(self) {
                    return Err(WorkflowError::NotOwner(action));
                }
                return Ok(());
            }
            LeaveAction::ManagerApprove | LeaveAction::ManagerReject => Capability::ManagerApprove,
            LeaveAction::HrApprove | LeaveAction::HrReject => Capability::HrApprove,
            LeaveAction::ApproveCancellation | LeaveAction::RejectCancellation => Capability::HandleCancellation,
        };

        if !actor.role.has(required) {
            return Err(WorkflowError::NotPermitted(action));
        }
        if actor.owns(self) {
            return Err(WorkflowError::SelfReview);
        }
        Ok(())
    }

    /// Date rules, checked once the status allows `action`.
    fn check_timing(&self, action: LeaveAction, today: NaiveDate) -> Result<(), WorkflowError> {
        if action == LeaveAction::RequestCancellation && self.start_date <= today {
            return Err(WorkflowError::LeaveAlreadyStarted);
        }
        Ok(())
    }

    /// Validates `action` by `actor` against the current status and
    /// returns the transition to persist. `note` is the reviewer comment
    /// or the cancellation reason.
    pub fn plan(
        &self,
        action: LeaveAction,
        actor: &Actor,
        ctx: &ReviewContext,
        note: Option<&str>,
    ) -> Result<Transition, WorkflowError> {
        self.authorize(action, actor)?;
        let transition = self.status.next(action, ctx.policy)?;
        self.check_timing(action, ctx.today)?;

        match action {
            LeaveAction::ManagerReject | LeaveAction::HrReject if is_blank(note) => {
                return Err(WorkflowError::CommentRequired);
            }
            LeaveAction::RequestCancellation if is_blank(note) => {
                return Err(WorkflowError::ReasonRequired);
            }
            _ => {}
        }

        let finalises_approval = transition.to == LeaveStatus::Approved && transition.from != LeaveStatus::PendingCancellation;
        if finalises_approval && ctx.certificate_required && self.attachment_path.is_none() {
            return Err(WorkflowError::MedicalCertificateRequired);
        }

        Ok(transition)
    }

    /// Actions `actor` may take on this request right now.
    pub fn permitted_actions(&self, actor: &Actor, ctx: &ReviewContext) -> Vec<LeaveAction> {
        LeaveAction::iter()
            .filter(|&action| {
                self.authorize(action, actor).is_ok()
                    && self.status.next(action, ctx.policy).is_ok()
                    && self.check_timing(action, ctx.today).is_ok()
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub(crate) fn sample_request(status: LeaveStatus) -> LeaveRequest {
        LeaveRequest {
            id: 1,
            employee_id: 100,
            leave_type_id: 1,
            start_date: date("2026-03-02"),
            end_date: date("2026-03-04"),
            duration: DurationKind::FullDay,
            custom_hours: None,
            total_days: 3.0,
            reason: Some("family trip".into()),
            attachment_path: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            availability: Availability::Reachable,
            status,
            manager_approver_id: Some(7),
            manager_approved_at: None,
            manager_comments: None,
            hr_approver_id: None,
            hr_approved_at: None,
            hr_comments: None,
            cancellation_reason: None,
            cancellation_requested_at: None,
            cancellation_hr_comments: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn owner() -> Actor {
        Actor {
            employee_id: Some(100),
            role: Role::Employee,
        }
    }

    fn lead() -> Actor {
        Actor {
            employee_id: Some(200),
            role: Role::Lead,
        }
    }

    fn hr() -> Actor {
        Actor {
            employee_id: Some(300),
            role: Role::Hr,
        }
    }

    fn ctx(today: &str) -> ReviewContext {
        ReviewContext {
            policy: ApprovalPolicy::default(),
            certificate_required: false,
            today: date(today),
        }
    }

    #[test]
    fn same_day_full_day_counts_one() {
        let d = date("2026-05-11");
        assert_eq!(total_days(d, d, DurationKind::FullDay), 1.0);
        assert_eq!(total_days(d, date("2026-05-15"), DurationKind::FullDay), 5.0);
    }

    #[test]
    fn partial_days_are_half_whatever_the_span() {
        let start = date("2026-05-11");
        for end in [start, date("2026-05-12"), date("2026-06-30")] {
            for kind in [DurationKind::HalfDayAm, DurationKind::HalfDayPm, DurationKind::CustomHours] {
                assert_eq!(total_days(start, end, kind), 0.5);
            }
        }
    }

    #[test]
    fn lead_may_approve_any_pending_manager_request() {
        let req = sample_request(LeaveStatus::PendingManager);
        let t = req
            .plan(LeaveAction::ManagerApprove, &lead(), &ctx("2026-02-01"), None)
            .unwrap();
        assert_eq!(t.to, LeaveStatus::PendingHr);
    }

    #[test]
    fn lead_cannot_give_hr_approval() {
        let req = sample_request(LeaveStatus::PendingHr);
        let err = req
            .plan(LeaveAction::HrApprove, &lead(), &ctx("2026-02-01"), None)
            .unwrap_err();
        assert_eq!(err, WorkflowError::NotPermitted(LeaveAction::HrApprove));
    }

    #[test]
    fn reviewers_cannot_review_their_own_request() {
        let mut req = sample_request(LeaveStatus::PendingHr);
        req.employee_id = 300;
        let err = req
            .plan(LeaveAction::HrApprove, &hr(), &ctx("2026-02-01"), None)
            .unwrap_err();
        assert_eq!(err, WorkflowError::SelfReview);
    }

    #[test]
    fn rejection_requires_a_comment() {
        let req = sample_request(LeaveStatus::PendingManager);
        for note in [None, Some(""), Some("   ")] {
            let err = req
                .plan(LeaveAction::ManagerReject, &lead(), &ctx("2026-02-01"), note)
                .unwrap_err();
            assert_eq!(err, WorkflowError::CommentRequired);
        }
        let t = req
            .plan(LeaveAction::ManagerReject, &lead(), &ctx("2026-02-01"), Some("team offsite"))
            .unwrap();
        assert_eq!(t.to, LeaveStatus::RejectedByManager);

        let req = sample_request(LeaveStatus::PendingHr);
        let err = req
            .plan(LeaveAction::HrReject, &hr(), &ctx("2026-02-01"), Some(" "))
            .unwrap_err();
        assert_eq!(err, WorkflowError::CommentRequired);
    }

    #[test]
    fn cancellation_request_needs_reason_and_future_start() {
        let req = sample_request(LeaveStatus::Approved);

        let err = req
            .plan(LeaveAction::RequestCancellation, &owner(), &ctx("2026-02-01"), Some(""))
            .unwrap_err();
        assert_eq!(err, WorkflowError::ReasonRequired);

        // start_date is 2026-03-02; the same day is already too late
        let err = req
            .plan(LeaveAction::RequestCancellation, &owner(), &ctx("2026-03-02"), Some("plans changed"))
            .unwrap_err();
        assert_eq!(err, WorkflowError::LeaveAlreadyStarted);

        let t = req
            .plan(LeaveAction::RequestCancellation, &owner(), &ctx("2026-03-01"), Some("plans changed"))
            .unwrap();
        assert_eq!(t.to, LeaveStatus::PendingCancellation);
    }

    #[test]
    fn started_pending_request_reports_the_status_not_the_date() {
        let req = sample_request(LeaveStatus::PendingManager);
        let err = req
            .plan(LeaveAction::RequestCancellation, &owner(), &ctx("2026-03-05"), Some("plans changed"))
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidTransition {
                from: LeaveStatus::PendingManager,
                action: LeaveAction::RequestCancellation,
            }
        );
    }

    #[test]
    fn only_the_owner_cancels_or_edits() {
        let req = sample_request(LeaveStatus::PendingManager);
        let err = req
            .plan(LeaveAction::Cancel, &hr(), &ctx("2026-02-01"), None)
            .unwrap_err();
        assert_eq!(err, WorkflowError::NotOwner(LeaveAction::Cancel));

        assert!(req.plan(LeaveAction::Edit, &owner(), &ctx("2026-02-01"), None).is_ok());
        assert!(req.plan(LeaveAction::Cancel, &owner(), &ctx("2026-02-01"), None).is_ok());
    }

    #[test]
    fn medical_certificate_blocks_final_approval_until_attached() {
        let mut req = sample_request(LeaveStatus::PendingHr);
        let mut context = ctx("2026-02-01");
        context.certificate_required = true;

        let err = req
            .plan(LeaveAction::HrApprove, &hr(), &context, None)
            .unwrap_err();
        assert_eq!(err, WorkflowError::MedicalCertificateRequired);

        req.attachment_path = Some("abc.pdf".into());
        assert!(req.plan(LeaveAction::HrApprove, &hr(), &context, None).is_ok());
    }

    #[test]
    fn permitted_actions_depend_on_caller() {
        let req = sample_request(LeaveStatus::PendingManager);
        let c = ctx("2026-02-01");

        assert_eq!(
            req.permitted_actions(&owner(), &c),
            vec![LeaveAction::Edit, LeaveAction::Cancel]
        );
        assert_eq!(
            req.permitted_actions(&lead(), &c),
            vec![LeaveAction::ManagerApprove, LeaveAction::ManagerReject]
        );

        let req = sample_request(LeaveStatus::PendingCancellation);
        assert_eq!(
            req.permitted_actions(&hr(), &c),
            vec![LeaveAction::ApproveCancellation, LeaveAction::RejectCancellation]
        );
        assert!(req.permitted_actions(&lead(), &c).is_empty());
    }

    #[test]
    fn approved_request_offers_cancellation_only_before_start() {
        let req = sample_request(LeaveStatus::Approved);
        assert_eq!(
            req.permitted_actions(&owner(), &ctx("2026-02-01")),
            vec![LeaveAction::RequestCancellation]
        );
        assert!(req.permitted_actions(&owner(), &ctx("2026-03-03")).is_empty());
    }

    #[test]
    fn visibility_is_owner_or_reviewer() {
        let req = sample_request(LeaveStatus::PendingManager);
        let stranger = Actor {
            employee_id: Some(999),
            role: Role::Employee,
        };
        assert!(req.plan(LeaveAction::Edit, &stranger, &ctx("2026-02-01"), None).is_err());
        assert!(!stranger.can_view(&req));
        assert!(owner().can_view(&req));
        assert!(lead().can_view(&req));
    }
}
