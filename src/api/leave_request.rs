use crate::api::leave_balance::{apply_balance_effect, find_balance};
use crate::auth::auth::AuthUser;
use crate::bind_values;
use crate::config::Config;
use crate::error::{AppError, FieldErrors, field_errors};
use crate::model::employee::{Employee, find_employee};
use crate::model::leave_request::{Actor, Availability, DurationKind, LeaveRequest, ReviewContext, total_days};
use crate::model::leave_status::{BalanceEffect, LeaveAction, LeaveStatus};
use crate::model::leave_type::LeaveType;
use crate::model::role::{Capability, Role};
use crate::utils::db_utils::{Page, SqlFilter};
use crate::utils::leave_type_cache::find_leave_type;
use actix_web::{HttpRequest, HttpResponse, http::header, web};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool};
use std::path::PathBuf;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

const LEAVE_COLUMNS: &str = "id, employee_id, leave_type_id, start_date, end_date, duration, custom_hours, \
    total_days, reason, attachment_path, emergency_contact_name, emergency_contact_phone, availability, \
    status, manager_approver_id, manager_approved_at, manager_comments, hr_approver_id, hr_approved_at, \
    hr_comments, cancellation_reason, cancellation_requested_at, cancellation_hr_comments, created_at, updated_at";

/* =========================
Payloads and views
========================= */

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "leave_type_id": 1,
    "start_date": "2026-03-02",
    "end_date": "2026-03-04",
    "duration": "full_day",
    "reason": "Family trip",
    "availability": "limited"
}))]
pub struct LeavePayload {
    pub leave_type_id: Option<u64>,
    #[schema(format = "date", value_type = Option<String>)]
    pub start_date: Option<NaiveDate>,
    #[schema(format = "date", value_type = Option<String>)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration: DurationKind,
    /// Required when `duration` is `custom_hours`
    pub custom_hours: Option<f64>,
    #[validate(length(max = 1000, message = "Reason must be at most 1000 characters"))]
    pub reason: Option<String>,
    #[validate(length(max = 100, message = "Contact name must be at most 100 characters"))]
    pub emergency_contact_name: Option<String>,
    #[validate(length(max = 30, message = "Contact phone must be at most 30 characters"))]
    pub emergency_contact_phone: Option<String>,
    #[serde(default)]
    pub availability: Availability,
    /// User id of the first-stage approver; defaults to the employee's manager
    pub manager_approver_id: Option<u64>,
}

/// A payload that passed field validation, with the derived day count.
#[derive(Debug, Clone, PartialEq)]
struct Submission {
    leave_type_id: u64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    duration: DurationKind,
    custom_hours: Option<f64>,
    total_days: f64,
}

impl Submission {
    /// Ledger year the request is charged to.
    fn year(&self) -> i32 {
        self.start_date.year()
    }
}

fn push_error(errors: &mut FieldErrors, field: &str, message: &str) {
    errors.entry(field.to_string()).or_default().push(message.to_string());
}

fn clean(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

impl LeavePayload {
    /// Field and cross-field validation. The client's own total, if any,
    /// is never trusted.
    fn check(&self) -> Result<Submission, AppError> {
        let mut errors = self.validate().err().map(|e| field_errors(&e)).unwrap_or_default();

        if self.leave_type_id.is_none() {
            push_error(&mut errors, "leave_type_id", "Leave type is required");
        }
        if self.start_date.is_none() {
            push_error(&mut errors, "start_date", "Start date is required");
        }
        if self.end_date.is_none() {
            push_error(&mut errors, "end_date", "End date is required");
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                push_error(&mut errors, "end_date", "End date must be on or after the start date");
            }
        }

        let custom_hours = match (self.duration, self.custom_hours) {
            (DurationKind::CustomHours, None) => {
                push_error(&mut errors, "custom_hours", "Hours are required for a custom duration");
                None
            }
            (DurationKind::CustomHours, Some(h)) if !(h > 0.0 && h <= 24.0) => {
                push_error(&mut errors, "custom_hours", "Hours must be greater than 0 and at most 24");
                None
            }
            (DurationKind::CustomHours, hours) => hours,
            _ => None,
        };

        match (self.leave_type_id, self.start_date, self.end_date) {
            (Some(leave_type_id), Some(start_date), Some(end_date)) if errors.is_empty() => Ok(Submission {
                leave_type_id,
                start_date,
                end_date,
                duration: self.duration,
                custom_hours,
                total_days: total_days(start_date, end_date, self.duration),
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReviewNote {
    /// Reviewer comment; required for rejections
    #[schema(example = "Enjoy your time off")]
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancellationNote {
    /// Required when asking to cancel approved leave
    #[schema(example = "Trip postponed")]
    pub reason: Option<String>,
}

/// A request as seen by one caller.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaveView {
    pub request: LeaveRequest,
    #[schema(example = "Annual Leave")]
    pub leave_type_name: String,
    pub certificate_required: bool,
    /// Actions the caller may perform right now
    pub permitted_actions: Vec<LeaveAction>,
}

fn review_context(leave_type: &LeaveType, request: &LeaveRequest) -> ReviewContext {
    ReviewContext {
        policy: leave_type.approval_policy(),
        certificate_required: leave_type.certificate_required_for(request.total_days),
        today: Utc::now().date_naive(),
    }
}

impl LeaveView {
    fn build(request: LeaveRequest, leave_type: &LeaveType, actor: &Actor) -> Self {
        let ctx = review_context(leave_type, &request);
        Self {
            permitted_actions: request.permitted_actions(actor, &ctx),
            certificate_required: ctx.certificate_required,
            leave_type_name: leave_type.name.clone(),
            request,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct LeavePreview {
    #[schema(example = 3.0)]
    pub total_days: f64,
    #[schema(example = 2026)]
    pub year: i32,
    /// `None` for unpaid leave types
    #[schema(example = 12.5)]
    pub remaining_days: Option<f64>,
    pub sufficient: bool,
    pub certificate_required: bool,
    pub initial_status: LeaveStatus,
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct LeaveFilter {
    #[schema(example = 1000)]
    /// Filter by employee (reviewers only; others always see their own)
    pub employee_id: Option<u64>,
    /// Filter by leave type
    pub leave_type_id: Option<u64>,
    #[schema(example = "pending_hr")]
    /// Filter by workflow status
    pub status: Option<String>,
    #[schema(example = 2026)]
    /// Year of the start date
    pub year: Option<i32>,
    #[schema(example = 1)]
    /// Pagination page number (start with 1)
    pub page: Option<u64>,
    #[schema(example = 10)]
    /// Pagination per page number
    pub per_page: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct LeaveListResponse {
    pub data: Vec<LeaveRequest>,
    #[schema(example = 1)]
    pub page: u64,
    #[schema(example = 10)]
    pub per_page: u64,
    #[schema(example = 1)]
    pub total: i64,
}

/* =========================
Lookups
========================= */

fn not_found() -> AppError {
    AppError::NotFound("Leave request not found".into())
}

async fn fetch_request(pool: &MySqlPool, id: u64) -> Result<Option<LeaveRequest>, sqlx::Error> {
    sqlx::query_as::<_, LeaveRequest>(&format!("SELECT {LEAVE_COLUMNS} FROM leave_requests WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

async fn lock_request(conn: &mut MySqlConnection, id: u64) -> Result<Option<LeaveRequest>, sqlx::Error> {
    sqlx::query_as::<_, LeaveRequest>(&format!(
        "SELECT {LEAVE_COLUMNS} FROM leave_requests WHERE id = ? FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
}

/// The request if it exists and the caller may see it. Hidden requests
/// look missing.
async fn visible_request(pool: &MySqlPool, id: u64, actor: &Actor) -> Result<LeaveRequest, AppError> {
    fetch_request(pool, id)
        .await?
        .filter(|r| actor.can_view(r))
        .ok_or_else(not_found)
}

async fn load_type(pool: &MySqlPool, id: u64) -> Result<LeaveType, AppError> {
    find_leave_type(pool, id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("leave type {id} referenced but missing")))
}

async fn current_employee(auth: &AuthUser, pool: &MySqlPool) -> Result<Employee, AppError> {
    let employee_id = auth.require_employee()?;
    find_employee(pool, employee_id)
        .await?
        .filter(|e| e.is_active)
        .ok_or_else(|| AppError::Forbidden("Employee profile is missing or inactive".into()))
}

/// Active leave type the employee is allowed to request.
async fn eligible_type(pool: &MySqlPool, employee: &Employee, leave_type_id: u64) -> Result<LeaveType, AppError> {
    let leave_type = find_leave_type(pool, leave_type_id)
        .await?
        .filter(|t| t.is_active)
        .ok_or_else(|| AppError::field("leave_type_id", "Selected leave type is not available"))?;

    if !leave_type.is_available_to(employee.gender) {
        return Err(AppError::field("leave_type_id", "This leave type is not available to you"));
    }
    Ok(leave_type)
}

/// Remaining days for the submission's year; `None` for unpaid types.
async fn remaining_for(
    pool: &MySqlPool,
    employee_id: u64,
    leave_type: &LeaveType,
    submission: &Submission,
) -> Result<Option<f64>, AppError> {
    if !leave_type.is_paid {
        return Ok(None);
    }
    let year = submission.year();
    let balance = find_balance(pool, employee_id, leave_type.id, year)
        .await?
        .ok_or_else(|| AppError::field("leave_type_id", format!("No {} balance allocated for {year}", leave_type.code)))?;
    Ok(Some(balance.remaining_days))
}

async fn ensure_balance(
    pool: &MySqlPool,
    employee_id: u64,
    leave_type: &LeaveType,
    submission: &Submission,
) -> Result<(), AppError> {
    match remaining_for(pool, employee_id, leave_type, submission).await? {
        Some(remaining) if remaining < submission.total_days => Err(AppError::InsufficientBalance {
            remaining,
            requested: submission.total_days,
        }),
        _ => Ok(()),
    }
}

/// Validates an explicitly chosen approver, or falls back to the user
/// account of the employee's manager.
async fn resolve_manager_approver(
    pool: &MySqlPool,
    employee: &Employee,
    requested: Option<u64>,
) -> Result<Option<u64>, AppError> {
    if let Some(user_id) = requested {
        let row = sqlx::query_as::<_, (u8, Option<u64>)>(
            "SELECT role_id, employee_id FROM users WHERE id = ? AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        let (role_id, approver_employee) =
            row.ok_or_else(|| AppError::field("manager_approver_id", "Unknown approver"))?;
        if !Role::from_id(role_id).is_some_and(|r| r.has(Capability::ManagerApprove)) {
            return Err(AppError::field("manager_approver_id", "Selected user cannot approve leave"));
        }
        if approver_employee == Some(employee.id) {
            return Err(AppError::field("manager_approver_id", "You cannot approve your own leave"));
        }
        return Ok(Some(user_id));
    }

    let Some(manager_id) = employee.manager_id else {
        return Ok(None);
    };
    let approver = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM users WHERE employee_id = ? AND is_active = TRUE ORDER BY id LIMIT 1",
    )
    .bind(manager_id)
    .fetch_optional(pool)
    .await?;
    Ok(approver)
}

/* =========================
Apply / preview / edit
========================= */

/// Apply for leave
#[utoipa::path(
    post,
    path = "/api/leave",
    request_body(content = LeavePayload, description = "Leave request payload", content_type = "application/json"),
    responses(
        (status = 201, description = "Leave request submitted", body = LeaveView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile"),
        (status = 422, description = "Validation failed or insufficient balance")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn create_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<LeavePayload>,
) -> Result<HttpResponse, AppError> {
    let pool = pool.get_ref();
    let employee = current_employee(&auth, pool).await?;
    let submission = payload.check()?;
    let leave_type = eligible_type(pool, &employee, submission.leave_type_id).await?;
    ensure_balance(pool, employee.id, &leave_type, &submission).await?;
    let manager_approver_id = resolve_manager_approver(pool, &employee, payload.manager_approver_id).await?;

    let (status, effect) = leave_type.approval_policy().on_submit();

    let mut tx = pool.begin().await?;

    if leave_type.is_paid && effect != BalanceEffect::None {
        apply_balance_effect(
            &mut tx,
            (employee.id, leave_type.id),
            submission.year(),
            effect,
            submission.total_days,
        )
        .await?;
    }

    let done = sqlx::query(
        r#"
        INSERT INTO leave_requests
            (employee_id, leave_type_id, start_date, end_date, duration, custom_hours, total_days,
             reason, emergency_contact_name, emergency_contact_phone, availability, status, manager_approver_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee.id)
    .bind(leave_type.id)
    .bind(submission.start_date)
    .bind(submission.end_date)
    .bind(submission.duration.as_ref())
    .bind(submission.custom_hours)
    .bind(submission.total_days)
    .bind(clean(payload.reason.as_deref()))
    .bind(clean(payload.emergency_contact_name.as_deref()))
    .bind(clean(payload.emergency_contact_phone.as_deref()))
    .bind(payload.availability.as_ref())
    .bind(status.as_ref())
    .bind(manager_approver_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let leave_id = done.last_insert_id();
    info!(
        leave_id,
        employee_id = employee.id,
        leave_type = %leave_type.code,
        total_days = submission.total_days,
        %status,
        "Leave request submitted"
    );

    let request = fetch_request(pool, leave_id).await?.ok_or_else(not_found)?;
    Ok(HttpResponse::Created().json(LeaveView::build(request, &leave_type, &auth.actor())))
}

/// Compute days and check the balance without submitting
#[utoipa::path(
    post,
    path = "/api/leave/preview",
    request_body = LeavePayload,
    responses(
        (status = 200, description = "Computed totals", body = LeavePreview),
        (status = 422, description = "Validation failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn preview_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<LeavePayload>,
) -> Result<HttpResponse, AppError> {
    let pool = pool.get_ref();
    let employee = current_employee(&auth, pool).await?;
    let submission = payload.check()?;
    let leave_type = eligible_type(pool, &employee, submission.leave_type_id).await?;
    let remaining_days = remaining_for(pool, employee.id, &leave_type, &submission).await?;

    Ok(HttpResponse::Ok().json(LeavePreview {
        total_days: submission.total_days,
        year: submission.year(),
        remaining_days,
        sufficient: remaining_days.map_or(true, |r| r >= submission.total_days),
        certificate_required: leave_type.certificate_required_for(submission.total_days),
        initial_status: leave_type.approval_policy().on_submit().0,
    }))
}

/// Edit own request while it awaits the manager
#[utoipa::path(
    put,
    path = "/api/leave/{id}",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body = LeavePayload,
    responses(
        (status = 200, description = "Leave request updated", body = LeaveView),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Leave request not found"),
        (status = 409, description = "Request is no longer editable"),
        (status = 422, description = "Validation failed or insufficient balance")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn update_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<LeavePayload>,
) -> Result<HttpResponse, AppError> {
    let pool = pool.get_ref();
    let leave_id = path.into_inner();
    let actor = auth.actor();

    let current = visible_request(pool, leave_id, &actor).await?;
    let current_type = load_type(pool, current.leave_type_id).await?;
    current.plan(LeaveAction::Edit, &actor, &review_context(&current_type, &current), None)?;

    let employee = current_employee(&auth, pool).await?;
    let submission = payload.check()?;
    let leave_type = eligible_type(pool, &employee, submission.leave_type_id).await?;
    if leave_type.approval_policy().on_submit().0 != LeaveStatus::PendingManager {
        return Err(AppError::field(
            "leave_type_id",
            "Cannot switch to a leave type with a different approval flow",
        ));
    }
    ensure_balance(pool, employee.id, &leave_type, &submission).await?;
    let manager_approver_id = match payload.manager_approver_id {
        Some(_) => resolve_manager_approver(pool, &employee, payload.manager_approver_id).await?,
        None => current.manager_approver_id,
    };

    let updated = sqlx::query(
        r#"
        UPDATE leave_requests
        SET leave_type_id = ?, start_date = ?, end_date = ?, duration = ?, custom_hours = ?, total_days = ?,
            reason = ?, emergency_contact_name = ?, emergency_contact_phone = ?, availability = ?,
            manager_approver_id = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(leave_type.id)
    .bind(submission.start_date)
    .bind(submission.end_date)
    .bind(submission.duration.as_ref())
    .bind(submission.custom_hours)
    .bind(submission.total_days)
    .bind(clean(payload.reason.as_deref()))
    .bind(clean(payload.emergency_contact_name.as_deref()))
    .bind(clean(payload.emergency_contact_phone.as_deref()))
    .bind(payload.availability.as_ref())
    .bind(manager_approver_id)
    .bind(leave_id)
    .bind(LeaveStatus::PendingManager.as_ref())
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict("Leave request was changed by someone else; reload and retry".into()));
    }

    info!(leave_id, total_days = submission.total_days, "Leave request edited");

    let request = fetch_request(pool, leave_id).await?.ok_or_else(not_found)?;
    Ok(HttpResponse::Ok().json(LeaveView::build(request, &leave_type, &actor)))
}

/* =========================
Read
========================= */

/// Get a leave request with the caller's permitted actions
#[utoipa::path(
    get,
    path = "/api/leave/{id}",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave request found", body = LeaveView),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Leave request not found", body = Object, example = json!({
            "message": "Leave request not found"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn get_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let actor = auth.actor();
    let request = visible_request(pool.get_ref(), path.into_inner(), &actor).await?;
    let leave_type = load_type(pool.get_ref(), request.leave_type_id).await?;
    Ok(HttpResponse::Ok().json(LeaveView::build(request, &leave_type, &actor)))
}

/// List leave requests
#[utoipa::path(
    get,
    path = "/api/leave",
    params(LeaveFilter),
    responses(
        (status = 200, description = "Paginated leave list", body = LeaveListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Unknown status")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn leave_list(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<LeaveFilter>,
) -> Result<HttpResponse, AppError> {
    let employee_id = if auth.role.is_reviewer() {
        query.employee_id
    } else {
        Some(auth.require_employee()?)
    };
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<LeaveStatus>()
                .map_err(|_| AppError::field("status", format!("Unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let page = Page::new(query.page, query.per_page);

    let mut filter = SqlFilter::new();
    filter
        .push_opt("employee_id = ?", employee_id)
        .push_opt("leave_type_id = ?", query.leave_type_id)
        .push_opt("status = ?", status.map(|s| s.as_ref().to_string()))
        .push_opt("YEAR(start_date) = ?", query.year);
    let where_sql = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM leave_requests{where_sql}");
    let total = bind_values!(sqlx::query_scalar::<_, i64>(&count_sql), filter.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {LEAVE_COLUMNS} FROM leave_requests{where_sql} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let data = bind_values!(sqlx::query_as::<_, LeaveRequest>(&data_sql), filter.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(LeaveListResponse {
        data,
        page: page.page,
        per_page: page.per_page,
        total,
    }))
}

/* =========================
Workflow transitions
========================= */

/// Extra columns recorded with a transition. The fragment binds the acting
/// user first when the flag is set, then the note.
fn audit_columns(action: LeaveAction) -> (&'static str, bool) {
    use LeaveAction as A;
    match action {
        A::ManagerApprove | A::ManagerReject => (
            ", manager_approver_id = ?, manager_approved_at = NOW(), manager_comments = ?",
            true,
        ),
        A::HrApprove | A::HrReject => (", hr_approver_id = ?, hr_approved_at = NOW(), hr_comments = ?", true),
        A::Cancel => (", cancellation_reason = ?", false),
        A::RequestCancellation => (", cancellation_reason = ?, cancellation_requested_at = NOW()", false),
        A::ApproveCancellation | A::RejectCancellation => (", cancellation_hr_comments = ?", false),
        A::Edit => (", reason = COALESCE(?, reason)", false),
    }
}

/// Locks the request, validates `action`, applies the ledger effect and
/// moves the status, all in one transaction.
async fn run_transition(
    auth: &AuthUser,
    pool: &MySqlPool,
    leave_id: u64,
    action: LeaveAction,
    note: Option<String>,
) -> Result<LeaveView, AppError> {
    let actor = auth.actor();
    let note = clean(note.as_deref());

    let mut tx = pool.begin().await?;

    let request = lock_request(&mut tx, leave_id)
        .await?
        .filter(|r| actor.can_view(r))
        .ok_or_else(not_found)?;
    let leave_type = load_type(pool, request.leave_type_id).await?;
    let transition = request.plan(action, &actor, &review_context(&leave_type, &request), note.as_deref())?;

    if leave_type.is_paid && transition.effect != BalanceEffect::None {
        apply_balance_effect(
            &mut tx,
            (request.employee_id, request.leave_type_id),
            request.start_date.year(),
            transition.effect,
            request.total_days,
        )
        .await?;
    }

    let (audit_sql, binds_actor) = audit_columns(action);
    let sql = format!("UPDATE leave_requests SET status = ?{audit_sql} WHERE id = ? AND status = ?");
    let mut query = sqlx::query(&sql).bind(transition.to.as_ref());
    if binds_actor {
        query = query.bind(auth.user_id);
    }
    let updated = query
        .bind(note.as_deref())
        .bind(leave_id)
        .bind(transition.from.as_ref())
        .execute(&mut *tx)
        .await?;

    if updated.rows_affected() == 0 {
        // dropping the transaction rolls back any ledger change
        return Err(AppError::Conflict("Leave request was changed by someone else; reload and retry".into()));
    }

    tx.commit().await?;

    info!(
        leave_id,
        user_id = auth.user_id,
        %action,
        from = %transition.from,
        to = %transition.to,
        effect = ?transition.effect,
        "Leave request transitioned"
    );

    let request = fetch_request(pool, leave_id).await?.ok_or_else(not_found)?;
    Ok(LeaveView::build(request, &leave_type, &actor))
}

/// Withdraw own request before it is decided
#[utoipa::path(
    put,
    path = "/api/leave/{id}/cancel",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body(content = CancellationNote, description = "Optional reason"),
    responses(
        (status = 200, description = "Leave request cancelled", body = LeaveView),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Leave request not found"),
        (status = 409, description = "Request can no longer be cancelled")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn cancel_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<CancellationNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().reason);
    let view = run_transition(&auth, pool.get_ref(), path.into_inner(), LeaveAction::Cancel, note).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Ask HR to cancel approved leave that has not started yet
#[utoipa::path(
    put,
    path = "/api/leave/{id}/request-cancellation",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body = CancellationNote,
    responses(
        (status = 200, description = "Cancellation requested", body = LeaveView),
        (status = 403, description = "Not the owner"),
        (status = 409, description = "Request is not approved"),
        (status = 422, description = "Reason missing or leave already started")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn request_cancellation(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<CancellationNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().reason);
    let view = run_transition(
        &auth,
        pool.get_ref(),
        path.into_inner(),
        LeaveAction::RequestCancellation,
        note,
    )
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// First-stage approval
#[utoipa::path(
    put,
    path = "/api/leave/{id}/manager-approve",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body(content = ReviewNote, description = "Optional comment"),
    responses(
        (status = 200, description = "Approved by manager", body = LeaveView),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not awaiting the manager"),
        (status = 422, description = "Insufficient balance or certificate missing")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn manager_approve(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().comments);
    let view = run_transition(&auth, pool.get_ref(), path.into_inner(), LeaveAction::ManagerApprove, note).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// First-stage rejection (comment required)
#[utoipa::path(
    put,
    path = "/api/leave/{id}/manager-reject",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body = ReviewNote,
    responses(
        (status = 200, description = "Rejected by manager", body = LeaveView),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not awaiting the manager"),
        (status = 422, description = "Comment missing")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn manager_reject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().comments);
    let view = run_transition(&auth, pool.get_ref(), path.into_inner(), LeaveAction::ManagerReject, note).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Final HR approval; debits the balance
#[utoipa::path(
    put,
    path = "/api/leave/{id}/hr-approve",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body(content = ReviewNote, description = "Optional comment"),
    responses(
        (status = 200, description = "Approved", body = LeaveView),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not awaiting HR"),
        (status = 422, description = "Insufficient balance or certificate missing")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn hr_approve(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().comments);
    let view = run_transition(&auth, pool.get_ref(), path.into_inner(), LeaveAction::HrApprove, note).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// HR rejection (comment required)
#[utoipa::path(
    put,
    path = "/api/leave/{id}/hr-reject",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body = ReviewNote,
    responses(
        (status = 200, description = "Rejected by HR", body = LeaveView),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not awaiting HR"),
        (status = 422, description = "Comment missing")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn hr_reject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().comments);
    let view = run_transition(&auth, pool.get_ref(), path.into_inner(), LeaveAction::HrReject, note).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Grant a cancellation request; credits the balance back
#[utoipa::path(
    put,
    path = "/api/leave/{id}/approve-cancellation",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body(content = ReviewNote, description = "Optional comment"),
    responses(
        (status = 200, description = "Leave cancelled", body = LeaveView),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "No pending cancellation")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn approve_cancellation(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().comments);
    let view = run_transition(
        &auth,
        pool.get_ref(),
        path.into_inner(),
        LeaveAction::ApproveCancellation,
        note,
    )
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Refuse a cancellation request; leave stays approved
#[utoipa::path(
    put,
    path = "/api/leave/{id}/reject-cancellation",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body(content = ReviewNote, description = "Optional comment"),
    responses(
        (status = 200, description = "Leave remains approved", body = LeaveView),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "No pending cancellation")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn reject_cancellation(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: Option<web::Json<ReviewNote>>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().comments);
    let view = run_transition(
        &auth,
        pool.get_ref(),
        path.into_inner(),
        LeaveAction::RejectCancellation,
        note,
    )
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

/* =========================
Attachments
========================= */

fn attachment_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match mime.as_str() {
        "application/pdf" => Some("pdf"),
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next() {
        Some("pdf") => "application/pdf",
        Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

async fn remove_file(path: PathBuf) {
    let shown = path.display().to_string();
    match web::block(move || std::fs::remove_file(path)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, file = %shown, "Failed to remove attachment"),
        Err(e) => warn!(error = %e, file = %shown, "Failed to remove attachment"),
    }
}

/// Upload a supporting document (raw body)
#[utoipa::path(
    put,
    path = "/api/leave/{id}/attachment",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body(content = Vec<u8>, description = "PDF, JPEG or PNG file", content_type = "application/pdf"),
    responses(
        (status = 200, description = "Attachment stored", body = LeaveView),
        (status = 403, description = "Not the owner"),
        (status = 409, description = "Request is no longer pending"),
        (status = 413, description = "File too large"),
        (status = 422, description = "Unsupported or empty file")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn upload_attachment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let pool = pool.get_ref();
    let leave_id = path.into_inner();
    let actor = auth.actor();

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let ext = attachment_extension(content_type)
        .ok_or_else(|| AppError::field("attachment", "Only PDF, JPEG or PNG files are accepted"))?;
    if body.is_empty() {
        return Err(AppError::field("attachment", "File is empty"));
    }
    if body.len() > config.max_attachment_bytes {
        return Err(AppError::field(
            "attachment",
            format!("File exceeds {} bytes", config.max_attachment_bytes),
        ));
    }

    let request = visible_request(pool, leave_id, &actor).await?;
    if !actor.owns(&request) {
        return Err(AppError::Forbidden("Only the owner may attach documents".into()));
    }
    if !matches!(request.status, LeaveStatus::PendingManager | LeaveStatus::PendingHr) {
        return Err(AppError::Conflict(
            "Attachments can only be changed while the request is pending".into(),
        ));
    }

    let size = body.len();
    let file_name = format!("{}.{}", Uuid::new_v4(), ext);
    let dir = PathBuf::from(&config.attachment_dir);
    let target = dir.join(&file_name);
    let write_target = target.clone();
    web::block(move || {
        std::fs::create_dir_all(&dir)?;
        std::fs::write(&write_target, &body)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("blocking pool: {e}")))?
    .map_err(|e| AppError::Internal(e.into()))?;

    let updated = sqlx::query(
        "UPDATE leave_requests SET attachment_path = ? WHERE id = ? AND status IN (?, ?)",
    )
    .bind(&file_name)
    .bind(leave_id)
    .bind(LeaveStatus::PendingManager.as_ref())
    .bind(LeaveStatus::PendingHr.as_ref())
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        remove_file(target).await;
        return Err(AppError::Conflict("Leave request was changed by someone else; reload and retry".into()));
    }

    if let Some(previous) = &request.attachment_path {
        remove_file(PathBuf::from(&config.attachment_dir).join(previous)).await;
    }

    info!(leave_id, file = %file_name, bytes = size, "Attachment stored");

    let request = fetch_request(pool, leave_id).await?.ok_or_else(not_found)?;
    let leave_type = load_type(pool, request.leave_type_id).await?;
    Ok(HttpResponse::Ok().json(LeaveView::build(request, &leave_type, &actor)))
}

/// Download the supporting document
#[utoipa::path(
    get,
    path = "/api/leave/{id}/attachment",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "File content", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "Leave request or attachment not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn get_attachment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let request = visible_request(pool.get_ref(), path.into_inner(), &auth.actor()).await?;
    let file_name = request
        .attachment_path
        .ok_or_else(|| AppError::NotFound("No attachment for this request".into()))?;

    let full_path = PathBuf::from(&config.attachment_dir).join(&file_name);
    let bytes = web::block(move || std::fs::read(full_path))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("blocking pool: {e}")))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound("Attachment file is missing".into()),
            _ => AppError::Internal(e.into()),
        })?;

    Ok(HttpResponse::Ok()
        .content_type(content_type_for(&file_name))
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{file_name}\""),
        ))
        .body(bytes))
}


#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::api::test_support::*;

    const OWNER_USER: u64 = 10;
    const HR_USER: u64 = 20;

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a MySQL server"]
    async fn approval_debits_and_approved_cancellation_restores(pool: MySqlPool) {
        let employee = seed_employee(&pool, "EMP-1", true).await;
        let reviewer = seed_employee(&pool, "EMP-2", true).await;
        let leave_type = seed_leave_type(&pool, TypeSeed::annual(7_101)).await;
        let start = upcoming_start();
        seed_balance(&pool, employee, leave_type, start.year(), 20.0, 2.0).await;
        let leave_id = seed_request(&pool, employee, leave_type, start, 3, LeaveStatus::PendingHr).await;

        let owner = caller(OWNER_USER, Role::Employee, employee);
        let hr = caller(HR_USER, Role::Hr, reviewer);

        let view = run_transition(&hr, &pool, leave_id, LeaveAction::HrApprove, None)
            .await
            .unwrap();
        assert_eq!(view.request.status, LeaveStatus::Approved);
        assert_eq!(view.request.hr_approver_id, Some(HR_USER));
        let balance = balance_of(&pool, employee, leave_type, start.year()).await.unwrap();
        assert_eq!((balance.used_days, balance.remaining_days), (5.0, 15.0));

        run_transition(
            &owner,
            &pool,
            leave_id,
            LeaveAction::RequestCancellation,
            Some("plans changed".into()),
        )
        .await
        .unwrap();
        let balance = balance_of(&pool, employee, leave_type, start.year()).await.unwrap();
        assert_eq!(balance.used_days, 5.0);

        let view = run_transition(&hr, &pool, leave_id, LeaveAction::ApproveCancellation, None)
            .await
            .unwrap();
        assert_eq!(view.request.status, LeaveStatus::Cancelled);
        let balance = balance_of(&pool, employee, leave_type, start.year()).await.unwrap();
        assert_eq!((balance.used_days, balance.remaining_days), (2.0, 18.0));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a MySQL server"]
    async fn racing_approvals_debit_once(pool: MySqlPool) {
        let employee = seed_employee(&pool, "EMP-1", true).await;
        let reviewer = seed_employee(&pool, "EMP-2", true).await;
        let leave_type = seed_leave_type(&pool, TypeSeed::annual(7_102)).await;
        let start = upcoming_start();
        seed_balance(&pool, employee, leave_type, start.year(), 20.0, 0.0).await;
        let leave_id = seed_request(&pool, employee, leave_type, start, 4, LeaveStatus::PendingHr).await;

        let first = caller(HR_USER, Role::Hr, reviewer);
        let second = caller(HR_USER + 1, Role::Admin, reviewer);
        let (a, b) = futures::join!(
            run_transition(&first, &pool, leave_id, LeaveAction::HrApprove, None),
            run_transition(&second, &pool, leave_id, LeaveAction::HrApprove, None),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = a.err().or(b.err()).unwrap();
        assert!(matches!(loser, AppError::Conflict(_)), "{loser:?}");

        let balance = balance_of(&pool, employee, leave_type, start.year()).await.unwrap();
        assert_eq!(balance.used_days, 4.0);
        assert_eq!(status_of(&pool, leave_id).await, "approved");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a MySQL server"]
    async fn stale_decision_is_a_conflict_and_leaves_the_ledger_alone(pool: MySqlPool) {
        let employee = seed_employee(&pool, "EMP-1", true).await;
        let reviewer = seed_employee(&pool, "EMP-2", true).await;
        let leave_type = seed_leave_type(&pool, TypeSeed::annual(7_103)).await;
        let start = upcoming_start();
        seed_balance(&pool, employee, leave_type, start.year(), 20.0, 0.0).await;
        let leave_id = seed_request(&pool, employee, leave_type, start, 2, LeaveStatus::PendingHr).await;
        let hr = caller(HR_USER, Role::Hr, reviewer);

        run_transition(&hr, &pool, leave_id, LeaveAction::HrApprove, None)
            .await
            .unwrap();
        let err = run_transition(&hr, &pool, leave_id, LeaveAction::HrReject, Some("too late".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)), "{err:?}");
        let balance = balance_of(&pool, employee, leave_type, start.year()).await.unwrap();
        assert_eq!(balance.used_days, 2.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a MySQL server"]
    async fn approval_past_the_remaining_balance_is_refused(pool: MySqlPool) {
        let employee = seed_employee(&pool, "EMP-1", true).await;
        let reviewer = seed_employee(&pool, "EMP-2", true).await;
        let leave_type = seed_leave_type(&pool, TypeSeed::annual(7_104)).await;
        let start = upcoming_start();
        seed_balance(&pool, employee, leave_type, start.year(), 3.0, 2.0).await;
        let leave_id = seed_request(&pool, employee, leave_type, start, 2, LeaveStatus::PendingHr).await;
        let hr = caller(HR_USER, Role::Hr, reviewer);

        let err = run_transition(&hr, &pool, leave_id, LeaveAction::HrApprove, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InsufficientBalance { .. }), "{err:?}");
        assert_eq!(status_of(&pool, leave_id).await, "pending_hr");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a MySQL server"]
    async fn deactivated_type_cancellation_survives_a_forced_rebuild(pool: MySqlPool) {
        let employee = seed_employee(&pool, "EMP-1", true).await;
        let reviewer = seed_employee(&pool, "EMP-2", true).await;
        let retired = seed_leave_type(
            &pool,
            TypeSeed {
                code: "STUDY",
                is_active: false,
                ..TypeSeed::annual(7_105)
            },
        )
        .await;
        let start = upcoming_start();
        seed_balance(&pool, employee, retired, start.year(), 10.0, 3.0).await;
        let leave_id = seed_request(&pool, employee, retired, start, 3, LeaveStatus::PendingCancellation).await;

        crate::api::leave_balance::run_balance_reset(&pool, start.year(), true)
            .await
            .unwrap();

        let hr = caller(HR_USER, Role::Hr, reviewer);
        let view = run_transition(&hr, &pool, leave_id, LeaveAction::ApproveCancellation, None)
            .await
            .unwrap();
        assert_eq!(view.request.status, LeaveStatus::Cancelled);
        let balance = balance_of(&pool, employee, retired, start.year()).await.unwrap();
        assert_eq!((balance.used_days, balance.remaining_days), (0.0, 10.0));
    }
}
