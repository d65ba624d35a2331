use crate::auth::auth::AuthUser;
use crate::error::{AppError, FieldErrors, field_errors};
use crate::model::leave_type::{GenderRestriction, LeaveType, is_valid_code, is_valid_color, normalize_code};
use crate::model::role::Capability;
use crate::utils::leave_code_filter;
use crate::utils::leave_type_cache::{self, LEAVE_TYPE_COLUMNS, find_leave_type};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "name": "Sick Leave",
    "code": "sick",
    "days_per_year": 10.0,
    "is_paid": true,
    "requires_medical_cert": true,
    "medical_cert_min_days": 2.0,
    "requires_manager_approval": true,
    "requires_hr_approval": true,
    "color": "#DC2626",
    "sort_order": 2
}))]
pub struct LeaveTypePayload {
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: String,
    /// Upper-cased on input
    pub code: String,
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    #[validate(range(min = 0.0, max = 366.0, message = "Days per year must be between 0 and 366"))]
    pub days_per_year: f64,
    #[serde(default = "default_true")]
    pub is_paid: bool,
    #[serde(default)]
    pub requires_medical_cert: bool,
    /// Ignored unless `requires_medical_cert`
    #[validate(range(min = 0.0, message = "Threshold cannot be negative"))]
    pub medical_cert_min_days: Option<f64>,
    #[serde(default)]
    pub is_carry_over_allowed: bool,
    /// Ignored unless `is_carry_over_allowed`
    #[validate(range(min = 0.0, message = "Carry-over cap cannot be negative"))]
    pub max_carry_over_days: Option<f64>,
    #[serde(default = "default_true")]
    pub requires_manager_approval: bool,
    #[serde(default = "default_true")]
    pub requires_hr_approval: bool,
    pub color: Option<String>,
    #[validate(length(max = 50, message = "Icon must be at most 50 characters"))]
    pub icon: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    pub gender_specific: Option<GenderRestriction>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn non_blank(text: &Option<String>) -> Option<String> {
    text.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

impl LeaveTypePayload {
    /// Validated, normalized leave type (id 0). Thresholds and caps are
    /// dropped when their flag is off.
    fn normalized(&self) -> Result<LeaveType, AppError> {
        let mut errors: FieldErrors = self.validate().err().map(|e| field_errors(&e)).unwrap_or_default();
        let mut fail = |field: &str, message: &str| {
            errors.entry(field.to_string()).or_default().push(message.to_string());
        };

        let name = self.name.trim().to_string();
        if name.is_empty() {
            fail("name", "Name is required");
        }

        let code = normalize_code(&self.code);
        if !is_valid_code(&code) {
            fail("code", "Code must be 2-20 characters of A-Z, 0-9 or _");
        }

        let color = non_blank(&self.color);
        if color.as_deref().is_some_and(|c| !is_valid_color(c)) {
            fail("color", "Colour must be a hex value like #4F46E5");
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        Ok(LeaveType {
            id: 0,
            name,
            code,
            description: non_blank(&self.description),
            days_per_year: self.days_per_year,
            is_paid: self.is_paid,
            requires_medical_cert: self.requires_medical_cert,
            medical_cert_min_days: self.medical_cert_min_days.filter(|_| self.requires_medical_cert),
            is_carry_over_allowed: self.is_carry_over_allowed,
            max_carry_over_days: self.max_carry_over_days.filter(|_| self.is_carry_over_allowed),
            requires_manager_approval: self.requires_manager_approval,
            requires_hr_approval: self.requires_hr_approval,
            color,
            icon: non_blank(&self.icon),
            sort_order: self.sort_order,
            gender_specific: self.gender_specific,
            is_active: self.is_active,
            created_at: None,
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct LeaveTypeResponse {
    pub data: LeaveType,
    /// Set when the configuration is allowed but discouraged
    pub warning: Option<String>,
}

impl LeaveTypeResponse {
    fn new(data: LeaveType) -> Self {
        let warning = data
            .approval_policy()
            .is_auto_approved()
            .then(|| "Requests of this type are approved automatically without any review".to_string());
        Self { data, warning }
    }
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct LeaveTypeQuery {
    /// Include deactivated types (HR/Admin only)
    pub include_inactive: Option<bool>,
}

async fn fetch_leave_type(pool: &MySqlPool, id: u64) -> Result<Option<LeaveType>, sqlx::Error> {
    sqlx::query_as::<_, LeaveType>(&format!("SELECT {LEAVE_TYPE_COLUMNS} FROM leave_types WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Re-reads a written row and refreshes the cache with it.
async fn reload(pool: &MySqlPool, id: u64) -> Result<LeaveType, AppError> {
    leave_type_cache::invalidate(id).await;
    let leave_type = fetch_leave_type(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Leave type not found".into()))?;
    leave_type_cache::insert(&leave_type).await;
    Ok(leave_type)
}

async fn ensure_code_free(pool: &MySqlPool, code: &str, except_id: Option<u64>) -> Result<(), AppError> {
    if leave_code_filter::is_code_taken(pool, code, except_id).await? {
        return Err(AppError::field("code", "Code is already in use"));
    }
    Ok(())
}

fn duplicate_code(err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::field("code", "Code is already in use")
        }
        e => e.into(),
    }
}

/// List leave types
#[utoipa::path(
    get,
    path = "/api/leave-types",
    params(LeaveTypeQuery),
    responses(
        (status = 200, description = "Leave types in display order", body = [LeaveType]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Type"
)]
pub async fn list_leave_types(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<LeaveTypeQuery>,
) -> Result<HttpResponse, AppError> {
    let include_inactive = query.include_inactive.unwrap_or(false) && auth.role.has(Capability::Configure);

    let where_sql = if include_inactive { "" } else { " WHERE is_active = TRUE" };
    let types = sqlx::query_as::<_, LeaveType>(&format!(
        "SELECT {LEAVE_TYPE_COLUMNS} FROM leave_types{where_sql} ORDER BY sort_order, name"
    ))
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(types))
}

/// Get one leave type
#[utoipa::path(
    get,
    path = "/api/leave-types/{id}",
    params(("id" = u64, Path, description = "Leave type id")),
    responses(
        (status = 200, description = "Leave type found", body = LeaveType),
        (status = 404, description = "Leave type not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Type"
)]
pub async fn get_leave_type(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let can_see_inactive = auth.role.has(Capability::Configure);
    let leave_type = find_leave_type(pool.get_ref(), path.into_inner())
        .await?
        .filter(|t| t.is_active || can_see_inactive)
        .ok_or_else(|| AppError::NotFound("Leave type not found".into()))?;

    Ok(HttpResponse::Ok().json(leave_type))
}

/// Create a leave type (HR/Admin)
#[utoipa::path(
    post,
    path = "/api/leave-types",
    request_body = LeaveTypePayload,
    responses(
        (status = 201, description = "Leave type created", body = LeaveTypeResponse),
        (status = 403, description = "Forbidden"),
        (status = 422, description = "Validation failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Type"
)]
pub async fn create_leave_type(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<LeaveTypePayload>,
) -> Result<HttpResponse, AppError> {
    auth.require(Capability::Configure)?;
    let draft = payload.normalized()?;
    let pool = pool.get_ref();

    ensure_code_free(pool, &draft.code, None).await?;

    let done = sqlx::query(
        r#"
        INSERT INTO leave_types
            (name, code, description, days_per_year, is_paid, requires_medical_cert, medical_cert_min_days,
             is_carry_over_allowed, max_carry_over_days, requires_manager_approval, requires_hr_approval,
             color, icon, sort_order, gender_specific, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&draft.name)
    .bind(&draft.code)
    .bind(&draft.description)
    .bind(draft.days_per_year)
    .bind(draft.is_paid)
    .bind(draft.requires_medical_cert)
    .bind(draft.medical_cert_min_days)
    .bind(draft.is_carry_over_allowed)
    .bind(draft.max_carry_over_days)
    .bind(draft.requires_manager_approval)
    .bind(draft.requires_hr_approval)
    .bind(&draft.color)
    .bind(&draft.icon)
    .bind(draft.sort_order)
    .bind(draft.gender_specific.map(|g| g.as_ref().to_string()))
    .bind(draft.is_active)
    .execute(pool)
    .await
    .map_err(duplicate_code)?;

    leave_code_filter::insert(&draft.code);
    let created = reload(pool, done.last_insert_id()).await?;

    info!(user_id = auth.user_id, leave_type_id = created.id, code = %created.code, "Leave type created");
    Ok(HttpResponse::Created().json(LeaveTypeResponse::new(created)))
}

/// Update a leave type (HR/Admin)
#[utoipa::path(
    put,
    path = "/api/leave-types/{id}",
    params(("id" = u64, Path, description = "Leave type id")),
    request_body = LeaveTypePayload,
    responses(
        (status = 200, description = "Leave type updated", body = LeaveTypeResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Leave type not found"),
        (status = 422, description = "Validation failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Type"
)]
pub async fn update_leave_type(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<LeaveTypePayload>,
) -> Result<HttpResponse, AppError> {
    auth.require(Capability::Configure)?;
    let pool = pool.get_ref();
    let id = path.into_inner();

    let existing = fetch_leave_type(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Leave type not found".into()))?;
    let draft = payload.normalized()?;

    if draft.code != existing.code {
        ensure_code_free(pool, &draft.code, Some(id)).await?;
    }

    sqlx::query(
        r#"
        UPDATE leave_types
        SET name = ?, code = ?, description = ?, days_per_year = ?, is_paid = ?, requires_medical_cert = ?,
            medical_cert_min_days = ?, is_carry_over_allowed = ?, max_carry_over_days = ?,
            requires_manager_approval = ?, requires_hr_approval = ?, color = ?, icon = ?, sort_order = ?,
            gender_specific = ?, is_active = ?
        WHERE id = ?
        "#,
    )
    .bind(&draft.name)
    .bind(&draft.code)
    .bind(&draft.description)
    .bind(draft.days_per_year)
    .bind(draft.is_paid)
    .bind(draft.requires_medical_cert)
    .bind(draft.medical_cert_min_days)
    .bind(draft.is_carry_over_allowed)
    .bind(draft.max_carry_over_days)
    .bind(draft.requires_manager_approval)
    .bind(draft.requires_hr_approval)
    .bind(&draft.color)
    .bind(&draft.icon)
    .bind(draft.sort_order)
    .bind(draft.gender_specific.map(|g| g.as_ref().to_string()))
    .bind(draft.is_active)
    .bind(id)
    .execute(pool)
    .await
    .map_err(duplicate_code)?;

    if draft.code != existing.code {
        leave_code_filter::remove(&existing.code);
        leave_code_filter::insert(&draft.code);
    }
    let updated = reload(pool, id).await?;

    info!(user_id = auth.user_id, leave_type_id = id, code = %updated.code, "Leave type updated");
    Ok(HttpResponse::Ok().json(LeaveTypeResponse::new(updated)))
}

/// Flip the active flag (HR/Admin)
#[utoipa::path(
    put,
    path = "/api/leave-types/{id}/toggle",
    params(("id" = u64, Path, description = "Leave type id")),
    responses(
        (status = 200, description = "Active flag flipped", body = LeaveType),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Leave type not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Type"
)]
pub async fn toggle_leave_type(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Capability::Configure)?;
    let id = path.into_inner();

    let done = sqlx::query("UPDATE leave_types SET is_active = NOT is_active WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::NotFound("Leave type not found".into()));
    }

    let toggled = reload(pool.get_ref(), id).await?;
    info!(user_id = auth.user_id, leave_type_id = id, active = toggled.is_active, "Leave type toggled");
    Ok(HttpResponse::Ok().json(toggled))
}

/// Delete an unused leave type (HR/Admin)
#[utoipa::path(
    delete,
    path = "/api/leave-types/{id}",
    params(("id" = u64, Path, description = "Leave type id")),
    responses(
        (status = 204, description = "Leave type deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Leave type not found"),
        (status = 409, description = "Leave type is referenced by requests or balances")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Type"
)]
pub async fn delete_leave_type(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Capability::Configure)?;
    let pool = pool.get_ref();
    let id = path.into_inner();

    let existing = fetch_leave_type(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Leave type not found".into()))?;

    let requests = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM leave_requests WHERE leave_type_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    let balances = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM leave_balances WHERE leave_type_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if requests + balances > 0 {
        return Err(AppError::Conflict(
            "Leave type is in use by requests or balances; deactivate it instead".into(),
        ));
    }

    sqlx::query("DELETE FROM leave_types WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    leave_code_filter::remove(&existing.code);
    leave_type_cache::invalidate(id).await;

    info!(user_id = auth.user_id, leave_type_id = id, code = %existing.code, "Leave type deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> LeaveTypePayload {
        LeaveTypePayload {
            name: "  Sick Leave ".into(),
            code: " sick ".into(),
            description: Some("   ".into()),
            days_per_year: 10.0,
            is_paid: true,
            requires_medical_cert: true,
            medical_cert_min_days: Some(2.0),
            is_carry_over_allowed: false,
            max_carry_over_days: Some(4.0),
            requires_manager_approval: true,
            requires_hr_approval: true,
            color: Some("#DC2626".into()),
            icon: None,
            sort_order: 2,
            gender_specific: None,
            is_active: true,
        }
    }

    fn errors_of(result: Result<LeaveType, AppError>) -> FieldErrors {
        match result {
            Err(AppError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn normalizes_text_and_drops_unused_thresholds() {
        let t = payload().normalized().unwrap();
        assert_eq!(t.name, "Sick Leave");
        assert_eq!(t.code, "SICK");
        assert_eq!(t.description, None);
        assert_eq!(t.medical_cert_min_days, Some(2.0));
        // carry-over is off, so the cap goes away
        assert_eq!(t.max_carry_over_days, None);
    }

    #[test]
    fn threshold_is_cleared_when_certificate_not_required() {
        let mut p = payload();
        p.requires_medical_cert = false;
        assert_eq!(p.normalized().unwrap().medical_cert_min_days, None);
    }

    #[test]
    fn rejects_bad_fields_together() {
        let mut p = payload();
        p.name = " ".into();
        p.code = "x".into();
        p.color = Some("red".into());
        p.days_per_year = 400.0;

        let errors = errors_of(p.normalized());
        for field in ["name", "code", "color", "days_per_year"] {
            assert!(errors.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn negative_caps_are_rejected() {
        let mut p = payload();
        p.medical_cert_min_days = Some(-1.0);
        assert!(errors_of(p.normalized()).contains_key("medical_cert_min_days"));
    }

    #[test]
    fn auto_approval_is_accepted_with_a_warning() {
        let mut p = payload();
        p.requires_manager_approval = false;
        p.requires_hr_approval = false;
        let resp = LeaveTypeResponse::new(p.normalized().unwrap());
        assert!(resp.warning.is_some());

        let resp = LeaveTypeResponse::new(payload().normalized().unwrap());
        assert!(resp.warning.is_none());
    }
}
