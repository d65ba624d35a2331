use crate::auth::auth::AuthUser;
use crate::bind_values;
use crate::error::AppError;
use crate::model::employee::{EMPLOYEE_COLUMNS, Employee};
use crate::model::leave_balance::{LeaveBalance, LedgerKey, plan_year};
use crate::model::leave_status::{BalanceEffect, LeaveStatus};
use crate::model::leave_type::LeaveType;
use crate::model::role::Capability;
use crate::utils::db_utils::{Page, SqlFilter};
use crate::utils::leave_type_cache::LEAVE_TYPE_COLUMNS;
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool};
use std::collections::HashMap;
use strum::IntoEnumIterator;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const BALANCE_COLUMNS: &str =
    "id, employee_id, leave_type_id, year, total_days, used_days, remaining_days, carried_over_days";

/* =========================
Ledger helpers
========================= */

pub async fn find_balance(
    pool: &MySqlPool,
    employee_id: u64,
    leave_type_id: u64,
    year: i32,
) -> Result<Option<LeaveBalance>, sqlx::Error> {
    sqlx::query_as::<_, LeaveBalance>(&format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances WHERE employee_id = ? AND leave_type_id = ? AND year = ?"
    ))
    .bind(employee_id)
    .bind(leave_type_id)
    .bind(year)
    .fetch_optional(pool)
    .await
}

/// Same as `find_balance` but row-locked until the transaction ends.
pub async fn lock_balance(
    conn: &mut MySqlConnection,
    employee_id: u64,
    leave_type_id: u64,
    year: i32,
) -> Result<Option<LeaveBalance>, sqlx::Error> {
    sqlx::query_as::<_, LeaveBalance>(&format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances \
         WHERE employee_id = ? AND leave_type_id = ? AND year = ? FOR UPDATE"
    ))
    .bind(employee_id)
    .bind(leave_type_id)
    .bind(year)
    .fetch_optional(&mut *conn)
    .await
}

/// Applies `effect` of `days` to the locked ledger row, refusing to debit
/// past zero.
pub async fn apply_balance_effect(
    conn: &mut MySqlConnection,
    key: LedgerKey,
    year: i32,
    effect: BalanceEffect,
    days: f64,
) -> Result<LeaveBalance, AppError> {
    let (employee_id, leave_type_id) = key;
    let mut balance = lock_balance(&mut *conn, employee_id, leave_type_id, year)
        .await?
        .ok_or_else(|| AppError::Conflict(format!("No leave balance allocated for {year}")))?;

    if effect == BalanceEffect::Debit && !balance.covers(days) {
        return Err(AppError::InsufficientBalance {
            remaining: balance.remaining_days,
            requested: days,
        });
    }

    balance.apply(effect, days);

    sqlx::query("UPDATE leave_balances SET used_days = ?, remaining_days = ? WHERE id = ?")
        .bind(balance.used_days)
        .bind(balance.remaining_days)
        .bind(balance.id)
        .execute(&mut *conn)
        .await?;

    tracing::info!(
        employee_id,
        leave_type_id,
        year,
        ?effect,
        days,
        remaining = balance.remaining_days,
        "Leave balance updated"
    );
    Ok(balance)
}

/* =========================
Listing
========================= */

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct BalanceQuery {
    /// Filter by employee (HR/Admin only; others always see their own)
    pub employee_id: Option<u64>,
    pub leave_type_id: Option<u64>,
    #[schema(example = 2026)]
    pub year: Option<i32>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct BalanceListResponse {
    pub data: Vec<LeaveBalance>,
    pub page: u64,
    pub per_page: u64,
    pub total: i64,
}

/// List leave balances
#[utoipa::path(
    get,
    path = "/api/leave-balances",
    params(BalanceQuery),
    responses(
        (status = 200, description = "Paginated balances", body = BalanceListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn list_balances(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<BalanceQuery>,
) -> Result<HttpResponse, AppError> {
    let employee_id = if auth.role.has(Capability::HrApprove) {
        query.employee_id
    } else {
        Some(auth.require_employee()?)
    };
    let page = Page::new(query.page, query.per_page);

    let mut filter = SqlFilter::new();
    filter
        .push_opt("employee_id = ?", employee_id)
        .push_opt("leave_type_id = ?", query.leave_type_id)
        .push_opt("year = ?", query.year);
    let where_sql = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM leave_balances{where_sql}");
    let total = bind_values!(sqlx::query_scalar::<_, i64>(&count_sql), filter.values)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances{where_sql} \
         ORDER BY year DESC, employee_id, leave_type_id LIMIT ? OFFSET ?"
    );
    let data = bind_values!(sqlx::query_as::<_, LeaveBalance>(&data_sql), filter.values)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(BalanceListResponse {
        data,
        page: page.page,
        per_page: page.per_page,
        total,
    }))
}

/* =========================
Yearly reset
========================= */

#[derive(Deserialize, Validate, ToSchema)]
pub struct ResetBalances {
    #[validate(range(min = 2000, max = 2100, message = "Year must be between 2000 and 2100"))]
    #[schema(example = 2027)]
    pub year: i32,
    /// Delete and recreate the year's balances
    #[serde(default)]
    pub force: bool,
    /// Must be true when `force` is set
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize, ToSchema, PartialEq, Eq)]
pub struct ResetSummary {
    pub year: i32,
    pub forced: bool,
    pub deleted: u64,
    pub created: u64,
    pub skipped: u64,
}

async fn previous_remaining(conn: &mut MySqlConnection, year: i32) -> Result<HashMap<LedgerKey, f64>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (u64, u64, f64)>(
        "SELECT employee_id, leave_type_id, remaining_days FROM leave_balances WHERE year = ?",
    )
    .bind(year - 1)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(e, t, r)| ((e, t), r)).collect())
}

async fn used_in_year(conn: &mut MySqlConnection, year: i32) -> Result<HashMap<LedgerKey, f64>, sqlx::Error> {
    let held: Vec<String> = LeaveStatus::iter()
        .filter(|s| s.holds_balance())
        .map(|s| s.as_ref().to_string())
        .collect();
    let placeholders = vec!["?"; held.len()].join(", ");
    let sql = format!(
        "SELECT employee_id, leave_type_id, SUM(total_days) FROM leave_requests \
         WHERE YEAR(start_date) = ? AND status IN ({placeholders}) \
         GROUP BY employee_id, leave_type_id"
    );

    let mut query = sqlx::query_as::<_, (u64, u64, Option<f64>)>(&sql).bind(year);
    for status in held {
        query = query.bind(status);
    }
    let rows = query.fetch_all(&mut *conn).await?;
    Ok(rows
        .into_iter()
        .map(|(e, t, used)| ((e, t), used.unwrap_or(0.0)))
        .collect())
}

/// Allocates balances of `year` for all active employees. Without `force`
/// existing rows are kept; with it every planned row is rebuilt. Rows of
/// inactive employees or deactivated leave types are never touched, so
/// their usage stays on record.
pub async fn run_balance_reset(pool: &MySqlPool, year: i32, force: bool) -> Result<ResetSummary, AppError> {
    let mut tx = pool.begin().await?;

    let employees = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE is_active = TRUE"
    ))
    .fetch_all(&mut *tx)
    .await?;
    let leave_types = sqlx::query_as::<_, LeaveType>(&format!(
        "SELECT {LEAVE_TYPE_COLUMNS} FROM leave_types WHERE is_active = TRUE ORDER BY sort_order, id"
    ))
    .fetch_all(&mut *tx)
    .await?;

    let previous = previous_remaining(&mut tx, year).await?;
    let used = used_in_year(&mut tx, year).await?;

    let planned = plan_year(year, &employees, &leave_types, &previous, &used);
    let mut deleted = 0u64;
    let mut created = 0u64;
    for row in &planned {
        if force {
            deleted += sqlx::query(
                "DELETE FROM leave_balances WHERE employee_id = ? AND leave_type_id = ? AND year = ?",
            )
            .bind(row.employee_id)
            .bind(row.leave_type_id)
            .bind(row.year)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        let done = sqlx::query(
            r#"
            INSERT IGNORE INTO leave_balances
                (employee_id, leave_type_id, year, total_days, used_days, remaining_days, carried_over_days)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.employee_id)
        .bind(row.leave_type_id)
        .bind(row.year)
        .bind(row.total_days)
        .bind(row.used_days)
        .bind(row.remaining_days())
        .bind(row.carried_over_days)
        .execute(&mut *tx)
        .await?;
        created += done.rows_affected();
    }

    tx.commit().await?;

    let summary = ResetSummary {
        year,
        forced: force,
        deleted,
        created,
        skipped: planned.len() as u64 - created,
    };
    tracing::info!(?summary, "Leave balance reset finished");
    Ok(summary)
}

/// Reset (allocate) balances for a year
#[utoipa::path(
    post,
    path = "/api/leave-balances/reset",
    request_body = ResetBalances,
    responses(
        (status = 200, description = "Balances allocated", body = ResetSummary),
        (status = 403, description = "Forbidden"),
        (status = 422, description = "Validation failed or force without confirm")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn reset_balances(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ResetBalances>,
) -> Result<HttpResponse, AppError> {
    auth.require(Capability::Configure)?;
    payload.validate()?;

    if payload.force && !payload.confirm {
        return Err(AppError::field(
            "confirm",
            "Force reset deletes existing balances for the year and must be confirmed",
        ));
    }

    tracing::info!(
        user_id = auth.user_id,
        year = payload.year,
        force = payload.force,
        "Balance reset requested"
    );
    let summary = run_balance_reset(pool.get_ref(), payload.year, payload.force).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::api::test_support::*;
    use chrono::Datelike;

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a MySQL server"]
    async fn allocation_carries_over_and_keeps_existing_rows(pool: MySqlPool) {
        let first = seed_employee(&pool, "EMP-1", true).await;
        let second = seed_employee(&pool, "EMP-2", true).await;
        let departed = seed_employee(&pool, "EMP-3", false).await;
        let annual = seed_leave_type(
            &pool,
            TypeSeed {
                carry_over_cap: Some(5.0),
                ..TypeSeed::annual(7_201)
            },
        )
        .await;
        seed_balance(&pool, first, annual, 2026, 20.0, 12.0).await;
        seed_balance(&pool, second, annual, 2026, 20.0, 18.0).await;

        let summary = run_balance_reset(&pool, 2027, false).await.unwrap();
        assert_eq!(
            summary,
            ResetSummary {
                year: 2027,
                forced: false,
                deleted: 0,
                created: 2,
                skipped: 0
            }
        );

        let b = balance_of(&pool, first, annual, 2027).await.unwrap();
        assert_eq!((b.carried_over_days, b.total_days, b.remaining_days), (5.0, 25.0, 25.0));
        let b = balance_of(&pool, second, annual, 2027).await.unwrap();
        assert_eq!((b.carried_over_days, b.total_days), (2.0, 22.0));
        assert!(balance_of(&pool, departed, annual, 2027).await.is_none());

        let again = run_balance_reset(&pool, 2027, false).await.unwrap();
        assert_eq!((again.created, again.skipped), (0, 2));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a MySQL server"]
    async fn force_rebuild_recounts_usage_and_keeps_deactivated_rows(pool: MySqlPool) {
        let employee = seed_employee(&pool, "EMP-1", true).await;
        let reviewer = seed_employee(&pool, "EMP-2", true).await;
        let annual = seed_leave_type(&pool, TypeSeed::annual(7_202)).await;
        let retired = seed_leave_type(
            &pool,
            TypeSeed {
                code: "STUDY",
                is_active: false,
                ..TypeSeed::annual(7_203)
            },
        )
        .await;
        let start = upcoming_start();
        let year = start.year();

        // stale usage on the active type, real usage on the retired one
        seed_balance(&pool, employee, annual, year, 20.0, 9.0).await;
        seed_balance(&pool, employee, retired, year, 10.0, 3.0).await;
        seed_request(&pool, employee, annual, start, 2, LeaveStatus::Approved).await;
        seed_request(&pool, employee, retired, start, 3, LeaveStatus::PendingCancellation).await;

        let summary = run_balance_reset(&pool, year, true).await.unwrap();
        // two active employees on the one active type; only the first had a row
        assert_eq!((summary.deleted, summary.created), (1, 2));

        let rebuilt = balance_of(&pool, employee, annual, year).await.unwrap();
        assert_eq!((rebuilt.used_days, rebuilt.remaining_days), (2.0, 18.0));
        let kept = balance_of(&pool, employee, retired, year).await.unwrap();
        assert_eq!((kept.used_days, kept.remaining_days), (3.0, 7.0));
        assert!(balance_of(&pool, reviewer, retired, year).await.is_none());
    }
}
