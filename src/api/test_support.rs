//! Seed helpers for tests that run against a migrated MySQL database.
//!
//! Leave types are inserted with explicit ids because the leave type
//! cache is process-wide and every test database restarts its counters.

use chrono::{Duration, NaiveDate, Utc};
use sqlx::MySqlPool;

use crate::auth::auth::AuthUser;
use crate::model::leave_balance::LeaveBalance;
use crate::model::leave_status::LeaveStatus;
use crate::model::role::Role;
use crate::utils::leave_type_cache;

pub(crate) async fn seed_employee(pool: &MySqlPool, code: &str, is_active: bool) -> u64 {
    sqlx::query(
        "INSERT INTO employees (employee_code, first_name, last_name, email, is_active) VALUES (?, 'Test', 'User', ?, ?)",
    )
    .bind(code)
    .bind(format!("{}@example.com", code.to_lowercase()))
    .bind(is_active)
    .execute(pool)
    .await
    .expect("insert employee")
    .last_insert_id()
}

pub(crate) struct TypeSeed {
    pub id: u64,
    pub code: &'static str,
    pub days_per_year: f64,
    pub carry_over_cap: Option<f64>,
    pub is_active: bool,
}

impl TypeSeed {
    pub(crate) fn annual(id: u64) -> Self {
        Self {
            id,
            code: "ANNUAL",
            days_per_year: 20.0,
            carry_over_cap: None,
            is_active: true,
        }
    }
}

/// Paid, manager then HR approval, no certificate.
pub(crate) async fn seed_leave_type(pool: &MySqlPool, seed: TypeSeed) -> u64 {
    sqlx::query(
        r#"
        INSERT INTO leave_types
            (id, name, code, days_per_year, is_paid, is_carry_over_allowed, max_carry_over_days,
             requires_manager_approval, requires_hr_approval, is_active)
        VALUES (?, ?, ?, ?, TRUE, ?, ?, TRUE, TRUE, ?)
        "#,
    )
    .bind(seed.id)
    .bind(seed.code)
    .bind(seed.code)
    .bind(seed.days_per_year)
    .bind(seed.carry_over_cap.is_some())
    .bind(seed.carry_over_cap)
    .bind(seed.is_active)
    .execute(pool)
    .await
    .expect("insert leave type");

    leave_type_cache::invalidate(seed.id).await;
    seed.id
}

pub(crate) async fn seed_balance(pool: &MySqlPool, employee_id: u64, leave_type_id: u64, year: i32, total: f64, used: f64) {
    sqlx::query(
        r#"
        INSERT INTO leave_balances (employee_id, leave_type_id, year, total_days, used_days, remaining_days)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(leave_type_id)
    .bind(year)
    .bind(total)
    .bind(used)
    .bind(total - used)
    .execute(pool)
    .await
    .expect("insert balance");
}

/// Full-day request of `days` days starting on `start`.
pub(crate) async fn seed_request(
    pool: &MySqlPool,
    employee_id: u64,
    leave_type_id: u64,
    start: NaiveDate,
    days: i64,
    status: LeaveStatus,
) -> u64 {
    sqlx::query(
        r#"
        INSERT INTO leave_requests (employee_id, leave_type_id, start_date, end_date, total_days, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(leave_type_id)
    .bind(start)
    .bind(start + Duration::days(days - 1))
    .bind(days as f64)
    .bind(status.as_ref())
    .execute(pool)
    .await
    .expect("insert leave request")
    .last_insert_id()
}

pub(crate) async fn balance_of(pool: &MySqlPool, employee_id: u64, leave_type_id: u64, year: i32) -> Option<LeaveBalance> {
    crate::api::leave_balance::find_balance(pool, employee_id, leave_type_id, year)
        .await
        .expect("read balance")
}

pub(crate) async fn status_of(pool: &MySqlPool, leave_id: u64) -> String {
    sqlx::query_scalar::<_, String>("SELECT status FROM leave_requests WHERE id = ?")
        .bind(leave_id)
        .fetch_one(pool)
        .await
        .expect("read status")
}

pub(crate) fn caller(user_id: u64, role: Role, employee_id: u64) -> AuthUser {
    AuthUser {
        user_id,
        username: format!("user{user_id}"),
        role,
        employee_id: Some(employee_id),
    }
}

/// A start date a month ahead, so cancellation can still be requested.
pub(crate) fn upcoming_start() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(30)
}
