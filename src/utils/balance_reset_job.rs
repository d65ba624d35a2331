use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::MySqlPool;
use tracing::{error, info};

use crate::api::leave_balance::run_balance_reset;

/// Next January 1st, 00:00 UTC, strictly after `now`.
pub fn next_reset_at(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(now + chrono::Duration::days(365))
}

async fn allocate(pool: &MySqlPool, year: i32) {
    match run_balance_reset(pool, year, false).await {
        Ok(summary) => info!(year, created = summary.created, skipped = summary.skipped, "Scheduled balance allocation done"),
        Err(e) => error!(year, error = %e, "Scheduled balance allocation failed"),
    }
}

/// Allocates the current year's balances now, then the new year's at
/// every turn of the year. Existing rows are never touched.
pub fn spawn_yearly_reset(pool: MySqlPool) {
    actix_web::rt::spawn(async move {
        allocate(&pool, Utc::now().year()).await;

        loop {
            let now = Utc::now();
            let at = next_reset_at(now);
            let wait = (at - now).to_std().unwrap_or_default();
            info!(next_run = %at, "Balance reset scheduled");

            actix_web::rt::time::sleep(wait).await;
            allocate(&pool, at.year()).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_run_is_the_coming_new_year() {
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap();
        assert_eq!(next_reset_at(now), Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn exactly_midnight_schedules_the_following_year() {
        let now = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_reset_at(now), Utc.with_ymd_and_hms(2028, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn last_second_of_the_year() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(next_reset_at(now), Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }
}
