use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::time::Duration;

use crate::model::leave_type::LeaveType;

pub const LEAVE_TYPE_COLUMNS: &str = "id, name, code, description, days_per_year, is_paid, \
    requires_medical_cert, medical_cert_min_days, is_carry_over_allowed, max_carry_over_days, \
    requires_manager_approval, requires_hr_approval, color, icon, sort_order, gender_specific, \
    is_active, created_at";

/// Leave types by id. Every write to `leave_types` must call `invalidate`.
pub static LEAVE_TYPE_CACHE: Lazy<Cache<u64, LeaveType>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(1_000)
        .time_to_live(Duration::from_secs(600))
        .build()
});

pub async fn insert(leave_type: &LeaveType) {
    LEAVE_TYPE_CACHE.insert(leave_type.id, leave_type.clone()).await;
}

pub async fn invalidate(id: u64) {
    LEAVE_TYPE_CACHE.invalidate(&id).await;
}

pub async fn cached(id: u64) -> Option<LeaveType> {
    LEAVE_TYPE_CACHE.get(&id).await
}

/// Cache-through lookup.
pub async fn find_leave_type(pool: &MySqlPool, id: u64) -> Result<Option<LeaveType>, sqlx::Error> {
    if let Some(hit) = cached(id).await {
        return Ok(Some(hit));
    }

    let found = sqlx::query_as::<_, LeaveType>(&format!("SELECT {LEAVE_TYPE_COLUMNS} FROM leave_types WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if let Some(leave_type) = &found {
        insert(leave_type).await;
    }
    Ok(found)
}

/// Loads all active leave types into the cache.
pub async fn warmup_leave_type_cache(pool: &MySqlPool) -> Result<()> {
    let sql = format!("SELECT {LEAVE_TYPE_COLUMNS} FROM leave_types WHERE is_active = TRUE");
    let mut stream = sqlx::query_as::<_, LeaveType>(&sql).fetch(pool);

    let mut total = 0usize;
    while let Some(row) = stream.next().await {
        insert(&row?).await;
        total += 1;
    }

    log::info!("Leave type cache warmup complete: {} active types", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::leave_type::tests::annual;

    #[actix_web::test]
    async fn insert_then_invalidate() {
        let mut t = annual();
        t.id = 9_001;
        insert(&t).await;
        assert_eq!(cached(9_001).await.map(|c| c.code), Some("ANNUAL".to_string()));

        invalidate(9_001).await;
        assert!(cached(9_001).await.is_none());
    }
}
