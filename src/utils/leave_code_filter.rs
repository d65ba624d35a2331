use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;

use crate::model::leave_type::normalize_code;

/// Expected capacity and false-positive rate.
const FILTER_CAPACITY: usize = 10_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static CODE_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

/// Check if a leave type code might be in use (false positives possible)
pub fn might_exist(code: &str) -> bool {
    let code = normalize_code(code);
    CODE_FILTER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .contains(&code)
}

pub fn insert(code: &str) {
    let code = normalize_code(code);
    CODE_FILTER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .add(&code);
}

pub fn remove(code: &str) {
    let code = normalize_code(code);
    CODE_FILTER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(&code);
}

/// true => code already used by another leave type.
///
/// The filter answers negatives; possible positives go to the database.
pub async fn is_code_taken(pool: &MySqlPool, code: &str, except_id: Option<u64>) -> Result<bool, sqlx::Error> {
    if !might_exist(code) {
        return Ok(false);
    }

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM leave_types WHERE code = ? AND id <> ?")
        .bind(normalize_code(code))
        .bind(except_id.unwrap_or(0))
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Loads every existing code into the filter.
pub async fn warmup_code_filter(pool: &MySqlPool) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>("SELECT code FROM leave_types").fetch(pool);

    let mut total = 0usize;
    while let Some(row) = stream.next().await {
        let (code,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;
        insert(&code);
        total += 1;
    }

    log::info!("Leave type code filter warmup complete: {} codes", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_codes_are_found_case_insensitively() {
        assert!(!might_exist("FILTER_TEST_A"));
        insert("filter_test_a");
        assert!(might_exist("FILTER_TEST_A"));
        remove("FILTER_TEST_A");
        assert!(!might_exist("filter_test_a"));
    }
}
