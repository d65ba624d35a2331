pub mod balance_reset_job;
pub mod db_utils;
pub mod leave_code_filter;
pub mod leave_type_cache;
