/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    U64(u64),
    I32(i32),
    String(String),
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

/// ===============================
/// Dynamic WHERE clause
/// ===============================
#[derive(Debug, Default)]
pub struct SqlFilter {
    conditions: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `condition` (one `?` placeholder) bound to `value`.
    pub fn push(&mut self, condition: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.values.push(value.into());
        self
    }

    pub fn push_opt<T: Into<SqlValue>>(&mut self, condition: &str, value: Option<T>) -> &mut Self {
        if let Some(v) = value {
            self.push(condition, v);
        }
        self
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

/// Binds every value of a `SqlFilter` onto a sqlx query, in order.
#[macro_export]
macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut q = $query;
        for value in $values.iter() {
            q = match value {
                $crate::utils::db_utils::SqlValue::U64(v) => q.bind(*v),
                $crate::utils::db_utils::SqlValue::I32(v) => q.bind(*v),
                $crate::utils::db_utils::SqlValue::String(v) => q.bind(v.as_str()),
            };
        }
        q
    }};
}

/// ===============================
/// Pagination
/// ===============================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub per_page: u64,
    pub offset: u64,
}

impl Page {
    /// 1-based page, `per_page` clamped to 1..=100.
    pub fn new(page: Option<u64>, per_page: Option<u64>) -> Self {
        let per_page = per_page.unwrap_or(10).clamp(1, 100);
        let page = page.unwrap_or(1).max(1);
        Self {
            page,
            per_page,
            offset: (page - 1) * per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_where() {
        assert_eq!(SqlFilter::new().where_clause(), "");
    }

    #[test]
    fn conditions_are_joined_in_order_with_values() {
        let mut f = SqlFilter::new();
        f.push("employee_id = ?", 7u64)
            .push_opt::<&str>("status = ?", None)
            .push_opt("status = ?", Some("approved"))
            .push_opt("YEAR(start_date) = ?", Some(2026));

        assert_eq!(f.where_clause(), " WHERE employee_id = ? AND status = ? AND YEAR(start_date) = ?");
        assert_eq!(
            f.values,
            vec![SqlValue::U64(7), SqlValue::String("approved".into()), SqlValue::I32(2026)]
        );
    }

    #[test]
    fn page_defaults_and_clamps() {
        assert_eq!(Page::new(None, None), Page { page: 1, per_page: 10, offset: 0 });
        assert_eq!(Page::new(Some(3), Some(500)), Page { page: 3, per_page: 100, offset: 200 });
        assert_eq!(Page::new(Some(0), Some(0)), Page { page: 1, per_page: 1, offset: 0 });
    }
}
