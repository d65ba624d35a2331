use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, mysql::MySqlRow};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::employee::Gender;
use crate::model::leave_status::ApprovalPolicy;

/// Restricts a leave type to employees of one gender.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, AsRefStr, Display, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GenderRestriction {
    Male,
    Female,
}

impl GenderRestriction {
    pub fn admits(self, gender: Option<Gender>) -> bool {
        matches!(
            (self, gender),
            (GenderRestriction::Male, Some(Gender::Male)) | (GenderRestriction::Female, Some(Gender::Female))
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "name": "Annual Leave",
    "code": "ANNUAL",
    "description": "Paid vacation",
    "days_per_year": 20.0,
    "is_paid": true,
    "requires_medical_cert": false,
    "medical_cert_min_days": null,
    "is_carry_over_allowed": true,
    "max_carry_over_days": 5.0,
    "requires_manager_approval": true,
    "requires_hr_approval": true,
    "color": "#4F46E5",
    "icon": "sun",
    "sort_order": 1,
    "gender_specific": null,
    "is_active": true
}))]
pub struct LeaveType {
    pub id: u64,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub days_per_year: f64,
    pub is_paid: bool,
    pub requires_medical_cert: bool,
    /// Certificate is required only above this many days; `None` means always.
    pub medical_cert_min_days: Option<f64>,
    pub is_carry_over_allowed: bool,
    /// Cap on carried days; `None` means unlimited.
    pub max_carry_over_days: Option<f64>,
    pub requires_manager_approval: bool,
    pub requires_hr_approval: bool,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub sort_order: i32,
    pub gender_specific: Option<GenderRestriction>,
    pub is_active: bool,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub created_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, MySqlRow> for LeaveType {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        let gender_specific = match row.try_get::<Option<String>, _>("gender_specific")? {
            Some(raw) => Some(raw.parse().map_err(|e: strum::ParseError| sqlx::Error::ColumnDecode {
                index: "gender_specific".to_string(),
                source: Box::new(e),
            })?),
            None => None,
        };

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            description: row.try_get("description")?,
            days_per_year: row.try_get("days_per_year")?,
            is_paid: row.try_get("is_paid")?,
            requires_medical_cert: row.try_get("requires_medical_cert")?,
            medical_cert_min_days: row.try_get("medical_cert_min_days")?,
            is_carry_over_allowed: row.try_get("is_carry_over_allowed")?,
            max_carry_over_days: row.try_get("max_carry_over_days")?,
            requires_manager_approval: row.try_get("requires_manager_approval")?,
            requires_hr_approval: row.try_get("requires_hr_approval")?,
            color: row.try_get("color")?,
            icon: row.try_get("icon")?,
            sort_order: row.try_get("sort_order")?,
            gender_specific,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl LeaveType {
    pub fn approval_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy {
            requires_manager: self.requires_manager_approval,
            requires_hr: self.requires_hr_approval,
        }
    }

    pub fn certificate_required_for(&self, total_days: f64) -> bool {
        self.requires_medical_cert && self.medical_cert_min_days.map_or(true, |min| total_days > min)
    }

    pub fn is_available_to(&self, gender: Option<Gender>) -> bool {
        self.gender_specific.map_or(true, |g| g.admits(gender))
    }

    /// Days carried into the next year from `previous_remaining`.
    pub fn carry_over(&self, previous_remaining: f64) -> f64 {
        if !self.is_carry_over_allowed {
            return 0.0;
        }
        let available = previous_remaining.max(0.0);
        match self.max_carry_over_days {
            Some(cap) => available.min(cap),
            None => available,
        }
    }
}

/// Normalizes a user-supplied code: trimmed and uppercase.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn is_valid_code(code: &str) -> bool {
    (2..=20).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

pub fn is_valid_color(color: &str) -> bool {
    color.len() == 7 && color.starts_with('#') && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}
