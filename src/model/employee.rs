use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, mysql::MySqlRow};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, AsRefStr, Display, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// The slice of an employee profile the leave workflow reads.
#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: u64,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<Gender>,
    /// Default manager-approver for new requests.
    pub manager_id: Option<u64>,
    pub is_active: bool,
}

impl<'r> FromRow<'r, MySqlRow> for Employee {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        // unknown values are treated as unset rather than failing the row
        let gender = row
            .try_get::<Option<String>, _>("gender")?
            .and_then(|g| g.parse().ok());

        Ok(Self {
            id: row.try_get("id")?,
            employee_code: row.try_get("employee_code")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            gender,
            manager_id: row.try_get("manager_id")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

pub const EMPLOYEE_COLUMNS: &str = "id, employee_code, first_name, last_name, gender, manager_id, is_active";

pub async fn find_employee(pool: &sqlx::MySqlPool, id: u64) -> Result<Option<Employee>, sqlx::Error> {
    sqlx::query_as::<_, Employee>(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}
