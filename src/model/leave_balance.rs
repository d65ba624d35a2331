use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::model::employee::Employee;
use crate::model::leave_status::BalanceEffect;
use crate::model::leave_type::LeaveType;

/// Ledger row for one employee, leave type and year.
///
/// `remaining_days` always equals `total_days - used_days`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "employee_id": 1000,
    "leave_type_id": 1,
    "year": 2026,
    "total_days": 23.0,
    "used_days": 4.5,
    "remaining_days": 18.5,
    "carried_over_days": 3.0
}))]
pub struct LeaveBalance {
    pub id: u64,
    pub employee_id: u64,
    pub leave_type_id: u64,
    pub year: i32,
    pub total_days: f64,
    pub used_days: f64,
    pub remaining_days: f64,
    pub carried_over_days: f64,
}

impl LeaveBalance {
    pub fn covers(&self, days: f64) -> bool {
        self.remaining_days >= days
    }

    pub fn apply(&mut self, effect: BalanceEffect, days: f64) {
        match effect {
            BalanceEffect::None => return,
            BalanceEffect::Debit => self.used_days += days,
            BalanceEffect::Credit => self.used_days -= days,
        }
        self.remaining_days = self.total_days - self.used_days;
    }
}

/// A balance row the yearly reset is about to write.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlannedBalance {
    pub employee_id: u64,
    pub leave_type_id: u64,
    pub year: i32,
    pub total_days: f64,
    pub used_days: f64,
    pub carried_over_days: f64,
}

impl PlannedBalance {
    pub fn remaining_days(&self) -> f64 {
        self.total_days - self.used_days
    }
}

/// (employee_id, leave_type_id)
pub type LedgerKey = (u64, u64);

/// Computes the balance rows of `year` for every active employee and
/// every active leave type they are eligible for.
///
/// `previous_remaining` holds last year's remaining days, `used` the days
/// already consumed in `year` by approved requests.
pub fn plan_year(
    year: i32,
    employees: &[Employee],
    leave_types: &[LeaveType],
    previous_remaining: &HashMap<LedgerKey, f64>,
    used: &HashMap<LedgerKey, f64>,
) -> Vec<PlannedBalance> {
    let mut planned = Vec::new();

    for employee in employees.iter().filter(|e| e.is_active) {
        for leave_type in leave_types.iter().filter(|t| t.is_active) {
            if !leave_type.is_available_to(employee.gender) {
                continue;
            }
            let key = (employee.id, leave_type.id);
            let carried = previous_remaining
                .get(&key)
                .map_or(0.0, |&remaining| leave_type.carry_over(remaining));

            planned.push(PlannedBalance {
                employee_id: employee.id,
                leave_type_id: leave_type.id,
                year,
                total_days: leave_type.days_per_year + carried,
                used_days: used.get(&key).copied().unwrap_or(0.0),
                carried_over_days: carried,
            });
        }
    }

    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::employee::Gender;
    use crate::model::leave_type::{GenderRestriction, tests::annual};

    fn employee(id: u64, gender: Option<Gender>, is_active: bool) -> Employee {
        Employee {
            id,
            employee_code: format!("EMP-{id}"),
            first_name: "Test".into(),
            last_name: "User".into(),
            gender,
            manager_id: None,
            is_active,
        }
    }

    fn balance(total: f64, used: f64) -> LeaveBalance {
        LeaveBalance {
            id: 1,
            employee_id: 100,
            leave_type_id: 1,
            year: 2026,
            total_days: total,
            used_days: used,
            remaining_days: total - used,
            carried_over_days: 0.0,
        }
    }

    #[test]
    fn approval_debits_and_cancellation_restores_exactly() {
        let mut b = balance(20.0, 2.0);
        b.apply(BalanceEffect::Debit, 3.5);
        assert_eq!(b.used_days, 5.5);
        assert_eq!(b.remaining_days, 14.5);

        b.apply(BalanceEffect::Credit, 3.5);
        assert_eq!(b.used_days, 2.0);
        assert_eq!(b.remaining_days, 18.0);

        b.apply(BalanceEffect::None, 3.5);
        assert_eq!(b.remaining_days, 18.0);
    }

    #[test]
    fn covers_is_inclusive() {
        let b = balance(10.0, 9.5);
        assert!(b.covers(0.5));
        assert!(!b.covers(1.0));
    }

    #[test]
    fn plan_applies_carry_over_and_existing_usage() {
        let employees = vec![employee(1, Some(Gender::Male), true), employee(2, None, true)];
        let types = vec![annual()];
        let previous = HashMap::from([((1, 1), 8.0), ((2, 1), 2.5)]);
        let used = HashMap::from([((2, 1), 1.0)]);

        let plan = plan_year(2027, &employees, &types, &previous, &used);
        assert_eq!(plan.len(), 2);

        assert_eq!(plan[0].carried_over_days, 5.0);
        assert_eq!(plan[0].total_days, 25.0);
        assert_eq!(plan[0].remaining_days(), 25.0);

        assert_eq!(plan[1].carried_over_days, 2.5);
        assert_eq!(plan[1].total_days, 22.5);
        assert_eq!(plan[1].remaining_days(), 21.5);
        assert!(plan.iter().all(|p| p.year == 2027));
    }

    #[test]
    fn plan_skips_inactive_and_ineligible() {
        let employees = vec![
            employee(1, Some(Gender::Male), true),
            employee(2, Some(Gender::Female), true),
            employee(3, Some(Gender::Female), false),
        ];
        let mut maternity = annual();
        maternity.id = 2;
        maternity.gender_specific = Some(GenderRestriction::Female);
        let mut retired = annual();
        retired.id = 3;
        retired.is_active = false;

        let plan = plan_year(
            2027,
            &employees,
            &[annual(), maternity, retired],
            &HashMap::new(),
            &HashMap::new(),
        );

        let keys: Vec<LedgerKey> = plan.iter().map(|p| (p.employee_id, p.leave_type_id)).collect();
        assert_eq!(keys, vec![(1, 1), (2, 1), (2, 2)]);
        assert!(plan.iter().all(|p| p.carried_over_days == 0.0));
    }
}
