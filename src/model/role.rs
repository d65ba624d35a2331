use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, AsRefStr, Display, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin = 1,
    Hr = 2,
    Employee = 3,
    Senior = 4,
    Lead = 5,
    ProjectManager = 6,
}

/// What a role is allowed to do in the leave workflow.
///
/// Handlers check capabilities, never role names.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// First-stage review of `pending_manager` requests.
    ManagerApprove,
    /// Second-stage, final review of `pending_hr` requests.
    HrApprove,
    /// Decide on cancellation requests of approved leave.
    HandleCancellation,
    /// Manage leave types and run balance resets.
    Configure,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Hr),
            3 => Some(Role::Employee),
            4 => Some(Role::Senior),
            5 => Some(Role::Lead),
            6 => Some(Role::ProjectManager),
            _ => None,
        }
    }

    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Admin | Role::Hr => &[ManagerApprove, HrApprove, HandleCancellation, Configure],
            Role::Senior | Role::Lead | Role::ProjectManager => &[ManagerApprove],
            Role::Employee => &[],
        }
    }

    pub fn has(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Reviewers may see every request, not only their own.
    pub fn is_reviewer(self) -> bool {
        !self.capabilities().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ids_round_trip() {
        for id in 1..=6 {
            let role = Role::from_id(id).unwrap();
            assert_eq!(role as u8, id);
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(7), None);
    }

    #[test]
    fn senior_roles_only_review_first_stage() {
        for role in [Role::Senior, Role::Lead, Role::ProjectManager] {
            assert!(role.has(Capability::ManagerApprove));
            assert!(!role.has(Capability::HrApprove));
            assert!(!role.has(Capability::HandleCancellation));
            assert!(!role.has(Capability::Configure));
        }
    }

    #[test]
    fn hr_and_admin_may_override_every_stage() {
        for role in [Role::Hr, Role::Admin] {
            assert!(role.has(Capability::ManagerApprove));
            assert!(role.has(Capability::HrApprove));
            assert!(role.has(Capability::HandleCancellation));
            assert!(role.has(Capability::Configure));
        }
    }

    #[test]
    fn employees_have_no_review_capability() {
        assert!(Role::Employee.capabilities().is_empty());
        assert!(!Role::Employee.is_reviewer());
        assert!(Role::Lead.is_reviewer());
    }

    #[test]
    fn role_names_are_snake_case() {
        assert_eq!(Role::ProjectManager.as_ref(), "project_manager");
        assert_eq!("hr".parse::<Role>().unwrap(), Role::Hr);
    }
}
