use crate::api::leave_balance::{BalanceListResponse, BalanceQuery, ResetBalances, ResetSummary};
use crate::api::leave_request::{
    CancellationNote, LeaveFilter, LeaveListResponse, LeavePayload, LeavePreview, LeaveView, ReviewNote,
};
use crate::api::leave_type::{LeaveTypePayload, LeaveTypeQuery, LeaveTypeResponse};
use crate::auth::handlers::{LoginResponse, MeResponse};
use crate::model::leave_balance::LeaveBalance;
use crate::model::leave_request::{Availability, DurationKind, LeaveRequest};
use crate::model::leave_status::{LeaveAction, LeaveStatus};
use crate::model::leave_type::{GenderRestriction, LeaveType};
use crate::model::role::{Capability, Role};
use crate::models::{CreateUserReq, LoginReqDto};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Leave Management API",
        version = "1.0.0",
        description = r#"
## Leave Management

Employees apply for leave; requests move through a two-stage review
(manager, then HR) configured per leave type, and approved days are
debited from a yearly balance ledger.

### 🔹 Key Features
- **Leave Requests**
  - Apply, preview, edit while pending, cancel, request cancellation of approved leave
  - Manager and HR approval/rejection, cancellation review
  - Supporting documents (medical certificates)
- **Leave Types**
  - Paid/unpaid, certificate thresholds, carry-over caps, approval flow, gender restriction
- **Leave Balances**
  - Per employee, leave type and year; yearly allocation with carry-over

### 🔐 Security
All `/api` endpoints require a **JWT Bearer** access token.
What a caller may do is decided by the capabilities of their role;
each request view lists the caller's `permitted_actions`.

### 📦 Response Format
- JSON bodies; validation failures return `422` with per-field messages
- Pagination supported for list endpoints
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,
        crate::auth::handlers::create_user,

        crate::api::leave_request::leave_list,
        crate::api::leave_request::create_leave,
        crate::api::leave_request::preview_leave,
        crate::api::leave_request::get_leave,
        crate::api::leave_request::update_leave,
        crate::api::leave_request::cancel_leave,
        crate::api::leave_request::request_cancellation,
        crate::api::leave_request::manager_approve,
        crate::api::leave_request::manager_reject,
        crate::api::leave_request::hr_approve,
        crate::api::leave_request::hr_reject,
        crate::api::leave_request::approve_cancellation,
        crate::api::leave_request::reject_cancellation,
        crate::api::leave_request::upload_attachment,
        crate::api::leave_request::get_attachment,

        crate::api::leave_type::list_leave_types,
        crate::api::leave_type::get_leave_type,
        crate::api::leave_type::create_leave_type,
        crate::api::leave_type::update_leave_type,
        crate::api::leave_type::toggle_leave_type,
        crate::api::leave_type::delete_leave_type,

        crate::api::leave_balance::list_balances,
        crate::api::leave_balance::reset_balances
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            MeResponse,
            CreateUserReq,
            Role,
            Capability,
            LeaveRequest,
            LeaveStatus,
            LeaveAction,
            DurationKind,
            Availability,
            LeavePayload,
            LeavePreview,
            LeaveView,
            LeaveFilter,
            LeaveListResponse,
            ReviewNote,
            CancellationNote,
            LeaveType,
            GenderRestriction,
            LeaveTypePayload,
            LeaveTypeQuery,
            LeaveTypeResponse,
            LeaveBalance,
            BalanceQuery,
            BalanceListResponse,
            ResetBalances,
            ResetSummary
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, token rotation and accounts"),
        (name = "Leave", description = "Leave request workflow"),
        (name = "Leave Type", description = "Leave type configuration"),
        (name = "Leave Balance", description = "Yearly balance ledger"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_workflow_and_bearer_scheme() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();

        assert!(json["paths"]["/api/leave/{id}/hr-approve"]["put"].is_object());
        assert!(json["paths"]["/api/leave-balances/reset"]["post"].is_object());
        assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
    }
}
