use crate::{
    api::{leave_balance, leave_request, leave_type},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> anyhow::Result<Governor<PeerIpKeyExtractor, NoOpMiddleware>> {
    let requests_per_min = requests_per_min.max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond((60_000 / requests_per_min as u64).max(1))
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("invalid rate limit: {requests_per_min}/min"))?;
    Ok(Governor::new(&cfg))
}

/// Rate limiters, built once at startup and shared by every worker.
#[derive(Clone)]
pub struct Limiters {
    login: Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>,
    refresh: Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>,
    protected: Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>,
}

impl Limiters {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            login: Arc::new(build_limiter(config.rate_login_per_min)?),
            refresh: Arc::new(build_limiter(config.rate_refresh_per_min)?),
            protected: Arc::new(build_limiter(config.rate_protected_per_min)?),
        })
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(limiters.refresh.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(limiters.protected.clone())
            .service(web::resource("/me").route(web::get().to(handlers::me)))
            .service(web::resource("/users").route(web::post().to(handlers::create_user)))
            .service(
                web::scope("/leave")
                    // /leave
                    .service(
                        web::resource("")
                            .route(web::get().to(leave_request::leave_list))
                            .route(web::post().to(leave_request::create_leave)),
                    )
                    .service(web::resource("/preview").route(web::post().to(leave_request::preview_leave)))
                    // /leave/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(leave_request::get_leave))
                            .route(web::put().to(leave_request::update_leave)),
                    )
                    .service(web::resource("/{id}/cancel").route(web::put().to(leave_request::cancel_leave)))
                    .service(
                        web::resource("/{id}/request-cancellation")
                            .route(web::put().to(leave_request::request_cancellation)),
                    )
                    .service(
                        web::resource("/{id}/manager-approve").route(web::put().to(leave_request::manager_approve)),
                    )
                    .service(
                        web::resource("/{id}/manager-reject").route(web::put().to(leave_request::manager_reject)),
                    )
                    .service(web::resource("/{id}/hr-approve").route(web::put().to(leave_request::hr_approve)))
                    .service(web::resource("/{id}/hr-reject").route(web::put().to(leave_request::hr_reject)))
                    .service(
                        web::resource("/{id}/approve-cancellation")
                            .route(web::put().to(leave_request::approve_cancellation)),
                    )
                    .service(
                        web::resource("/{id}/reject-cancellation")
                            .route(web::put().to(leave_request::reject_cancellation)),
                    )
                    // /leave/{id}/attachment
                    .service(
                        web::resource("/{id}/attachment")
                            .app_data(web::PayloadConfig::new(config.max_attachment_bytes))
                            .route(web::put().to(leave_request::upload_attachment))
                            .route(web::get().to(leave_request::get_attachment)),
                    ),
            )
            .service(
                web::scope("/leave-types")
                    .service(
                        web::resource("")
                            .route(web::get().to(leave_type::list_leave_types))
                            .route(web::post().to(leave_type::create_leave_type)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(leave_type::get_leave_type))
                            .route(web::put().to(leave_type::update_leave_type))
                            .route(web::delete().to(leave_type::delete_leave_type)),
                    )
                    .service(web::resource("/{id}/toggle").route(web::put().to(leave_type::toggle_leave_type))),
            )
            .service(
                web::scope("/leave-balances")
                    .service(web::resource("").route(web::get().to(leave_balance::list_balances)))
                    .service(web::resource("/reset").route(web::post().to(leave_balance::reset_balances))),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns new access/refresh pair, old refresh token revoked
