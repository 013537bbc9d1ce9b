//! Caller identity extraction
//!
//! Authentication happens upstream; the authenticator forwards the caller's
//! stable id and optional tenant scope in request headers.

use super::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use collab_types::{TenantId, UserId};
use std::convert::Infallible;

/// Identity attached to a request, if any
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user: Option<UserId>,
    pub tenant: Option<TenantId>,
}

impl Caller {
    /// The caller's id, or 401
    pub fn require(&self) -> ApiResult<&UserId> {
        self.user.as_ref().ok_or(ApiError::Unauthenticated)
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = header_value(parts, &state.auth.user_header).and_then(|raw| {
            UserId::parse(raw)
                .map_err(|e| tracing::debug!(error = %e, "Ignoring malformed identity header"))
                .ok()
        });
        let tenant = header_value(parts, &state.auth.tenant_header).map(TenantId::new);

        Ok(Caller { user, tenant })
    }
}
