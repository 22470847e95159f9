//! Identity resolution at the HTTP boundary.
//!
//! The gate consumes a resolved identity and plan tier as opaque input;
//! how they are established (API keys, sessions, upstream auth proxies)
//! belongs to a collaborator. The default implementation reads trusted
//! headers set by the authentication layer in front of this service.

use axum::http::HeaderMap;

use crate::policy::PlanTier;

/// A resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub tier: PlanTier,
}

/// Supplies `(identity, plan tier)` for a request.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Identity;
}

/// Resolves identity from `X-Api-Identity` and `X-Plan-Tier` headers.
///
/// Requests without an identity header share the anonymous identity on
/// the free tier; unknown tier values also fall back to free.
#[derive(Debug, Default, Clone)]
pub struct HeaderIdentityResolver;

impl HeaderIdentityResolver {
    pub const IDENTITY_HEADER: &'static str = "x-api-identity";
    pub const TIER_HEADER: &'static str = "x-plan-tier";
    pub const ANONYMOUS: &'static str = "anonymous";
}

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, headers: &HeaderMap) -> Identity {
        let id = headers
            .get(Self::IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .unwrap_or(Self::ANONYMOUS)
            .to_string();

        let tier = headers
            .get(Self::TIER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(PlanTier::parse)
            .unwrap_or(PlanTier::Free);

        Identity { id, tier }
    }
}
