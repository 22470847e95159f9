//! HTTP boundary: identity resolution, the request gate adapter, and the
//! administrative API.

mod admin;
mod identity;
mod layer;

pub use admin::admin_router;
pub use identity::{HeaderIdentityResolver, Identity, IdentityResolver};
pub use layer::{GateLayer, RouteTable};
