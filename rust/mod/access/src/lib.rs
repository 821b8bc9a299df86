//! Permission resolution for portal routes.
//!
//! Every route declares, per HTTP method, the capabilities that admit it.
//! Each entry carries a priority and a declarative row filter. A request is
//! admitted when the caller holds at least one listed capability; the held
//! capability with the smallest priority decides which filter the handler
//! merges into its query.
//!
//! # Usage
//!
//! ```ignore
//! let table = PermissionTable::load(Path::new("/etc/vidyarth/permissions.toml"))?;
//! let access = Arc::new(AccessControl::new(table)?);
//! let router = Router::new()
//!     .route("/api/videos", get(list_videos))
//!     .route_layer(axum::middleware::from_fn_with_state(access, access::guard));
//! ```

pub mod error;
pub mod filter;
pub mod middleware;
pub mod rule;
pub mod table;

pub use error::AccessError;
pub use filter::Filter;
pub use middleware::{ACCESS_PERMISSION_HEADER, guard};
pub use rule::{AccessGrant, MethodPermissionRule, PermissionEntry, Resolution};
pub use table::{AccessControl, PermissionTable};
