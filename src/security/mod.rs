//! Security layer: URL allow-listing, script screening, audit logging.
//!
//! Every security-relevant decision made here is recorded through the
//! [`audit::AuditLog`].

pub mod audit;
pub mod script_sandbox;
pub mod url_filter;

pub use audit::{AuditEvent, AuditLog};
pub use script_sandbox::ScriptPolicy;
pub use url_filter::UrlPolicy;
