//! Small catch-all helpers shared by the `pkgsuper` crates. Generally only
//! add things here that depend on little beyond the standard library and
//! `tracing`.
mod tracing_util;
pub use tracing_util::*;
