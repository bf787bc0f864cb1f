//! Shared primitives used across PixelDust crates.

use core::fmt;

/// Result alias used across the workspace.
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Workspace error carrying a dotted, machine-matchable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserError {
    pub code: &'static str,
    pub message: String,
}

impl BrowserError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for BrowserError {}

/// Browser-assigned identifier of a render process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildId(pub i32);

impl ChildId {
    /// The browser process itself, used when no renderer asked for the work.
    pub const BROWSER: ChildId = ChildId(0);
}

/// Routing identifier of a view or frame inside one render process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(pub i32);

/// Process-wide unique address of a view: `(child process, route)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalRouteId {
    pub child_id: ChildId,
    pub route_id: RouteId,
}

impl GlobalRouteId {
    pub fn new(child_id: ChildId, route_id: RouteId) -> Self {
        Self { child_id, route_id }
    }
}

impl fmt::Display for GlobalRouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.child_id.0, self.route_id.0)
    }
}
