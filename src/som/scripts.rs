//! Page-context helper scripts.
//!
//! Each script is a single JavaScript function expression kept in its own
//! `.js` file under `scripts/` and embedded at compile time. Drivers call them
//! through [`PageDriver::evaluate`](crate::browser::PageDriver::evaluate) with
//! one JSON argument.

macro_rules! page_script {
    ($file:literal) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/", $file))
    };
}

/// Composed-tree scan of interactivity candidates
pub const SCAN: &str = page_script!("scan.js");
/// Removes marker attributes and overlays from earlier rounds
pub const CLEAR: &str = page_script!("clear.js");
/// Stamps marker attributes and paints the overlay
pub const MARK: &str = page_script!("mark.js");
/// Lists live nodes carrying one marker id
pub const RESOLVE: &str = page_script!("resolve.js");
pub const OBSERVE_MUTATIONS: &str = page_script!("observe_mutations.js");
pub const COLLECT_MUTATIONS: &str = page_script!("collect_mutations.js");
/// Cosmetic dot where a coordinate command lands
pub const DEBUG_POINT: &str = page_script!("debug_point.js");
