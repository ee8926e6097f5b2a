//! Host side of the T-Ruby IDE integration.
//!
//! Owns one [`ProjectRegistry`] per host process, keyed by project root, that
//! starts output watchers when a T-Ruby project opens and tears them down
//! when it closes. Refreshes issued by the watchers are applied to the host's
//! view on the host's own execution context.

pub mod registry;
pub mod settings;
pub mod view;

pub use registry::{ProjectId, ProjectRegistry};
pub use settings::IdeSettings;
pub use view::{ProjectView, RefreshStats, TreeView, dispatch_refreshes};
