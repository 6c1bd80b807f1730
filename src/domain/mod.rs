//! Domain layer: link, preview and update-summary types with their invariants.

pub mod error;
pub mod links;
pub mod preview;
pub mod slug;
pub mod stats;
