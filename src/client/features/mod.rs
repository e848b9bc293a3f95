//! Client feature surfaces: sampling and roots.

pub mod roots;
pub mod sampling;

pub use roots::{CapabilityStatus, RootsCache, RootsWatcher};
