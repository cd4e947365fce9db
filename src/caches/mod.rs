//! Persistent, dynamic, and visibility caches (spec §4.5).

pub mod dynamic;
pub mod persistent;
pub mod visibility;

pub use dynamic::{CentralDataCache, DeviceDetailsCache, DeviceDetailsFetch};
pub use persistent::{CacheOp, DeviceDescriptionCache, ParamsetDescriptionCache};
pub use visibility::ParameterVisibilityCache;
