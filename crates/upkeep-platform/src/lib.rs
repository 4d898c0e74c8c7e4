mod fs;
mod location;
mod paths;

pub use fs::write_atomic;
pub use location::{ResourceLocation, resolve_against};
pub use paths::{AppPaths, AppPathsError};
