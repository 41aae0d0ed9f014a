pub mod compiler;
pub mod snapshot;

pub use compiler::{CompiledRoute, RouteIdGenerator, GENERATED_RESOURCE_PREFIX};
pub use snapshot::{RouteSnapshot, SnapshotManager};
