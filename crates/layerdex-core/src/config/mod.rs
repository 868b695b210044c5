pub mod index;
pub mod read_pool;

pub use index::{DuplicatePolicy, IndexConfig, SynchronousMode};
pub use read_pool::ReadPoolConfig;
