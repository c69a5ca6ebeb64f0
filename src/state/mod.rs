pub mod registry;
pub mod scheduler;

pub use registry::*;
pub use scheduler::*;
