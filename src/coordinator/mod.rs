pub mod coordinator;
pub mod scatter;
pub mod types;

pub use coordinator::WriteBehindCoordinator;
pub use scatter::ScatterPolicy;
pub use types::{CoordinatorError, Lifecycle};
