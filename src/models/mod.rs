pub mod assignment;
pub mod case;
pub mod enums;
pub mod queue;

pub use assignment::*;
pub use case::*;
pub use queue::*;
