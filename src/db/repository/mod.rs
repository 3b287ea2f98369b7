//! Repository layer: table-scoped database operations.
//!
//! Functions here are single statements with no policy. The claim and
//! work-queue modules compose them inside write transactions; nothing
//! outside those modules should mutate the queue or assignment tables.

mod assignment;
mod case;
mod eligibility;
mod unclaimed;
mod work_queue;

pub use assignment::*;
pub use case::*;
pub use eligibility::*;
pub use unclaimed::*;
pub use work_queue::*;
