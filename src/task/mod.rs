//! Task catalog and progress tracking.
//!
//! - [`Step`] - one action plus its focus objects
//! - [`Task`] - validated, immutable ordered list of steps
//! - [`TaskCursor`] - current position within a task

pub mod catalog;
pub mod cursor;
pub mod step;

pub use catalog::Task;
pub use cursor::{Advance, TaskCursor};
pub use step::{Step, NONE_ACTION};
