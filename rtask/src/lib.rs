//! Structured task spawning and shutdown coordination shared by the relay
//! and client binaries.

pub mod notify_once;
pub mod task;

pub use notify_once::NotifyOnce;
pub use task::{join_tasks_and_shutdown, try_join_tasks_and_shutdown, Error, RTask};
