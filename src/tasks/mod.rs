//! Task tracking — registry, status notification loop, and client fan-out.

pub mod model;
pub mod notify;
pub mod registry;
pub mod ws;

pub use model::{Server, Task, TaskSnapshot, TaskStatus, WsMessage};
pub use notify::run_notify_loop;
pub use registry::TaskRegistry;
