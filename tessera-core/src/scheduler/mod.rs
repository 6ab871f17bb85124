//! Priority thread pools with cancellable job queues.
//!
//! Every job is scheduled against a [`WeakQueue`]. A job only runs if its [`Queue`]
//! is still alive when a worker picks it up, which makes cancellation a matter of
//! dropping the owning [`Queue`] handle.

mod context;
mod jumper;
mod pool;
mod queue;

pub use context::SchedulerContext;
pub use jumper::QueueJumper;
pub use pool::ThreadPool;
pub use queue::{Queue, WeakQueue};

/// Job priority. Higher values run first; equal priorities run in submission order.
pub type Priority = i32;

pub const PRIO_HIGHEST: Priority = 100;
pub const PRIO_HIGHER: Priority = 90;
pub const PRIO_HIGH: Priority = 80;
pub const PRIO_NORMAL: Priority = 70;
pub const PRIO_LOW: Priority = 60;
pub const PRIO_LOWER: Priority = 50;
pub const PRIO_LOWEST: Priority = 40;

/// Loading tile data for display.
pub const LOAD_PRIO: Priority = PRIO_HIGHER;
/// Streaming source rows into the bottom layer.
pub const DATAFETCH_PRIO: Priority = PRIO_HIGH;
/// Reducing finished tiles into the next pyramid layer.
pub const REDUCE_PRIO: Priority = PRIO_NORMAL;

type Task = Box<dyn FnOnce() + Send + 'static>;
