//! Worker processes.
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │       main process       │
//!                 │  QueueState + Bridge     │
//!                 └────────────┬─────────────┘
//!                              │ bridge.sock
//!               ┌──────────────┼──────────────┐
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ worker 0  │  │ worker 1  │  │ worker N  │
//!         │ pop/exec/ │  │ pop/exec/ │  │ pop/exec/ │
//!         │ push      │  │ push      │  │ push      │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! A worker that stalls or crashes takes only its own in-flight job with it.

mod pool;
mod proc;
mod signals;
mod spawn;
mod worker_main;

pub use pool::{RestartPolicy, Spawner, Supervisor, WorkerPool};
pub use spawn::{WorkerCommand, spawn_worker};
pub use worker_main::{WorkerArgs, run_worker_main, worker_loop};
