//! Job records and the shared queue state.
//!
//! ```text
//!   dispatch ──push_request──▶ [ request queue ] ──pop_request──▶ worker
//!                                   │ jobs index                    │
//!   $/cancelRequest ──cancel_job────┘                               │ execute
//!                                                                   ▼
//!   responder ◀──pop_response── [ response queue ] ◀──push_response─┘
//! ```
//!
//! Every operation is one critical section on a single mutex. Workers reach
//! the same instance through the bridge, so from their side each call is a
//! synchronous round trip.

mod job;
mod state;

pub use job::{ExecutionFailure, Job, JobResult, Notification, Response};
pub use state::{JobSource, QueueOrder, QueueState};
