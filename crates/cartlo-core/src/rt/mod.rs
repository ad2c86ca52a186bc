//! # Runtime Primitives
//!
//! Thread-level building blocks shared by the lock, bias and measurement
//! engines:
//!
//! - **StopToken**: cooperative cancellation checked between steps
//! - **Mailbox**: single-slot cross-thread handoff with timed waits
//! - **Worker**: named background thread owning an operation

mod mailbox;
mod stop;
mod worker;

pub use mailbox::{Mailbox, WaitError};
pub use stop::StopToken;
pub use worker::{Worker, WorkerConfig};
