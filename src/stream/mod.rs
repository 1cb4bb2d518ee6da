//! Server-push delivery: frame codec, connection, periodic emitters.
//!
//! ```text
//! handler ──open()──> PushConnection ──mpsc<Bytes>──> response body ──> client
//!    │                     ▲
//!    └─ spawn ─> run_emitters() / relay()   (one task per connection)
//! ```
//!
//! A connection has exactly one writer task. Dropping the body (client gone)
//! or cancelling the token ends that task; nothing is written afterwards.

pub mod connection;
pub mod demo;
pub mod emitter;
pub mod frame;

pub use connection::{PushConnection, sse_response};
pub use emitter::{PeriodicEmitter, run_emitters};
pub use frame::Frame;
