//! Shared, windowed line buffers read by many independent consumers.
//!
//! The producer appends lines; each consumer holds a [`Consumer`] handle and
//! reads at its own pace from its own cursor. Buffers keep a bounded window
//! and never block the producer: when the window is full the oldest lines are
//! dropped and consumers that had not read them skip ahead.

mod cursor;
mod line_buffer;
mod record;
mod shared;
mod stream_buffer;
mod window;

pub use cursor::{Consumer, ConsumerId};
pub use line_buffer::{DEFAULT_LINE_BUFFER_SIZE, DEFAULT_POLL_INTERVAL, LineBuffer};
pub use record::{Line, StreamMask, StreamRecord};
pub use shared::BufferStats;
pub use stream_buffer::{DEFAULT_STREAM_BUFFER_SIZE, StreamBuffer, StreamBufferOptions};
pub use window::Window;
