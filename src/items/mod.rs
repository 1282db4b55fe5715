//! Extracted-item persistence
//!
//! Items flow through a bounded channel into a background batcher that
//! groups them per execution and flushes via the sink's bulk path when a
//! batch size or interval is reached. The executor never blocks on storage
//! beyond the channel's backpressure.

pub mod sink;
pub mod writer;

pub use sink::{ItemSink, MemoryItemSink, PostgresItemSink};
pub use writer::{ItemWriter, ItemWriterConfig};
