//! Binlog ingestion and event extraction.

pub mod publisher;
pub mod source;

pub use publisher::BinlogPublisher;
pub use source::{BinlogSource, FakeBinlogSource, RowEvent, RowKind};
