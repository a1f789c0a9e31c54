//! Index construction: full rebuilds from the corpus and incremental appends.

pub mod appender;
pub mod builder;

pub use appender::{AppendReport, IncrementalAppender, PendingAppend};
pub use builder::{IndexBuilder, RebuildReport};
