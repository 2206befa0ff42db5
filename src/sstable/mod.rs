pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

pub use builder::{TableBuilder, TableOptions, TableSummary};
pub use iterator::TableIterator;
pub use reader::Table;
