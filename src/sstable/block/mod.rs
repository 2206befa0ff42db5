pub mod builder;
pub mod reader;

pub use builder::BlockBuilder;
pub use reader::{Block, BlockIterator};
