pub mod buffer;
pub mod catalog;
pub mod codec;
pub mod errors;
pub mod store;

pub use buffer::PriorityBuffer;
pub use codec::Codec;
pub use errors::{BufferError, CatalogError, StoreError};
