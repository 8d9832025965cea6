pub mod memory;
pub mod registry;
pub mod traits;

pub use memory::{MemoryLedgerAdapter, SubmitFailure};
pub use registry::AssetRegistry;
pub use traits::AssetAdapter;
