//! Resource storage for rewind.
//!
//! Defines the [`ResourceStore`] contract shared by the production store and
//! its sandbox twin, the [`SandboxStore`] extension used to seed and reset
//! the sandbox, and two implementations: [`MemoryStore`] and [`HttpStore`].
//! The [`conformance`] module checks any implementation against the contract.

pub mod conformance;
mod error;
mod http;
mod memory;
mod record;
mod traits;
pub mod wire;

pub use error::StorageError;
pub use http::{HttpStore, DEFAULT_TIMEOUT};
pub use memory::MemoryStore;
pub use record::{Resource, ResourceSet};
pub use traits::{ResourceStore, SandboxStore};
