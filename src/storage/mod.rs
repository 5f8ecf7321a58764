//! Storage abstractions and backends.
//!
//! Persistence technology is an external collaborator: the traits in
//! [`traits`] define the contract, and [`memory`] provides the
//! thread-safe reference implementation used for embedded usage and
//! tests.

pub mod memory;
pub mod traits;

pub use memory::{InMemoryCandidateStore, InMemoryIdentifierStore, InMemoryProfileStore};
pub use traits::{
    CandidateStore, DependentKind, DependentRecord, IdentifierStore, ProfileStore, StorageError,
};
