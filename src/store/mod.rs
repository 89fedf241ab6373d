//! アカウントストアの実装

mod memory;

pub use memory::InMemoryAccountStore;
