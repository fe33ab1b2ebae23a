// # Configuration Source Implementations
//
// This module provides implementations of the ConfigSource trait for
// different places configuration can live.

pub mod env;
pub mod file;
pub mod memory;

pub use env::EnvConfigSource;
pub use file::FileConfigSource;
pub use memory::MemoryConfigSource;
