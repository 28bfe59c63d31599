//! Storage backends shipped with the crate

#[cfg(test)]
pub(crate) mod faulty;
pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;
