//! Built-in target classes.
//!
//! The engine only ever sees [`crate::target::Target`]; these three classes
//! cover the common leaf needs (copying trees, generating files, archiving)
//! and double as the reference implementations of the contract.

pub mod archive;
pub mod copy;
pub mod write_file;

pub use archive::Archive;
pub use copy::Copy;
pub use write_file::WriteFile;
