// Public modules
pub mod db;
pub mod envfile;
pub mod error;
pub mod flags;
pub mod git;
pub mod pipeline;
pub mod prompt;
pub mod remotes;
pub mod rollback;
pub mod session;
pub mod testing;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
