//! Entity model: JSON config types, validation, and the resolved form used at runtime.

pub mod loader;
pub mod resolved;
pub mod types;
pub mod validator;

pub use loader::*;
pub use resolved::*;
pub use types::*;
pub use validator::*;
