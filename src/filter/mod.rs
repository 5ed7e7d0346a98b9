//! Predicate builder: query-string filters, search and ordering for list endpoints.

mod builder;
mod ordering;
mod predicate;

pub use builder::*;
pub use ordering::*;
pub use predicate::*;
