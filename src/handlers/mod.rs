//! HTTP handlers for the API root and entity CRUD.

pub mod entity;
pub mod root;
pub use root::api_root;
