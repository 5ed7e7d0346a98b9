//! Request-side services shared by the entity handlers.

mod validation;
pub use validation::RequestValidator;
