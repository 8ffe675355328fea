pub mod error;
pub mod json;
pub mod store;

pub use error::StoreError;
pub use json::JsonStore;
pub use store::{Store, StoreStats};
