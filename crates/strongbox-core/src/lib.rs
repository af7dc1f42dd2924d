//! Core abstractions for Strongbox: properties containers, the error-callback
//! surface and the bounded retry executor shared by every storage layer.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod callback;
pub mod properties;
pub mod retry;

pub use callback::{Action, ErrorCallback, OperationType, StatusCode};
pub use properties::{
    InMemoryProperties, InMemoryPropertiesFactory, Properties, PropertiesError, PropertiesFactory,
};
pub use retry::{Abort, AttemptError, RetryExecutor, RetryPolicy, StoreOptions};
