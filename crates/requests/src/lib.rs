//! `relaysync-requests`
//!
//! **Responsibility:** the contract between request generators and the driver
//! that polls them.
//!
//! This crate provides:
//! - An abstract `Request`/`Response` pair (no HTTP stack; the transport is a seam)
//! - The `RequestGenerator` contract and a fair `RequestGeneratorGroup`
//! - A `NewRequestsNotifier` the driver sleeps on
//! - The `OperationLoop` driver that feeds a `Transport`

pub mod generator;
pub mod notifier;
pub mod operation_loop;
pub mod request;
pub mod response;

pub use generator::{RequestGenerator, RequestGeneratorGroup};
pub use notifier::NewRequestsNotifier;
pub use operation_loop::{OperationLoop, OperationLoopHandle, Transport};
pub use request::{CompletionHandler, Method, Request};
pub use response::{Response, ResponseStatus};
