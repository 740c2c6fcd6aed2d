//! Client for the external tool-runner service: the signed-HTTP caller
//! and the request/response wire contract.
//!
//! The tool-runner executes tool bodies out of process. The engine only
//! ever talks to it through the [`ToolRunner`] trait, so tests and dev
//! setups can substitute a stub.

mod client;
mod sign;
mod types;

pub use client::{HttpToolRunner, ToolRunner};
pub use sign::{sign_body, verify_signature};
pub use types::{ExecuteLimits, ExecutePolicy, ExecuteRequest, ExecuteResponse, RunnerStatus};
