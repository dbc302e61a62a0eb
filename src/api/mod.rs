//! HTTP transport shared by the remote service clients.
//!
//! The orchestration, provisioning and workflow services all speak JSON over
//! HTTP. [`ApiClient`] owns authentication, status-code mapping and the
//! transient-error retry policy so each service client only deals with its
//! own resources.

mod client;

pub use client::{ApiClient, ApiResult, RetryPolicy};
