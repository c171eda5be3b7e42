//! reqwest-backed implementation of the [`HttpTransport`](cadenza_common::transport::HttpTransport) port.

pub mod client;

pub use client::{ReqwestTransport, ReqwestTransportBuilder};
