//! Quote provider access
//!
//! The endpoint registry knows which operations exist and how their URLs
//! are built; the client performs the request and classifies the body.

pub mod client;
pub mod endpoints;

pub use client::{
    classify, Advisory, AdvisoryKind, FetchError, FetchOutcome, QuoteClient,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use endpoints::{
    EndpointRegistry, EndpointSpec, Operation, Request, DEFAULT_BASE_URL,
    DEFAULT_INTRADAY_INTERVAL,
};
