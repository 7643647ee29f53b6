//! The external processor: phase dispatcher, response builders, the five
//! processors realizing components C–G, and the out-of-band clients
//! (auth service, KV cache, message bus) they talk to.
//!
//! [`dispatcher`] drives one ext_proc gRPC stream; [`server`] adapts that to
//! the generated tonic service trait; [`service`] selects and constructs the
//! single processor the deployed instance runs, per `-s/--service`.

pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod jwt;
pub mod processors;
pub mod responses;
pub mod server;
pub mod service;
