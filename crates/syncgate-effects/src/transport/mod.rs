//! Transport handlers

pub mod http;

pub use http::HttpTransportHandler;
