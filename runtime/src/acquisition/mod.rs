//! Acquisition: plain HTTP retrieval, no browser.

pub mod http_client;
