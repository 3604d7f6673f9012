//! Kernelhub Library
//!
//! This library provides the core components for the remote kernel session
//! gateway: credential checking, kernel process lifecycle, routing, and the
//! HTTP surface.

pub mod api;
pub mod credentials;
pub mod hub;
pub mod kernel;
pub mod routing;
