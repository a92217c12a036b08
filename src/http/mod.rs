//! HTTP serving support.
//!
//! The service terminates plain HTTP; TLS is handled by the platform
//! ingress in front of it. This module carries the graceful-shutdown
//! signal future used by the serve loop.

pub mod shutdown;
