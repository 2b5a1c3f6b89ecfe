//! Context module: configuration-driven orchestration of a transport run.
//!
//! Modules:
//! - [`transport_context`]: `TransportContext`, which validates a run, assembles
//!   the scattering matrix and dispatches to the requested BTE solvers.
//!
//! # Example
//! ```rust,ignore
//! use relaxon::context::TransportContext;
//! let ctx = TransportContext::new(&comm, options)?;
//! let report = ctx.run(&system, &coupling)?;
//! ```

pub mod transport_context;
pub use transport_context::{TransportContext, TransportReport};
