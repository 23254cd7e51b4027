//! Rendering pipeline.
//!
//! Requests are resolved and validated before a lease is taken, so invalid
//! input never occupies pool capacity. Each engine stage runs under the
//! configured deadline; an expired deadline poisons the lease.

mod encode;
mod pipeline;
mod types;

pub use encode::TranscodeError;
pub use pipeline::{RenderPipelineConfig, RenderService};
pub use types::{ErrorKind, RenderBody, RenderError, RenderResult, Stage};
