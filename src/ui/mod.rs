//! Terminal output for the CLI
//!
//! Interactive terminals get colored steps and a phase progress bar;
//! CI and piped output fall back to plain bracketed prefixes.
//!
//! # Example
//!
//! ```rust,ignore
//! use pack::ui::{self, PipelineProgress, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "Building myorg/app");
//!
//! let progress = Arc::new(PipelineProgress::new(&ctx));
//! // hand `progress` to the build as observer and log sink
//! progress.finish();
//!
//! ui::outro_success(&ctx, "Built myorg/app");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_error, outro_success, remark, section, step_error, step_info, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::PipelineProgress;
