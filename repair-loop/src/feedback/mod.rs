//! Feedback Module
//!
//! Turns validator output into correction directives for the next attempt:
//! - Classify raw validation output into a verdict
//! - Compile a failing verdict into a bounded, deterministic directive
//! - Render the accumulated directives for the generation prompt
//!
//! # Architecture
//!
//! ```text
//! Candidate → Validator → diagnostics::classify → FeedbackCompiler → Generator
//!                 ↑                                                      |
//!                 └──────────────────────────────────────────────────────┘
//! ```

pub mod compiler;
pub mod diagnostics;

pub use compiler::{render_history, FeedbackCompiler, FeedbackConfig, FeedbackDirective};
pub use diagnostics::{classify, find_record, innermost_error, HarnessOutput, HarnessRecord};
