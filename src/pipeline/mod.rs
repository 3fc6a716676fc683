//! Pipeline stages for PDF translation.
//!
//! Each submodule implements one step and is testable on its own; the
//! orchestration lives in [`crate::translate`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ segment ──▶ dispatch ──▶ reflow
//! (path/URL) (pdfium)   (classify)  (cache, ratelimit,
//!                                     llm, postprocess)
//! ```
//!
//! 1. [`input`]    resolve the user-supplied file, directory, or URL
//! 2. [`extract`]  raw spans, table grids and figures; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`classify`] / [`segment`] turn spans into typed blocks and merge
//!    fragments of one paragraph
//! 4. [`dispatch`] per-content-type translation over [`cache`],
//!    [`ratelimit`] and [`llm`], with [`postprocess`] cleaning and table
//!    JSON repair
//! 5. [`reflow`]   split one merged answer back across its source blocks

pub mod cache;
pub mod classify;
pub mod dispatch;
pub mod extract;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod ratelimit;
pub mod reflow;
pub mod segment;
