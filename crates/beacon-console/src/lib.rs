//! Console log assembly for Beacon.
//!
//! Raw console chunks of a job are split into lines and grouped into
//! sections delimited by `|##` header and `|Step` marker lines. Each section
//! keeps a bounded window of recent lines and an HTML rendering with ANSI
//! styling converted to spans.

pub mod assembler;
pub mod render;
pub mod section;

pub use assembler::{AssemblerState, LogAssembler};
pub use render::{escape_html, render_ansi};
pub use section::{ConsoleLine, Section, SectionKind};
