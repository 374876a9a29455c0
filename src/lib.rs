//! rolltable — procedural text generation by random-table expansion.
//!
//! Tables are declared in a small RON format, stored in a process-wide
//! catalog, and rolled or picked on. Entry bodies may reference other
//! tables, sub-tables, picks, and dice expressions; the expansion engine
//! rewrites those references recursively, bounded by a hard call-depth
//! cap. A sandboxed Lua script host lets callers orchestrate several
//! draws into one structured result.

pub mod core;
pub mod schema;
