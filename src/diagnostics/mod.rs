//! Allocator diagnostics.
//!
//! Coded, rustc-like messages for failed requests and caller mistakes,
//! plus a strict mode that turns them into panics.
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                          |
//! |-------|----------------------------------|
//! | GA1xx | Device / resource exhaustion     |
//! | GA2xx | Invalid handles, double frees    |
//! | GA3xx | Teardown with live allocations   |
//! | GA9xx | Internal errors                  |

pub mod emit;
pub mod kind;
pub mod strict;

pub use emit::{emit, emit_with_context, suppress_diagnostics};
pub use kind::{Diagnostic, DiagnosticKind};
pub use kind::{GA101, GA102, GA103, GA201, GA301, GA302, GA901};
pub use strict::{init_from_env, set_strict_mode, strict_mode, StrictMode, StrictModeGuard};
