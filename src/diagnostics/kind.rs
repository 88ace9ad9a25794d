//! Diagnostic kinds and predefined codes.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - the caller or the allocator did something wrong.
    Error,
    /// A warning - a request failed but the allocator is still consistent.
    Warning,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `GA1xx` - Device / resource exhaustion
/// - `GA2xx` - Caller misuse of handles
/// - `GA3xx` - Teardown issues
/// - `GA9xx` - Internal errors
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "GA201").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (GA1xx - Device exhaustion)
// =============================================================================

/// GA101: The device refused to create a heap.
pub const GA101: Diagnostic = Diagnostic::warning(
    "GA101",
    "device heap creation failed"
).with_note("no page could be created for this request, nothing was committed")
 .with_help("free unused resources and retry, or lower the default page size");

/// GA102: The device refused to place a resource in a heap.
pub const GA102: Diagnostic = Diagnostic::warning(
    "GA102",
    "device resource creation failed"
).with_note("the page free list was left untouched");

/// GA103: Page limit reached.
pub const GA103: Diagnostic = Diagnostic::warning(
    "GA103",
    "memory class reached its page limit"
).with_note("every page is too full for this request and no new page may be created")
 .with_help("increase max_pages_per_class in AllocatorConfig, or free resources");

// =============================================================================
// Predefined diagnostics (GA2xx - Handles)
// =============================================================================

/// GA201: Deallocation of a handle the allocator does not know.
pub const GA201: Diagnostic = Diagnostic::error(
    "GA201",
    "deallocated a resource that is not live in this allocator"
).with_note("the resource was already freed, or was allocated by another allocator")
 .with_help("make sure every resource is passed to deallocate exactly once");

// =============================================================================
// Predefined diagnostics (GA3xx - Teardown)
// =============================================================================

/// GA301: Teardown with live allocations.
pub const GA301: Diagnostic = Diagnostic::error(
    "GA301",
    "allocator destroyed with unbalanced allocations"
).with_note("allocation and deallocation counts differ, or pages still hold allocations")
 .with_help("deallocate every buffer and texture before destroying the allocator");

/// GA302: Allocator dropped without destroy while allocations are live.
pub const GA302: Diagnostic = Diagnostic::warning(
    "GA302",
    "allocator dropped with live allocations"
).with_note("the heaps were released while resources still point into them")
 .with_help("call destroy() to get a leak report as an error");

// =============================================================================
// Predefined diagnostics (GA9xx - Internal)
// =============================================================================

/// GA901: Internal allocator error.
pub const GA901: Diagnostic = Diagnostic::error(
    "GA901",
    "internal allocator error"
).with_note("an allocation entry points at a page that no longer exists")
 .with_help("this indicates a bug in the allocator");
