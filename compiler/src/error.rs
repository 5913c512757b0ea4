// error.rs — Build failure taxonomy
//
// A single structured error type carried through every phase: kind tag,
// offending source position, the phase in which the failure surfaced, and an
// optional chained underlying cause. All kinds are fatal to the whole build;
// there is no partial model output.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use thiserror::Error;

use crate::decl::SourceRef;
use crate::phase::Phase;

// ── Error kinds ─────────────────────────────────────────────────────────────

/// Fatal failure categories (replaces catch-by-subtype dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or semantically invalid raw argument for a keyword.
    Source,
    /// Unresolved import/include or unknown module revision at
    /// SourceLinkage fixpoint.
    Linkage,
    /// Unresolved uses/augment/type/identity/refine target at its
    /// deadline phase.
    Reference,
    /// Narrowing violation, duplicate definition, cyclic reference,
    /// conflicting deviation dispositions.
    ConstraintViolation,
    /// Inference actions still blocked when a phase fixpoint was declared
    /// final.
    PhaseDeadline,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Source => "source error",
            Self::Linkage => "linkage error",
            Self::Reference => "reference error",
            Self::ConstraintViolation => "constraint violation",
            Self::PhaseDeadline => "phase deadline error",
        };
        write!(f, "{s}")
    }
}

// ── Build error ─────────────────────────────────────────────────────────────

/// A fatal build failure. The outermost error identifies the scheduling
/// context (phase); `cause` preserves the original failure for diagnosis.
#[derive(Debug, Clone, Error)]
#[error("{}", headline(.kind, .phase, .source_ref, .message))]
pub struct BuildError {
    pub kind: ErrorKind,
    pub phase: Option<Phase>,
    pub source_ref: Option<SourceRef>,
    pub message: String,
    #[source]
    pub cause: Option<Box<BuildError>>,
}

fn headline(
    kind: &ErrorKind,
    phase: &Option<Phase>,
    source_ref: &Option<SourceRef>,
    message: &str,
) -> String {
    let mut out = format!("{kind}: {message}");
    if let Some(src) = source_ref {
        out.push_str(&format!(" [at {src}]"));
    }
    if let Some(phase) = phase {
        out.push_str(&format!(" [during {}]", phase.name()));
    }
    out
}

impl BuildError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            phase: None,
            source_ref: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn source(message: impl Into<String>, at: SourceRef) -> Self {
        Self::new(ErrorKind::Source, message).at(at)
    }

    pub fn linkage(message: impl Into<String>, at: SourceRef) -> Self {
        Self::new(ErrorKind::Linkage, message).at(at)
    }

    pub fn reference(message: impl Into<String>, at: SourceRef) -> Self {
        Self::new(ErrorKind::Reference, message).at(at)
    }

    pub fn constraint(message: impl Into<String>, at: SourceRef) -> Self {
        Self::new(ErrorKind::ConstraintViolation, message).at(at)
    }

    pub fn at(mut self, source_ref: SourceRef) -> Self {
        self.source_ref = Some(source_ref);
        self
    }

    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Wrap an underlying failure with reactor scheduling context. The outer
    /// error keeps the cause's kind so callers can still match on it.
    pub fn in_reactor(phase: Phase, cause: BuildError) -> Self {
        Self {
            kind: cause.kind,
            phase: Some(phase),
            source_ref: cause.source_ref.clone(),
            message: format!("failed to process statements in {} phase", phase.name()),
            cause: Some(Box::new(cause)),
        }
    }

    /// The immediate underlying cause, if any.
    pub fn cause(&self) -> Option<&BuildError> {
        self.cause.as_deref()
    }

    /// The innermost error in the cause chain (the original failure).
    pub fn root_cause(&self) -> &BuildError {
        let mut cur = self;
        while let Some(next) = cur.cause() {
            cur = next;
        }
        cur
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headline_includes_position_and_phase() {
        let e = BuildError::linkage("no module 'foo'", SourceRef::new("bar", 3))
            .in_phase(Phase::SourceLinkage);
        let text = format!("{e}");
        assert!(text.contains("linkage error"));
        assert!(text.contains("bar:3"));
        assert!(text.contains("SourceLinkage"));
    }

    #[test]
    fn reactor_wrap_preserves_cause() {
        let inner = BuildError::source("bad literal", SourceRef::new("m", 9));
        let outer = BuildError::in_reactor(Phase::FullDeclaration, inner);
        assert_eq!(outer.kind, ErrorKind::Source);
        assert_eq!(outer.cause().unwrap().message, "bad literal");
        assert_eq!(outer.root_cause().message, "bad literal");
    }

    #[test]
    fn std_error_source_chain() {
        use std::error::Error as _;
        let inner = BuildError::new(ErrorKind::ConstraintViolation, "duplicate");
        let outer = BuildError::in_reactor(Phase::StatementDefinition, inner);
        assert!(outer.source().is_some());
    }
}
