// phase.rs — Model processing phases
//
// The totally ordered phase sequence the reactor drives. A context advances
// to phase P+1 only once the scheduler declares global fixpoint for P.

use serde::Serialize;

/// Build phases in execution order. Initial: SourceLinkage.
/// Terminal: EffectiveModel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    SourceLinkage,
    StatementDefinition,
    FullDeclaration,
    EffectiveModel,
}

/// All phases in execution order (used for iteration).
pub const ALL_PHASES: [Phase; 4] = [
    Phase::SourceLinkage,
    Phase::StatementDefinition,
    Phase::FullDeclaration,
    Phase::EffectiveModel,
];

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::SourceLinkage => "SourceLinkage",
            Phase::StatementDefinition => "StatementDefinition",
            Phase::FullDeclaration => "FullDeclaration",
            Phase::EffectiveModel => "EffectiveModel",
        }
    }

    /// The phase following this one, or None for the terminal phase.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::SourceLinkage => Some(Phase::StatementDefinition),
            Phase::StatementDefinition => Some(Phase::FullDeclaration),
            Phase::FullDeclaration => Some(Phase::EffectiveModel),
            Phase::EffectiveModel => None,
        }
    }
}
