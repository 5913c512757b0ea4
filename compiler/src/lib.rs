// smc — Schema model compiler
//
// Library root. Build phases and resolution machinery live here.

pub mod augment;
pub mod context;
pub mod decl;
pub mod deviation;
pub mod effective;
pub mod error;
pub mod grouping;
pub mod linkage;
pub mod namespace;
pub mod phase;
pub mod pipeline;
pub mod reactor;
pub mod registry;
pub mod typeres;
