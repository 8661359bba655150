//! The `dynsym_core` crate evaluates and linearizes rational-expectations models.
//!
//! Key components:
//! - **Registry**: constants, value series, processes, discovered variables and steady states.
//! - **Autodiff**: sparse forward-mode `Dual` numbers keyed by `(name, shift)`.
//! - **Evaluator**: tree walker parameterized by an explicit `Context` (steady, dated, bare).
//! - **Linearize**: classification, steady pass, seeding and assembly of the `A`, `B`, `C`, `D`
//!   coefficient matrices.
//! - **Parser**: a small text front-end producing the AST.
pub mod ast;
pub mod autodiff;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod linearize;
pub mod number;
pub mod parser;
pub mod registry;

pub use error::{Diagnostic, ModelError, Result, Span};
pub use evaluator::{Context, Evaluator, LookupPolicy, Outcome};
pub use linearize::{read_model, EvaluationState, LinearModel, LinearizeSettings, Linearizer};
