//! Rule declaration, validation and compilation.
//!
//! Rules are declared against a catalog with `RuleBookBuilder`, then
//! compiled into an immutable `RuleBook`. Compilation rejects every
//! malformed declaration up front so transaction evaluation never has
//! to revalidate.

pub mod book;
pub mod decl;
pub mod errors;
pub mod expr;
pub mod fallback;

pub use book::{AiValueRule, CandidatePath, Constraint, Derivation, Guard, PathStep, Rule, RuleBook};
pub use decl::{AiValueDecl, ConstraintDecl, DerivationDecl, RuleBookBuilder, RuleDecl};
pub use errors::{RegistrationError, RegistrationResult};
pub use expr::{ArithOp, CmpOp, EvalError, EvalResult, Expr, ReadRef, RowView};
pub use fallback::{FallbackPolicy, ParseFallbackError};
