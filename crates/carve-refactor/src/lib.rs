//! Extract local function for the carve subject language.
//!
//! [`ExtractLocalFunction`] moves a selected run of statements, or a single
//! expression, into a new local function declared at the end of the
//! enclosing block-bodied function, and replaces the selection with a call.
//!
//! The pipeline is split along its stages:
//! - `selection`: normalising and validating the selected range
//! - `variables`: classifying every variable the selection touches
//! - `narrowing`: flow-sensitive nullability of parameter and return types
//! - `signature`: modifiers, parameters, return type and body form
//! - `rewrite`: the new body and the call site
//! - `disambiguate`: keeping enclosing calls bound to the same overload
//! - `names`: picking a free function name

mod disambiguate;
mod extract;
mod names;
mod narrowing;
pub mod preview;
mod rewrite;
mod selection;
mod signature;
mod variables;

pub use carve_core::{FileId, TextEdit, TextRange, WorkspaceEdit};
pub use extract::{
    ExtractIssue, ExtractLocalFunction, ExtractLocalFunctionAnalysis, ExtractOptions, LocalFunctionEdit,
};
pub use names::{allocate_name, suggest_base_name, DEFAULT_BASE_NAME};
pub use preview::{generate_preview, FilePreview, RefactoringPreview};
pub use rewrite::CallSiteEdit;
pub use selection::{validate, SelectionKind, ValidatedSelection};
pub use signature::{BodyShape, CandidateSignature, CaptureMode, Parameter};
pub use variables::{analyze_variables, Direction, VariableFlow, VariableFlowFact, VariableRole};
