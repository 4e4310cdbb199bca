//! Semantic analysis: declared items, scopes and name resolution, expression
//! typing with overload resolution, and the [`SemanticModel`] facade that
//! ties them together for one file.

pub mod items;
mod library;
pub mod model;
pub mod scopes;
pub mod typer;

pub use items::{ItemOrigin, ItemTree, MethodItem, TypeId, TypeItem};
pub use model::SemanticModel;
pub use scopes::{FunctionData, FunctionId, FunctionKind, LocalData, LocalId, LocalKind, Resolution, Scopes};
pub use typer::{BindError, BindErrorKind, CallBinding, CallTarget, Constant, ExprInfo, MemberRef, MethodKey, TypeTables};
