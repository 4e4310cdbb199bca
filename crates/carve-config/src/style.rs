use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How strongly a host surfaces a style preference.
///
/// Extraction ignores the severity; it is carried so hosts can report it alongside the value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Silent,
    Suggestion,
    Warning,
    Error,
}

/// A style preference value together with its enforcement severity.
///
/// ```toml
/// [style.local_function_body]
/// value = "when_on_single_line"
/// severity = "suggestion"
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields, bound = "T: JsonSchema + Default")]
pub struct StyleOption<T> {
    #[serde(default)]
    pub value: T,
    #[serde(default)]
    pub severity: Severity,
}

impl<T> StyleOption<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            severity: Severity::Silent,
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Whether extracted local functions are declared `static` when they touch no enclosing state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StaticPreference {
    Always,
    Never,
    /// Behaves like `always`.
    #[default]
    Default,
}

impl StaticPreference {
    /// Whether a function that may be `static` should be.
    ///
    /// A function that needs enclosing state is never `static`, whatever the preference says.
    #[must_use]
    pub fn prefers_static(self) -> bool {
        !matches!(self, Self::Never)
    }
}

/// Body form of the extracted local function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BodyForm {
    #[default]
    Block,
    WhenPossible,
    WhenOnSingleLine,
}

impl BodyForm {
    /// Whether a body that reduces to one returned expression is written with `=>`.
    #[must_use]
    pub fn allows_expression_body(self, on_single_line: bool) -> bool {
        match self {
            Self::Block => false,
            Self::WhenPossible => true,
            Self::WhenOnSingleLine => on_single_line,
        }
    }
}

/// Use of `var` for declarations synthesized at the call site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImplicitTyping {
    #[default]
    Never,
    ForBuiltInTypes,
    WhenTypeIsApparent,
    Always,
}

impl ImplicitTyping {
    /// Whether a declaration of a value of the given shape is written with `var`.
    ///
    /// `built_in` is true for predefined keyword types; `apparent` is true when the initializer
    /// names the type itself (for example an object creation or a cast).
    #[must_use]
    pub fn use_var(self, built_in: bool, apparent: bool) -> bool {
        match self {
            Self::Never => false,
            Self::ForBuiltInTypes => built_in,
            Self::WhenTypeIsApparent => apparent,
            Self::Always => true,
        }
    }
}

/// Code style preferences consulted while synthesizing an extracted function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct StyleOptions {
    /// Declare the extracted function `static` when it does not use enclosing state.
    #[serde(default)]
    pub prefer_static_local_function: StyleOption<StaticPreference>,

    /// Write the extracted function with an expression body when it reduces to one expression.
    #[serde(default)]
    pub local_function_body: StyleOption<BodyForm>,

    /// Write declarations introduced at the call site with `var`.
    #[serde(default)]
    pub implicit_typing: StyleOption<ImplicitTyping>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requiring_state_is_independent_of_the_default_preference() {
        assert!(StaticPreference::Default.prefers_static());
        assert!(StaticPreference::Always.prefers_static());
        assert!(!StaticPreference::Never.prefers_static());
    }

    #[test]
    fn body_form_gates_on_line_count() {
        assert!(!BodyForm::Block.allows_expression_body(true));
        assert!(BodyForm::WhenPossible.allows_expression_body(false));
        assert!(BodyForm::WhenOnSingleLine.allows_expression_body(true));
        assert!(!BodyForm::WhenOnSingleLine.allows_expression_body(false));
    }

    #[test]
    fn implicit_typing_modes() {
        assert!(!ImplicitTyping::Never.use_var(true, true));
        assert!(ImplicitTyping::ForBuiltInTypes.use_var(true, false));
        assert!(!ImplicitTyping::ForBuiltInTypes.use_var(false, true));
        assert!(ImplicitTyping::WhenTypeIsApparent.use_var(false, true));
        assert!(ImplicitTyping::Always.use_var(false, false));
    }
}
