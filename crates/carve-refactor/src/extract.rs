//! Extract local function.
//!
//! The pipeline runs top to bottom: the selection is validated, flow facts
//! are computed for it, variables are classified, a signature is synthesized
//! and the body and call site are rewritten. When the selection is an
//! argument of a call, the rewritten text is re-resolved and repaired until
//! every enclosing call binds as before.

use carve_config::StyleOptions;
use carve_core::{FileId, TextEdit, TextRange, WorkspaceEdit};
use carve_flow::{analyze_region, RegionFacts};
use carve_sema::SemanticModel;
use carve_syntax::{parse, ExprKind, PatternKind};
use carve_types::Ty;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::disambiguate::{cast_edits, converted_return_type, drifted, watched_calls};
use crate::names::{allocate_name, function_names_in_scope, suggest_base_name};
use crate::narrowing::Narrower;
use crate::rewrite::{CallSiteEdit, Rewriter};
use crate::selection::{check_control_flow, validate, SelectionKind, ValidatedSelection};
use crate::signature::{
    body_shape, capture_mode, enclosing_state_usage, wants_readonly, BodyShape, CandidateSignature, Parameter,
};
use crate::variables::{analyze_variables, VariableFlow};

/// Why a selection cannot be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum ExtractIssue {
    #[error("the selection is not a statement run or a value expression")]
    InvalidSelection,
    #[error("the selection is empty")]
    EmptySelection,
    #[error("the file has syntax errors")]
    ParseErrors,
    #[error("the selection is not inside a function body")]
    NotInFunction,
    #[error("no enclosing block-bodied function can hold a local function")]
    NoHostBlock,
    #[error("the selection only declares local functions")]
    DeclarationOnly,
    #[error("a local function declared in the selection is used after it")]
    DeclarationUsedOutside,
    #[error("the selection jumps to a target outside of it")]
    JumpOutOfSelection,
    #[error("a label in the selection is the target of a jump outside of it")]
    JumpIntoSelection,
    #[error("the selection returns on some paths but not all")]
    ReturnWithReachableEnd,
    #[error("the selection is assigned to")]
    AssignmentTarget,
    #[error("the selection is a method group")]
    MethodGroup,
    #[error("the selection is passed by reference")]
    RefArgument,
    #[error("the type of the selection is unknown")]
    UnknownType,
    #[error("a declaration in the selection cannot move to the call site")]
    UnsupportedHoist,
    #[error("the rewritten text has overlapping edits")]
    OverlappingEdits,
    #[error("an enclosing call binds differently after extraction")]
    ResolutionDrift,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    pub style: StyleOptions,
    /// Replaces the suggested name; uniqueness suffixes still apply.
    #[serde(default)]
    pub base_name: Option<String>,
}

impl ExtractOptions {
    pub fn from_style(style: StyleOptions) -> Self {
        Self {
            style,
            base_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractLocalFunctionAnalysis {
    /// `None` when the selection did not validate.
    pub kind: Option<SelectionKind>,
    pub variables: VariableFlow,
    pub signature: Option<CandidateSignature>,
    pub issues: Vec<ExtractIssue>,
}

impl ExtractLocalFunctionAnalysis {
    pub fn is_extractable(&self) -> bool {
        self.issues.is_empty()
    }

    fn rejected(issue: ExtractIssue) -> Self {
        Self {
            kind: None,
            variables: VariableFlow::default(),
            signature: None,
            issues: vec![issue],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFunctionEdit {
    pub signature: CandidateSignature,
    /// The declaration as inserted, without the blank line separating it from the statement before.
    pub function_text: String,
    pub call_site: CallSiteEdit,
    /// Casts added to other arguments of an enclosing call to keep its binding.
    pub disambiguation: Vec<TextEdit>,
    /// Every edit, normalized.
    pub edit: WorkspaceEdit,
    /// The new function's name at the call site, in the edited text.
    pub rename_range: TextRange,
    /// Pattern designations in the new body that clash with the declarations added at the call site, in the edited text.
    pub conflict_ranges: Vec<TextRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractLocalFunction {
    pub file: FileId,
    pub selection: TextRange,
    pub options: ExtractOptions,
}

struct Prepared {
    selection: ValidatedSelection,
    facts: RegionFacts,
    variables: VariableFlow,
    signature: CandidateSignature,
}

struct Built {
    function_text: String,
    call_site: CallSiteEdit,
    name_offset: usize,
    edit: WorkspaceEdit,
    kept_patterns: Vec<TextRange>,
}

impl ExtractLocalFunction {
    pub fn new(file: FileId, selection: TextRange) -> Self {
        Self {
            file,
            selection,
            options: ExtractOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub fn analyze(&self, source: &str) -> ExtractLocalFunctionAnalysis {
        let file = parse(source);
        let model = SemanticModel::new(&file);
        let mut prepared = match self.prepare(&model, &|| false) {
            Ok(prepared) => prepared,
            Err(issue) => return ExtractLocalFunctionAnalysis::rejected(issue),
        };
        let issues = match self.build(&model, &mut prepared, &[]) {
            Ok(_) => Vec::new(),
            Err(issue) => vec![issue],
        };
        ExtractLocalFunctionAnalysis {
            kind: Some(prepared.selection.kind),
            variables: prepared.variables,
            signature: Some(prepared.signature),
            issues,
        }
    }

    pub fn apply(&self, source: &str) -> Option<LocalFunctionEdit> {
        self.apply_with_cancellation(source, &|| false)
    }

    /// Like [`ExtractLocalFunction::apply`], polling `cancelled` between stages.
    pub fn apply_with_cancellation(&self, source: &str, cancelled: &dyn Fn() -> bool) -> Option<LocalFunctionEdit> {
        match self.try_apply(source, cancelled) {
            Ok(edit) => Some(edit),
            Err(issue) => {
                tracing::debug!(target: "carve.refactor", %issue, "extract local function not applicable");
                None
            }
        }
    }

    fn try_apply(&self, source: &str, cancelled: &dyn Fn() -> bool) -> Result<LocalFunctionEdit, ExtractIssue> {
        let file = parse(source);
        let model = SemanticModel::new(&file);
        let mut prepared = self.prepare(&model, cancelled)?;

        let watched = watched_calls(&model, &prepared.selection);
        let mut casts: Vec<TextEdit> = Vec::new();
        let mut built = self.build(&model, &mut prepared, &casts)?;
        if !drifted(&watched, &built.edit, &self.file, source).is_empty() {
            check(cancelled)?;
            if let Some(converted) = converted_return_type(&model, &prepared.selection) {
                tracing::debug!(target: "carve.refactor", ty = %converted, "retyping to the converted type");
                prepared.signature.return_type = converted;
                built = self.build(&model, &mut prepared, &casts)?;
            }
            let drift = drifted(&watched, &built.edit, &self.file, source);
            if !drift.is_empty() {
                casts = drift
                    .into_iter()
                    .flat_map(|call| cast_edits(&model, &prepared.selection, call, &self.file))
                    .collect();
                built = self.build(&model, &mut prepared, &casts)?;
                if !drifted(&watched, &built.edit, &self.file, source).is_empty() {
                    return Err(ExtractIssue::ResolutionDrift);
                }
            }
        }
        check(cancelled)?;

        let call_start = built.call_site.range.start;
        let inserted_before: usize = built
            .edit
            .edits
            .iter()
            .filter(|edit| edit.range.is_empty() && edit.range.start == call_start)
            .map(|edit| edit.replacement.len())
            .sum();
        let name_start = built.edit.map_offset(&self.file, call_start) + inserted_before + built.name_offset;
        let rename_range = TextRange::new(name_start, name_start + prepared.signature.name.as_str().len());
        let conflict_ranges = self.conflict_ranges(source, &built)?;

        Ok(LocalFunctionEdit {
            signature: prepared.signature,
            function_text: built.function_text,
            call_site: built.call_site,
            disambiguation: casts,
            edit: built.edit,
            rename_range,
            conflict_ranges,
        })
    }

    fn prepare(&self, model: &SemanticModel<'_>, cancelled: &dyn Fn() -> bool) -> Result<Prepared, ExtractIssue> {
        let selection = validate(model, self.selection)?;
        tracing::debug!(
            target: "carve.refactor",
            kind = ?selection.kind,
            start = selection.range.start,
            end = selection.range.end,
            "validated selection"
        );
        check(cancelled)?;

        let facts = analyze_region(model, &selection.region).ok_or(ExtractIssue::NotInFunction)?;
        check_control_flow(&facts)?;
        let variables = analyze_variables(model, &selection, &facts);
        check(cancelled)?;

        let style = &self.options.style;
        let usage = enclosing_state_usage(model, &selection);
        let capture = capture_mode(style.prefer_static_local_function.value, usage);
        let is_readonly = wants_readonly(model, &selection, usage, capture);

        let narrower = Narrower::new(model, selection.range.start);
        let params: Vec<Parameter> = variables
            .parameters(model)
            .into_iter()
            .map(|(fact, direction)| Parameter {
                local: fact.local,
                name: fact.name.clone(),
                ty: narrower.parameter_type(fact, direction),
                direction,
            })
            .collect();
        let return_type = if !facts.returns.is_empty() {
            model.return_type_of(selection.function)
        } else if let Some(returned) = variables.returned() {
            narrower.returned_variable_type(returned.local, returned.flow.exit_state)
        } else if let Some(expr) = selection.expr() {
            narrower.expression_type(expr, &facts)
        } else {
            Ty::Void
        };

        let base = match &self.options.base_name {
            Some(base) => base.clone(),
            None => suggest_base_name(model, &selection),
        };
        let name = allocate_name(&base, &function_names_in_scope(model, &selection));
        tracing::debug!(
            target: "carve.refactor",
            %name,
            params = params.len(),
            ret = %return_type,
            ?capture,
            "synthesized signature"
        );

        Ok(Prepared {
            signature: CandidateSignature {
                name: carve_core::Name::new(&name),
                params,
                return_type,
                capture,
                is_readonly,
                body: BodyShape::Block,
            },
            selection,
            facts,
            variables,
        })
    }

    /// Rewrites the body and call site for the current signature, with `extra` edits folded in.
    fn build(
        &self,
        model: &SemanticModel<'_>,
        prepared: &mut Prepared,
        extra: &[TextEdit],
    ) -> Result<Built, ExtractIssue> {
        let style = &self.options.style;
        let rewriter = Rewriter::new(model, &prepared.selection, &prepared.variables, self.file.clone());
        let (hoist_edits, kept_patterns) = rewriter.hoist_edits()?;
        let body = rewriter.body(&hoist_edits)?;
        prepared.signature.body = body_shape(style.local_function_body.value, body.single_expression.as_deref());

        let (offset, function_text) = rewriter.function_text(&prepared.signature, &body)?;
        let call = rewriter.call_site(&prepared.signature, &prepared.facts, style)?;

        let mut edits = vec![
            TextEdit::replace(self.file.clone(), call.edit.range, call.edit.text.clone()),
            TextEdit::insert(self.file.clone(), offset, format!("\n\n{function_text}")),
        ];
        edits.extend(call.declarations);
        edits.extend(extra.iter().cloned());
        let mut edit = WorkspaceEdit::new(edits);
        edit.normalize().map_err(|_| ExtractIssue::OverlappingEdits)?;

        Ok(Built {
            function_text,
            call_site: call.edit,
            name_offset: call.name_offset,
            edit,
            kept_patterns,
        })
    }

    /// Kept pattern designations, located again in the edited text.
    fn conflict_ranges(&self, source: &str, built: &Built) -> Result<Vec<TextRange>, ExtractIssue> {
        if built.kept_patterns.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<&str> = built.kept_patterns.iter().map(|range| range.slice(source)).collect();
        let text = built
            .edit
            .apply_to(&self.file, source)
            .map_err(|_| ExtractIssue::OverlappingEdits)?;
        let Some(start) = text.find(&built.function_text) else {
            return Ok(Vec::new());
        };
        let function = TextRange::new(start, start + built.function_text.len());

        let file = parse(&text);
        let mut ranges: Vec<TextRange> = file
            .expr_ids()
            .filter_map(|expr| match &file.expr(expr).kind {
                ExprKind::Is { pattern, .. } => match &pattern.kind {
                    PatternKind::Declaration { name, name_range, .. }
                        if function.contains_range(*name_range) && names.contains(&name.as_str()) =>
                    {
                        Some(*name_range)
                    }
                    _ => None,
                },
                _ => None,
            })
            .collect();
        ranges.sort_by_key(|range| range.start);
        Ok(ranges)
    }
}

fn check(cancelled: &dyn Fn() -> bool) -> Result<(), ExtractIssue> {
    if cancelled() {
        Err(ExtractIssue::Cancelled)
    } else {
        Ok(())
    }
}
