//! Body and call-site rewriting.
//!
//! The body is the selected text with hoisted declarations turned into
//! assignments; the call site replaces the selection with an invocation,
//! preceded by declarations for the variables that now live outside the
//! body. All edits are computed against the original text.

use carve_config::StyleOptions;
use carve_core::{apply_text_edits, indentation_at, line_start_offset, reindent, FileId, TextEdit, TextRange};
use carve_flow::{Region, RegionFacts};
use carve_sema::{LocalId, LocalKind, SemanticModel};
use carve_syntax::{Designation, ExprId, ExprKind, NodeId, StmtId, StmtKind};
use serde::{Deserialize, Serialize};

use crate::selection::ValidatedSelection;
use crate::signature::{BodyShape, CandidateSignature};
use crate::variables::{Direction, VariableFlow, VariableRole};
use crate::ExtractIssue;

const INDENT_UNIT: &str = "    ";

/// Replacement of the selected text by the call of the new function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteEdit {
    /// Range in the original text.
    pub range: TextRange,
    pub text: String,
}

/// The statements of the new function, before they are wrapped in a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtractedBody {
    /// Indented like the selection, except for the first line which carries no indentation.
    pub text: String,
    /// The expression the body returns, when returning it is all the body does.
    pub single_expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallSite {
    pub edit: CallSiteEdit,
    /// Offset of the function name within `edit.text`.
    pub name_offset: usize,
    /// Declarations placed ahead of the statement containing an expression selection.
    pub declarations: Option<TextEdit>,
}

pub(crate) struct Rewriter<'m, 'a> {
    model: &'m SemanticModel<'a>,
    selection: &'m ValidatedSelection,
    variables: &'m VariableFlow,
    file: FileId,
}

impl<'m, 'a> Rewriter<'m, 'a> {
    pub(crate) fn new(
        model: &'m SemanticModel<'a>,
        selection: &'m ValidatedSelection,
        variables: &'m VariableFlow,
        file: FileId,
    ) -> Self {
        Rewriter {
            model,
            selection,
            variables,
            file,
        }
    }

    fn text(&self) -> &'a str {
        &self.model.file().text
    }

    /// Edits inside the selection for declarations that move to the call site,
    /// and the ranges of pattern designations that have to stay where they are.
    pub(crate) fn hoist_edits(&self) -> Result<(Vec<TextEdit>, Vec<TextRange>), ExtractIssue> {
        let scopes = self.model.scopes();
        let hoisted: Vec<TextRange> = self
            .variables
            .hoisted()
            .map(|fact| scopes.local(fact.local).name_range)
            .collect();
        let mut edits = Vec::new();
        let mut kept_patterns = Vec::new();
        let mut seen: Vec<NodeId> = Vec::new();
        for fact in self.variables.hoisted() {
            let data = scopes.local(fact.local);
            let Some(decl) = data.decl else {
                return Err(ExtractIssue::UnsupportedHoist);
            };
            if seen.contains(&decl) {
                continue;
            }
            seen.push(decl);
            match (data.kind, decl) {
                (LocalKind::Local, NodeId::Stmt(stmt)) => edits.extend(self.split_declaration(stmt, &hoisted)?),
                (LocalKind::OutVar | LocalKind::Deconstruction, NodeId::Expr(expr)) => {
                    edits.extend(self.strip_declaration(expr, &hoisted));
                }
                (LocalKind::PatternVar, _) => kept_patterns.push(data.name_range),
                _ => return Err(ExtractIssue::UnsupportedHoist),
            }
        }
        Ok((edits, kept_patterns))
    }

    /// `T a = 1, b = 2;` with `a` hoisted becomes `a = 1;` and `T b = 2;` on its own line.
    /// Hoisted declarators without an initializer disappear.
    fn split_declaration(&self, stmt: StmtId, hoisted: &[TextRange]) -> Result<Vec<TextEdit>, ExtractIssue> {
        let file = self.model.file();
        let data = file.stmt(stmt);
        let StmtKind::LocalDecl {
            is_const: false,
            ty,
            declarators,
        } = &data.kind
        else {
            return Err(ExtractIssue::UnsupportedHoist);
        };
        let text = self.text();
        let range = data.range;
        if !range.slice(text).ends_with(';') {
            return Err(ExtractIssue::UnsupportedHoist);
        }
        let ty_text = file.text_of(ty.range);
        let indent = indentation_at(text, range.start);
        let prefix = |name_range: TextRange| {
            if hoisted.contains(&name_range) {
                String::new()
            } else {
                format!("{ty_text} ")
            }
        };

        let kept: Vec<_> = declarators
            .iter()
            .filter(|d| d.init.is_some() || !hoisted.contains(&d.name_range))
            .collect();
        let Some(first) = kept.first() else {
            return Ok(vec![self.delete_statement(range)]);
        };

        let mut edits = vec![TextEdit::replace(
            self.file.clone(),
            TextRange::new(range.start, first.range.start),
            prefix(first.name_range),
        )];
        for pair in kept.windows(2) {
            edits.push(TextEdit::replace(
                self.file.clone(),
                TextRange::new(pair[0].range.end, pair[1].range.start),
                format!(";\n{indent}{}", prefix(pair[1].name_range)),
            ));
        }
        if let Some(last) = kept.last() {
            let tail = TextRange::new(last.range.end, range.end - 1);
            if !tail.is_empty() {
                edits.push(TextEdit::delete(self.file.clone(), tail));
            }
        }
        edits.retain(|edit| edit.range.slice(text) != edit.replacement);
        Ok(edits)
    }

    /// Removes a statement together with the whitespace separating it from its neighbour.
    fn delete_statement(&self, range: TextRange) -> TextEdit {
        let text = self.text();
        let selection = self.selection.range;
        let after = range.end + (text[range.end..].len() - text[range.end..].trim_start().len());
        let range = if after < selection.end {
            TextRange::new(range.start, after)
        } else {
            TextRange::new(text[..range.start].trim_end().len().max(selection.start), range.end)
        };
        TextEdit::delete(self.file.clone(), range)
    }

    /// `out int x` becomes `out x`; `var (x, y)` becomes `(x, y)`.
    fn strip_declaration(&self, expr: ExprId, hoisted: &[TextRange]) -> Vec<TextEdit> {
        let file = self.model.file();
        let data = file.expr(expr);
        let ExprKind::Declaration { ty, designation } = &data.kind else {
            return Vec::new();
        };
        match designation {
            Designation::Single { range, .. } if hoisted.contains(range) => {
                let gap = TextRange::new(ty.range.end, range.start);
                let removed = if file.comments_in(gap).next().is_none() {
                    TextRange::new(ty.range.start, range.start)
                } else {
                    ty.range
                };
                vec![TextEdit::delete(self.file.clone(), removed)]
            }
            Designation::Parenthesized { .. }
                if designation.names().iter().any(|(_, range)| hoisted.contains(range)) =>
            {
                vec![TextEdit::replace(
                    self.file.clone(),
                    data.range,
                    render_designation(designation, hoisted),
                )]
            }
            _ => Vec::new(),
        }
    }

    /// `range` of the original text with the `edits` that fall inside it applied.
    fn edited_text(&self, range: TextRange, edits: &[TextEdit]) -> Result<String, ExtractIssue> {
        let shifted: Vec<TextEdit> = edits
            .iter()
            .filter(|edit| range.contains_range(edit.range))
            .map(|edit| {
                TextEdit::replace(
                    edit.file.clone(),
                    TextRange::new(edit.range.start - range.start, edit.range.end - range.start),
                    edit.replacement.clone(),
                )
            })
            .collect();
        apply_text_edits(range.slice(self.text()), &shifted).map_err(|_| ExtractIssue::OverlappingEdits)
    }

    pub(crate) fn body(&self, hoist_edits: &[TextEdit]) -> Result<ExtractedBody, ExtractIssue> {
        let file = self.model.file();
        let text = self.text();
        let old_indent = indentation_at(text, self.selection.range.start);

        let mut prelude = String::new();
        for fact in self.variables.redeclared() {
            prelude.push_str(&format!("{} {};\n{old_indent}", self.declared_type(fact.local), fact.name));
        }
        let returning = |expr: ExprId| -> Result<ExtractedBody, ExtractIssue> {
            let value = self.edited_text(file.expr(expr).range, hoist_edits)?;
            Ok(ExtractedBody {
                text: format!("{prelude}return {value};"),
                single_expression: prelude.is_empty().then_some(value),
            })
        };

        let stmts = match &self.selection.region {
            Region::Expr(expr) => return returning(*expr),
            Region::Stmts(stmts) => stmts,
        };
        if let Some(init) = self.receiving_initializer() {
            return returning(init);
        }

        let mut body = self.edited_text(self.selection.range, hoist_edits)?;
        if let Some(returned) = self.variables.returned() {
            let selected = self.selection.range.slice(text);
            body.push('\n');
            if selected.lines().any(|line| line.trim().is_empty()) {
                body.push('\n');
            }
            body.push_str(&format!("{old_indent}return {};", returned.name));
        }

        let single_expression = match stmts.as_slice() {
            [only] if prelude.is_empty() => match file.stmt(*only).kind {
                StmtKind::Return(Some(expr)) => Some(self.edited_text(file.expr(expr).range, hoist_edits)?),
                _ => None,
            },
            _ => None,
        };
        Ok(ExtractedBody {
            text: format!("{prelude}{body}"),
            single_expression,
        })
    }

    /// The initializer of a selection that is exactly the declaration of the returned variable.
    fn receiving_initializer(&self) -> Option<ExprId> {
        let returned = self.variables.returned()?;
        let [stmt] = self.selection.stmts() else {
            return None;
        };
        match &self.model.file().stmt(*stmt).kind {
            StmtKind::LocalDecl {
                is_const: false,
                declarators,
                ..
            } => match declarators.as_slice() {
                [only] if only.name_range == self.model.scopes().local(returned.local).name_range => only.init,
                _ => None,
            },
            _ => None,
        }
    }

    /// Where the function goes and its text, without the separating blank line.
    pub(crate) fn function_text(
        &self,
        signature: &CandidateSignature,
        body: &ExtractedBody,
    ) -> Result<(usize, String), ExtractIssue> {
        let file = self.model.file();
        let text = self.text();
        let block = file.stmt(self.selection.host_block);
        let StmtKind::Block(stmts) = &block.kind else {
            return Err(ExtractIssue::NoHostBlock);
        };
        if !block.range.slice(text).ends_with('}') {
            return Err(ExtractIssue::NoHostBlock);
        }
        let close = block.range.end - 1;
        let offset = text[..close].trim_end().len();

        let indent = match stmts.first().map(|stmt| file.stmt(*stmt).range.start) {
            Some(first) if line_start_offset(text, first) != line_start_offset(text, block.range.start) => {
                indentation_at(text, first)
            }
            _ => format!("{}{INDENT_UNIT}", indentation_at(text, block.range.start)),
        };
        let old_indent = indentation_at(text, self.selection.range.start);
        let body_indent = format!("{indent}{INDENT_UNIT}");
        let header = signature.header(self.model, self.selection.range.start);

        let function = match (signature.body, &body.single_expression) {
            (BodyShape::Expression, Some(expr)) => {
                let expr = reindent(expr, &old_indent, &body_indent);
                format!("{indent}{header} => {};", expr.trim_start())
            }
            _ => format!(
                "{indent}{header}\n{indent}{{\n{}\n{indent}}}",
                reindent(&body.text, &old_indent, &body_indent)
            ),
        };
        Ok((offset, function))
    }

    pub(crate) fn call_site(
        &self,
        signature: &CandidateSignature,
        facts: &RegionFacts,
        style: &StyleOptions,
    ) -> Result<CallSite, ExtractIssue> {
        let file = self.model.file();
        let text = self.text();
        let call = signature.call();
        let mut lines = self.hoisted_declarations();

        if let Region::Expr(expr) = self.selection.region {
            let declarations = if lines.is_empty() {
                None
            } else {
                Some(self.declarations_before(expr, &lines)?)
            };
            return Ok(CallSite {
                edit: CallSiteEdit {
                    range: self.selection.replace_range,
                    text: call,
                },
                name_offset: 0,
                declarations,
            });
        }

        let indent = indentation_at(text, self.selection.range.start);
        let name_line = lines.len();
        let name_col;
        if !facts.returns.is_empty() {
            if signature.return_type.is_void() {
                name_col = 0;
                lines.push(format!("{call};"));
                lines.push("return;".to_owned());
            } else {
                name_col = "return ".len();
                lines.push(format!("return {call};"));
            }
        } else if let Some(returned) = self.variables.returned() {
            let target = if returned.flow.declared_inside {
                format!("{} {}", self.receiving_type(returned.local, style), returned.name)
            } else {
                returned.name.to_string()
            };
            name_col = target.len() + " = ".len();
            lines.push(format!("{target} = {call};"));
        } else {
            name_col = 0;
            lines.push(format!("{call};"));
        }

        let (range, lead, separator, trail) = if !self.selection.in_statement_list && lines.len() > 1 {
            let first = self.selection.stmts().first().copied().ok_or(ExtractIssue::InvalidSelection)?;
            let parent = match self.model.parents().parent(NodeId::Stmt(first)) {
                Some(NodeId::Stmt(parent)) => parent,
                _ => return Err(ExtractIssue::InvalidSelection),
            };
            let outer = indentation_at(text, file.stmt(parent).range.start);
            let start = file
                .token_before(self.selection.range.start)
                .map_or(self.selection.range.start, |token| token.range.end);
            (
                TextRange::new(start, self.selection.range.end),
                format!("\n{outer}{{\n{outer}{INDENT_UNIT}"),
                format!("\n{outer}{INDENT_UNIT}"),
                format!("\n{outer}}}"),
            )
        } else {
            (self.selection.range, String::new(), format!("\n{indent}"), String::new())
        };

        let name_offset = lead.len()
            + lines[..name_line]
                .iter()
                .map(|line| line.len() + separator.len())
                .sum::<usize>()
            + name_col;
        Ok(CallSite {
            edit: CallSiteEdit {
                range,
                text: format!("{lead}{}{trail}", lines.join(&separator)),
            },
            name_offset,
            declarations: None,
        })
    }

    /// `T a, b;` per run of hoisted variables sharing a type; `T c = default;` for those passed `ref`.
    fn hoisted_declarations(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut run: Option<(String, Vec<String>)> = None;
        for fact in self.variables.hoisted() {
            let ty = self.declared_type(fact.local);
            if fact.role == VariableRole::Parameter(Direction::Ref) {
                lines.extend(run.take().map(|(ty, names)| format!("{ty} {};", names.join(", "))));
                lines.push(format!("{ty} {} = default;", fact.name));
                continue;
            }
            match &mut run {
                Some((run_ty, names)) if *run_ty == ty => names.push(fact.name.to_string()),
                _ => {
                    lines.extend(run.take().map(|(ty, names)| format!("{ty} {};", names.join(", "))));
                    run = Some((ty, vec![fact.name.to_string()]));
                }
            }
        }
        lines.extend(run.map(|(ty, names)| format!("{ty} {};", names.join(", "))));
        lines
    }

    /// Inserts `lines` above the statement containing `expr`.
    fn declarations_before(&self, expr: ExprId, lines: &[String]) -> Result<TextEdit, ExtractIssue> {
        let file = self.model.file();
        let text = self.text();
        let parents = self.model.parents();
        let stmt = parents
            .ancestors(NodeId::Expr(expr))
            .find_map(|node| match node {
                NodeId::Stmt(stmt) => Some(stmt),
                NodeId::Expr(_) => None,
            })
            .ok_or(ExtractIssue::UnsupportedHoist)?;
        let in_list = match parents.parent(NodeId::Stmt(stmt)) {
            Some(NodeId::Stmt(parent)) => matches!(file.stmt(parent).kind, StmtKind::Block(_) | StmtKind::Switch { .. }),
            _ => false,
        };
        if !in_list {
            return Err(ExtractIssue::UnsupportedHoist);
        }
        let start = file.stmt(stmt).range.start;
        let indent = indentation_at(text, start);
        let inserted: String = lines.iter().map(|line| format!("{indent}{line}\n")).collect();
        Ok(TextEdit::insert(self.file.clone(), line_start_offset(text, start), inserted))
    }

    /// The declared type as written, or the inferred type for `var`.
    fn declared_type(&self, local: LocalId) -> String {
        match &self.model.scopes().local(local).ty {
            Some(ty) => self.model.file().text_of(ty.range).to_owned(),
            None => self
                .model
                .display_ty(&self.model.local_type(local), self.selection.range.start),
        }
    }

    fn receiving_type(&self, local: LocalId, style: &StyleOptions) -> String {
        if self.model.scopes().local(local).ty.is_none() {
            let ty = self.model.local_type(local);
            if style.implicit_typing.value.use_var(ty.is_builtin(), false) {
                return "var".to_owned();
            }
        }
        self.declared_type(local)
    }
}

fn render_designation(designation: &Designation, hoisted: &[TextRange]) -> String {
    match designation {
        Designation::Single { name, range } if hoisted.contains(range) => name.to_string(),
        Designation::Single { name, .. } => format!("var {name}"),
        Designation::Discard { .. } => "_".to_owned(),
        Designation::Parenthesized { items, .. } => {
            let items: Vec<String> = items.iter().map(|item| render_designation(item, hoisted)).collect();
            format!("({})", items.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use carve_core::Name;

    use super::*;

    #[test]
    fn nested_designations_keep_their_shape() {
        let x = TextRange::new(5, 6);
        let y = TextRange::new(8, 9);
        let designation = Designation::Parenthesized {
            items: vec![
                Designation::Single {
                    name: Name::new("x"),
                    range: x,
                },
                Designation::Parenthesized {
                    items: vec![
                        Designation::Single {
                            name: Name::new("y"),
                            range: y,
                        },
                        Designation::Discard {
                            range: TextRange::new(11, 12),
                        },
                    ],
                    range: TextRange::new(7, 13),
                },
            ],
            range: TextRange::new(4, 14),
        };
        assert_eq!(render_designation(&designation, &[x, y]), "(x, (y, _))");
        assert_eq!(render_designation(&designation, &[x]), "(x, (var y, _))");
    }
}
