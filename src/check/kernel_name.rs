use crate::diagnostic::{DiagKind, Diagnostic};
use crate::span::Span;
use crate::types::{DeclContext, TemplateArg, TyId, TypeTable};

/// Checks that a kernel name type can be named from the integration
/// header: declared at namespace scope, outside `std`, and not unnamed.
/// Template specializations are checked through their type arguments.
pub struct KernelNameChecker<'a> {
    types: &'a TypeTable,
    /// Location of the launch site; every finding is reported there.
    at: Span,
    name_type: TyId,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> KernelNameChecker<'a> {
    pub fn new(types: &'a TypeTable, name_type: TyId, at: Span) -> Self {
        Self {
            types,
            at,
            name_type,
            diagnostics: Vec::new(),
        }
    }

    pub fn check(mut self) -> Vec<Diagnostic> {
        self.visit(self.name_type);
        self.diagnostics
    }

    fn visit(&mut self, ty: TyId) {
        let types = self.types;
        let Some(decl) = types.as_record(ty) else {
            return;
        };
        if let Some(args) = &decl.template_args {
            self.visit_args(args);
            return;
        }
        match decl.scope.last() {
            None => {}
            Some(DeclContext::Namespace(ns)) => {
                if ns != "std" {
                    return;
                }
                self.invalid(
                    format!(
                        "kernel name cannot be a type in the \"std\" namespace: '{}'",
                        types.display(ty)
                    ),
                    decl.span,
                );
            }
            Some(_) if decl.name.is_empty() => {
                self.invalid("unnamed type used in a kernel name".to_string(), decl.span);
            }
            Some(_) if decl.complete => {
                self.invalid(
                    format!("kernel name '{}' is not globally-visible", types.display(ty)),
                    decl.span,
                );
            }
            Some(_) => {
                self.diagnostics.push(
                    Diagnostic::warning(
                        DiagKind::KernelNaming,
                        "kernel name is implicitly declared in a local scope".to_string(),
                        self.at,
                    )
                    .with_related(format!("'{}' declared here", decl.name), decl.span),
                );
            }
        }
    }

    fn visit_args(&mut self, args: &[TemplateArg]) {
        for arg in args {
            match arg {
                TemplateArg::Type(ty) => self.visit(*ty),
                TemplateArg::Pack(items) => self.visit_args(items),
                TemplateArg::Integral(_) => {}
            }
        }
    }

    fn invalid(&mut self, note: String, decl_span: Span) {
        self.diagnostics.push(
            Diagnostic::error(
                DiagKind::KernelNaming,
                format!(
                    "kernel needs to have a globally-visible name: '{}'",
                    self.types.display(self.name_type)
                ),
                self.at,
            )
            .with_note(note)
            .with_related("declared here".to_string(), decl_span),
        );
    }
}
