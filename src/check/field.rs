use crate::config::TargetConfig;
use crate::diagnostic::{DiagKind, Diagnostic};
use crate::kernel::{init_method_name, FINALIZE};
use crate::types::classify::{Classifier, ResourceKind, Unsupported};
use crate::types::{TemplateArg, TypeTable};
use crate::visit::{Capabilities, FieldHandler, Member};

/// Rejects field shapes that cannot be passed to a device entry point.
pub struct FieldChecker<'a> {
    types: &'a TypeTable,
    classifier: &'a Classifier,
    target: &'a TargetConfig,
    simd: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> FieldChecker<'a> {
    pub fn new(
        types: &'a TypeTable,
        classifier: &'a Classifier,
        target: &'a TargetConfig,
        simd: bool,
    ) -> Self {
        Self {
            types,
            classifier,
            target,
            simd,
            diagnostics: Vec::new(),
        }
    }

    pub fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn error(&mut self, message: String, m: &Member<'_>) {
        self.diagnostics.push(Diagnostic::error(
            DiagKind::StructuralViolation,
            message,
            m.span,
        ));
    }

    fn bad_param_type(&mut self, m: &Member<'_>) {
        let msg = format!(
            "'{}' cannot be used as the type of a kernel parameter",
            self.types.display(m.ty)
        );
        self.error(msg, m);
    }

    /// Array elements reach this through their own struct visit.
    fn check_copyable(&mut self, m: &Member<'_>) {
        let types = self.types;
        let Some(decl) = types.as_record(m.ty) else {
            return;
        };
        let shown = types.display(m.ty);
        if self.target.std_layout_kernel_params && !decl.standard_layout {
            self.error(
                format!("kernel parameter has non-standard layout type '{}'", shown),
                m,
            );
        }
        if !decl.trivially_copyable {
            let d = Diagnostic::error(
                DiagKind::StructuralViolation,
                format!(
                    "kernel parameter has non-trivially copy constructible type '{}'",
                    shown
                ),
                m.span,
            )
            .with_related(format!("'{}' declared here", shown), decl.span);
            self.diagnostics.push(d);
        } else if !decl.trivially_destructible {
            let d = Diagnostic::error(
                DiagKind::StructuralViolation,
                format!("kernel parameter has non-trivially destructible type '{}'", shown),
                m.span,
            )
            .with_related(format!("'{}' declared here", shown), decl.span);
            self.diagnostics.push(d);
        }
    }

    fn check_init_routines(&mut self, m: &Member<'_>, kind: ResourceKind) {
        let types = self.types;
        let Some(decl) = types.as_record(m.ty) else {
            return;
        };
        let mut required = vec![init_method_name(kind, self.simd)];
        if kind == ResourceKind::Stream {
            required.push(FINALIZE);
        }
        for name in required {
            if decl.method(name).is_none() {
                let msg = format!(
                    "{} type '{}' has no '{}' member function",
                    kind.name(),
                    types.display(m.ty),
                    name
                );
                self.error(msg, m);
            }
        }
    }

    fn check_accessor(&mut self, m: &Member<'_>) {
        let types = self.types;
        let Some(args) = types.as_record(m.ty).and_then(|d| d.template_args.as_ref()) else {
            return;
        };
        if self.classifier.accessor_shape(types, m.ty).is_none() {
            self.error(
                format!(
                    "accessor type '{}' does not have integral dimensions and access target arguments",
                    types.display(m.ty)
                ),
                m,
            );
        }
        if let Some(props) = args.get(5) {
            self.check_property_list(m, props);
        }
        if let Some(TemplateArg::Type(elem)) = args.first() {
            if self.classifier.has_unsupported_precision(types, *elem) {
                self.error(
                    format!(
                        "'{}' is not supported on target '{}'",
                        types.display(self.classifier.strip_indirections(types, *elem)),
                        self.target.name
                    ),
                    m,
                );
            }
        }
    }

    fn check_property_list(&mut self, m: &Member<'_>, props: &TemplateArg) {
        let types = self.types;
        let list = match props {
            TemplateArg::Type(list) if self.classifier.is_property_list(types, *list) => *list,
            _ => {
                self.error(
                    "sixth template parameter of the accessor must be of accessor_property_list type"
                        .to_string(),
                    m,
                );
                return;
            }
        };
        let Some(args) = types.as_record(list).and_then(|d| d.template_args.as_deref()) else {
            return;
        };
        let pack = match args {
            [TemplateArg::Pack(pack)] => pack,
            [_] => {
                self.error(
                    "template argument of accessor_property_list must be a parameter pack"
                        .to_string(),
                    m,
                );
                return;
            }
            _ => {
                self.error(
                    "accessor_property_list must have exactly one template argument".to_string(),
                    m,
                );
                return;
            }
        };
        let mut locations = 0usize;
        for prop in pack {
            let TemplateArg::Type(prop) = prop else {
                self.error(
                    "accessor_property_list pack argument must be a type".to_string(),
                    m,
                );
                return;
            };
            if !self.classifier.is_buffer_location(types, *prop) {
                continue;
            }
            locations += 1;
            match types.as_record(*prop).and_then(|d| d.template_args.as_deref()) {
                Some([TemplateArg::Integral(n)]) if *n >= 0 => {}
                Some([_]) => self.error(
                    "buffer_location template parameter must be a non-negative integer"
                        .to_string(),
                    m,
                ),
                _ => self.error(
                    "buffer_location must have exactly one template argument".to_string(),
                    m,
                ),
            }
        }
        if locations > 1 {
            self.error(
                "can't apply buffer_location property twice to the same accessor".to_string(),
                m,
            );
        }
    }
}

impl FieldHandler for FieldChecker<'_> {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            visit_nth_array_element: false,
            ..Capabilities::default()
        }
    }

    fn handle_resource(&mut self, m: &Member<'_>, kind: ResourceKind) {
        if kind == ResourceKind::Stream && m.is_base() {
            let msg = format!(
                "stream type '{}' cannot be used as a base class of a kernel object",
                self.types.display(m.ty)
            );
            self.error(msg, m);
            return;
        }
        if kind.has_init_routine() {
            self.check_init_routines(m, kind);
        }
        if kind == ResourceKind::Accessor {
            self.check_accessor(m);
        }
    }

    fn handle_reference(&mut self, m: &Member<'_>) {
        self.bad_param_type(m);
    }

    fn handle_pointer(&mut self, m: &Member<'_>) {
        let types = self.types;
        if self.classifier.points_to_vla(types, m.ty) {
            self.error(
                "variable length arrays are not supported for the current target".to_string(),
                m,
            );
        } else if self.classifier.has_unsupported_precision(types, m.ty) {
            let msg = format!(
                "'{}' is not supported on target '{}'",
                types.display(self.classifier.strip_indirections(types, m.ty)),
                self.target.name
            );
            self.error(msg, m);
        }
    }

    fn handle_other(&mut self, m: &Member<'_>, why: Unsupported) {
        match why {
            Unsupported::VariableLengthArray => self.error(
                "variable length arrays are not supported for the current target".to_string(),
                m,
            ),
            Unsupported::ZeroLengthArray => self.error(
                "zero-length arrays are not permitted in kernel parameters".to_string(),
                m,
            ),
            Unsupported::ExtendedPrecision => {
                let msg = format!(
                    "'{}' is not supported on target '{}'",
                    self.types.display(m.ty),
                    self.target.name
                );
                self.error(msg, m);
            }
            Unsupported::Other => self.bad_param_type(m),
        }
    }

    fn handle_struct_type(&mut self, m: &Member<'_>) -> bool {
        self.check_copyable(m);
        true
    }
}
