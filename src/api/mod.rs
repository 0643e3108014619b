//! Driver: runs every pass over each launch site of a unit and collects
//! the synthetic kernels, the integration table and the diagnostics.

pub mod input;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::callgraph::{attrs, CallGraph, FnId, FunctionTable};
use crate::check::{
    check_kernel_object, ArgsSizeChecker, DecompositionMarker, FieldChecker, KernelNameChecker,
    UnionChecker,
};
use crate::config::TargetConfig;
use crate::diagnostic::{has_errors, Diagnostic};
use crate::integration::{IntegrationTable, KernelDescriptor, LayoutEmitter};
use crate::kernel::{BodyBuilder, ParamBuilder, ParamList, SyntheticKernel};
use crate::names::{DigestNames, NameOracle};
use crate::span::Span;
use crate::types::classify::Classifier;
use crate::types::{TyId, TypeTable};
use crate::visit::{Handler, KernelObjVisitor};

pub use input::Unit;

/// Which host entry point launched the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    #[default]
    SingleTask,
    ParallelFor,
    ParallelForWorkGroup,
}

/// One kernel invocation found in host code.
#[derive(Clone, Debug)]
pub struct LaunchSite {
    pub name_type: TyId,
    pub kernel_object: TyId,
    /// The kernel object's call operator, when its body is known.
    pub body: Option<FnId>,
    pub kind: InvocationKind,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct CompileOutput {
    pub kernels: Vec<SyntheticKernel>,
    pub table: IntegrationTable,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }
}

/// Accumulated state of one run over a unit.
#[derive(Default)]
struct Run {
    output: CompileOutput,
    /// Call-graph findings already reported for an earlier kernel.
    reported: BTreeSet<(Span, String)>,
}

impl Run {
    fn report_once(&mut self, diags: Vec<Diagnostic>) -> Vec<Diagnostic> {
        diags
            .into_iter()
            .filter(|d| self.reported.insert((d.span, d.message.clone())))
            .collect()
    }
}

pub struct DeviceCompiler<'u> {
    types: &'u TypeTable,
    functions: &'u FunctionTable,
    target: TargetConfig,
    classifier: Classifier,
    names: Box<dyn NameOracle + 'u>,
}

impl<'u> DeviceCompiler<'u> {
    pub fn new(types: &'u TypeTable, functions: &'u FunctionTable, target: TargetConfig) -> Self {
        Self {
            types,
            functions,
            classifier: Classifier::new(&target),
            target,
            names: Box::new(DigestNames),
        }
    }

    pub fn for_unit(unit: &'u Unit, target: TargetConfig) -> Self {
        Self::new(&unit.types, &unit.functions, target)
    }

    /// Replace the mangling oracle.
    pub fn with_names(mut self, names: impl NameOracle + 'u) -> Self {
        self.names = Box::new(names);
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn classifier_mut(&mut self) -> &mut Classifier {
        &mut self.classifier
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Check and lower every launch site, in order.
    pub fn lower(&self, launches: &[LaunchSite]) -> CompileOutput {
        self.run(launches, true)
    }

    /// Validity passes only; no kernels or layout tables are produced.
    pub fn check(&self, launches: &[LaunchSite]) -> Vec<Diagnostic> {
        self.run(launches, false).diagnostics
    }

    fn run(&self, launches: &[LaunchSite], codegen: bool) -> CompileOutput {
        let graph = CallGraph::build(self.functions);
        let mut run = Run::default();
        for launch in launches {
            let diags = self.lower_launch(launch, &graph, &mut run, codegen);
            run.output.diagnostics.extend(diags);
        }
        debug!(
            kernels = run.output.kernels.len(),
            diagnostics = run.output.diagnostics.len(),
            "unit done"
        );
        run.output
    }

    fn lower_launch(
        &self,
        launch: &LaunchSite,
        graph: &CallGraph<'_>,
        run: &mut Run,
        codegen: bool,
    ) -> Vec<Diagnostic> {
        let types = self.types;
        let object = launch.kernel_object;
        let mut diags = check_kernel_object(types, object, launch.span);
        let object_ok = !has_errors(&diags);

        if !self.target.unnamed_lambda {
            diags.extend(KernelNameChecker::new(types, launch.name_type, launch.span).check());
        }
        if !object_ok {
            return diags;
        }

        let body_simd = launch
            .body
            .is_some_and(|id| self.functions.get(id).simd);
        let simd = body_simd
            || types
                .as_record(object)
                .and_then(|d| d.call_operator())
                .is_some_and(|op| op.simd);

        let visitor = KernelObjVisitor::new(types, &self.classifier);

        trace!(object = %types.display(object), "validity pass");
        let mut fields = FieldChecker::new(types, &self.classifier, &self.target, simd);
        let mut unions = UnionChecker::new(types);
        let mut marker = DecompositionMarker::new(types, object);
        {
            let mut handlers: [&mut Handler<'_>; 3] = [&mut fields, &mut unions, &mut marker];
            visitor.visit(object, &mut handlers);
        }
        let mut shape = fields.finish();
        shape.extend(unions.finish());
        let shape_ok = !has_errors(&shape);
        diags.extend(shape);
        let decomposed = marker.finish();
        trace!(decomposed, "decomposition marked");

        let mut attrs = Vec::new();
        let mut calls_this_item = false;
        if let Some(body) = launch.body {
            let restrictions = graph.check_restrictions(body, &self.target);
            diags.extend(run.report_once(restrictions));
            let (propagated, attr_diags) =
                attrs::propagate(self.functions, graph, body, simd, launch.span);
            attrs = propagated;
            diags.extend(attr_diags);
            calls_this_item = launch.kind == InvocationKind::ParallelFor
                && graph.calls_this_item(body, &self.classifier);
        }

        // Sizes are meaningless for an object the shape checks rejected.
        if shape_ok {
            let mut size = ArgsSizeChecker::new(types, simd, self.target.max_kernel_args_size);
            {
                let mut handlers: [&mut Handler<'_>; 1] = [&mut size];
                visitor.visit(object, &mut handlers);
            }
            trace!(bytes = size.total(), "argument size");
            diags.extend(size.finish(launch.span));
        }

        if !codegen || has_errors(&diags) {
            return diags;
        }

        let params = RefCell::new(ParamList::new());
        let mut param_builder = ParamBuilder::new(types, &self.classifier, &params, simd);
        let mut body_builder = BodyBuilder::new(types, &params, object, simd);
        let mut layout = LayoutEmitter::new(types, &self.classifier, self.names.as_ref());
        {
            let mut handlers: [&mut Handler<'_>; 3] =
                [&mut param_builder, &mut body_builder, &mut layout];
            visitor.visit(object, &mut handlers);
        }
        let body = body_builder.finish();
        let (entries, spec_constants) = layout.finish();
        let params = params.into_inner().into_params();

        let stable_name = self.names.stable_name(types, launch.name_type);
        let name = if self.target.unnamed_lambda {
            stable_name.clone()
        } else {
            self.names.mangled_name(types, launch.name_type)
        };
        debug!(
            kernel = %name,
            params = params.len(),
            entries = entries.len(),
            simd,
            "lowered kernel"
        );

        run.output.table.add_kernel(KernelDescriptor {
            name: name.clone(),
            stable_name,
            display_name: types.display(launch.name_type),
            name_type: launch.name_type,
            span: launch.span,
            is_simd: simd,
            calls_this_item,
            entries,
        });
        for spec in spec_constants {
            run.output.table.add_spec_constant(spec);
        }
        run.output.kernels.push(SyntheticKernel {
            name,
            kernel_object: object,
            params,
            body,
            attrs,
            simd,
            span: launch.span,
        });
        diags
    }
}
