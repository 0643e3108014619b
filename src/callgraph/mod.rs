//! Device call graph: reachability from a kernel body, restrictions on
//! what device code may do, and detection of the `this_item` intrinsic.

pub mod attrs;


use std::collections::BTreeSet;

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{depth_first_search, Control, Dfs, DfsEvent};

use crate::config::TargetConfig;
use crate::diagnostic::{DiagKind, Diagnostic};
use crate::span::{Span, Spanned};
use crate::types::classify::Classifier;
use crate::types::DeclContext;

use attrs::KernelAttr;

/// Function handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FnId(u32);

impl FnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callee {
    Direct(FnId),
    /// Dispatch through a vtable; the named method is the static target.
    Virtual(FnId),
    /// Call through a function pointer.
    Indirect,
}

#[derive(Clone, Debug)]
pub struct CallSite {
    pub callee: Callee,
    pub span: Span,
    /// Inside a constant-evaluated context; never executed on the device.
    pub constexpr: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RttiKind {
    TypeId,
    DynamicCast,
}

#[derive(Clone, Debug)]
pub struct RttiUse {
    pub kind: RttiKind,
    pub span: Span,
    pub constexpr: bool,
}

/// One declaration of a function and the attributes written on it.
#[derive(Clone, Debug, Default)]
pub struct Redecl {
    pub span: Span,
    pub attrs: Vec<Spanned<KernelAttr>>,
}

#[derive(Clone, Debug, Default)]
pub struct FunctionDecl {
    pub name: String,
    pub scope: Vec<DeclContext>,
    pub span: Span,
    /// Has a body in this unit.
    pub defined: bool,
    /// Marked as visible to device code of other units.
    pub external: bool,
    /// Provided by the device toolchain.
    pub builtin: bool,
    /// Carries the SIMD marker.
    pub simd: bool,
    pub redecls: Vec<Redecl>,
    pub calls: Vec<CallSite>,
    pub rtti: Vec<RttiUse>,
}

impl FunctionDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            defined: true,
            ..Self::default()
        }
    }

    pub fn qualified_name(&self) -> String {
        let mut parts: Vec<&str> = self.scope.iter().map(DeclContext::name).collect();
        parts.push(&self.name);
        parts.join("::")
    }
}

/// All functions of a compilation unit.
#[derive(Clone, Debug, Default)]
pub struct FunctionTable {
    fns: Vec<FunctionDecl>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, f: FunctionDecl) -> FnId {
        let id = FnId(self.fns.len() as u32);
        self.fns.push(f);
        id
    }

    pub fn get(&self, id: FnId) -> &FunctionDecl {
        &self.fns[id.index()]
    }

    pub fn get_mut(&mut self, id: FnId) -> &mut FunctionDecl {
        &mut self.fns[id.index()]
    }

    pub fn len(&self) -> usize {
        self.fns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FnId, &FunctionDecl)> {
        self.fns
            .iter()
            .enumerate()
            .map(|(i, f)| (FnId(i as u32), f))
    }
}

/// Static direct-call edges. Calls in constant-evaluated contexts and
/// calls that cannot be resolved statically contribute no edge.
pub struct CallGraph<'t> {
    table: &'t FunctionTable,
    graph: DiGraphMap<FnId, ()>,
}

impl<'t> CallGraph<'t> {
    pub fn build(table: &'t FunctionTable) -> Self {
        let mut graph = DiGraphMap::new();
        for (id, f) in table.iter() {
            graph.add_node(id);
            for call in &f.calls {
                if let (Callee::Direct(callee), false) = (call.callee, call.constexpr) {
                    graph.add_edge(id, callee, ());
                }
            }
        }
        Self { table, graph }
    }

    /// Functions reachable from `root`, `root` first, in depth-first
    /// discovery order.
    pub fn reachable(&self, root: FnId) -> Vec<FnId> {
        let mut out = Vec::new();
        let mut dfs = Dfs::new(&self.graph, root);
        while let Some(id) = dfs.next(&self.graph) {
            out.push(id);
        }
        out
    }

    /// Edges closing a cycle, each reported once.
    pub fn recursive_edges(&self, root: FnId) -> Vec<(FnId, FnId)> {
        let mut edges = BTreeSet::new();
        depth_first_search(&self.graph, Some(root), |event| {
            if let DfsEvent::BackEdge(from, to) = event {
                edges.insert((from, to));
            }
            Control::<()>::Continue
        });
        edges.into_iter().collect()
    }

    /// Every disallowed construct reachable from a kernel body.
    pub fn check_restrictions(&self, root: FnId, target: &TargetConfig) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for (from, to) in self.recursive_edges(root) {
            let caller = self.table.get(from);
            let span = caller
                .calls
                .iter()
                .find(|c| c.callee == Callee::Direct(to) && !c.constexpr)
                .map_or(caller.span, |c| c.span);
            out.push(
                Diagnostic::error(
                    DiagKind::CallGraphViolation,
                    format!(
                        "kernel cannot call a recursive function: '{}' calls '{}'",
                        caller.name,
                        self.table.get(to).name
                    ),
                    span,
                )
                .with_help(
                    "device code does not support recursion; use an iterative algorithm instead"
                        .to_string(),
                ),
            );
        }

        for id in self.reachable(root) {
            let f = self.table.get(id);
            for call in f.calls.iter().filter(|c| !c.constexpr) {
                match call.callee {
                    Callee::Virtual(callee) => out.push(Diagnostic::error(
                        DiagKind::CallGraphViolation,
                        format!(
                            "kernel cannot call a virtual function: '{}'",
                            self.table.get(callee).qualified_name()
                        ),
                        call.span,
                    )),
                    Callee::Indirect if !target.allow_function_pointers => out.push(
                        Diagnostic::error(
                            DiagKind::CallGraphViolation,
                            "kernel cannot call through a function pointer".to_string(),
                            call.span,
                        ),
                    ),
                    Callee::Indirect => {}
                    Callee::Direct(callee) => {
                        let g = self.table.get(callee);
                        if !g.defined && !g.external && !g.builtin {
                            out.push(
                                Diagnostic::error(
                                    DiagKind::CallGraphViolation,
                                    format!(
                                        "function '{}' without a definition is called from device code",
                                        g.qualified_name()
                                    ),
                                    call.span,
                                )
                                .with_related("declared here".to_string(), g.span)
                                .with_help(
                                    "define it in this unit or mark it SYCL_EXTERNAL".to_string(),
                                ),
                            );
                        }
                    }
                }
            }
            for rtti in f.rtti.iter().filter(|r| !r.constexpr) {
                let what = match rtti.kind {
                    RttiKind::TypeId => "typeid",
                    RttiKind::DynamicCast => "dynamic_cast",
                };
                out.push(Diagnostic::error(
                    DiagKind::CallGraphViolation,
                    format!("kernel cannot use rtti: '{}'", what),
                    rtti.span,
                ));
            }
        }
        out
    }

    /// A reachable function is the `this_item` free function.
    pub fn calls_this_item(&self, root: FnId, classifier: &Classifier) -> bool {
        self.reachable(root).into_iter().any(|id| {
            let f = self.table.get(id);
            classifier.is_this_item(&f.scope, &f.name)
        })
    }
}
