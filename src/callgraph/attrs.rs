//! Device-side execution attributes: merging across redeclarations and
//! propagation from reachable functions onto the synthetic kernel.

use std::fmt;

use crate::diagnostic::{DiagKind, Diagnostic};
use crate::span::{Span, Spanned};

use super::{CallGraph, FnId, FunctionTable};

/// Attribute that constrains how a kernel is launched or scheduled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelAttr {
    ReqdSubGroupSize(u32),
    ReqdWorkGroupSize([u32; 3]),
    MaxWorkGroupSize([u32; 3]),
    NumSimdWorkItems(u32),
    MaxGlobalWorkDim(u32),
    SchedulerTargetFmaxMhz(u32),
    NoGlobalWorkOffset(bool),
    KernelArgsRestrict,
    UseStallEnableClusters,
    LoopFuse { depth: u32, independent: bool },
}

/// Identity of an attribute regardless of its arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrKind {
    ReqdSubGroupSize,
    ReqdWorkGroupSize,
    MaxWorkGroupSize,
    NumSimdWorkItems,
    MaxGlobalWorkDim,
    SchedulerTargetFmaxMhz,
    NoGlobalWorkOffset,
    KernelArgsRestrict,
    UseStallEnableClusters,
    LoopFuse,
}

impl AttrKind {
    pub fn spelling(self) -> &'static str {
        match self {
            AttrKind::ReqdSubGroupSize => "reqd_sub_group_size",
            AttrKind::ReqdWorkGroupSize => "reqd_work_group_size",
            AttrKind::MaxWorkGroupSize => "max_work_group_size",
            AttrKind::NumSimdWorkItems => "num_simd_work_items",
            AttrKind::MaxGlobalWorkDim => "max_global_work_dim",
            AttrKind::SchedulerTargetFmaxMhz => "scheduler_target_fmax_mhz",
            AttrKind::NoGlobalWorkOffset => "no_global_work_offset",
            AttrKind::KernelArgsRestrict => "kernel_args_restrict",
            AttrKind::UseStallEnableClusters => "use_stall_enable_clusters",
            AttrKind::LoopFuse => "loop_fuse",
        }
    }

    pub fn from_spelling(name: &str) -> Option<Self> {
        let name = name
            .strip_prefix("intel::")
            .or_else(|| name.strip_prefix("sycl::"))
            .or_else(|| name.strip_prefix("cl::"))
            .unwrap_or(name);
        Some(match name {
            "reqd_sub_group_size" => AttrKind::ReqdSubGroupSize,
            "reqd_work_group_size" => AttrKind::ReqdWorkGroupSize,
            "max_work_group_size" => AttrKind::MaxWorkGroupSize,
            "num_simd_work_items" => AttrKind::NumSimdWorkItems,
            "max_global_work_dim" => AttrKind::MaxGlobalWorkDim,
            "scheduler_target_fmax_mhz" => AttrKind::SchedulerTargetFmaxMhz,
            "no_global_work_offset" => AttrKind::NoGlobalWorkOffset,
            "kernel_args_restrict" => AttrKind::KernelArgsRestrict,
            "use_stall_enable_clusters" => AttrKind::UseStallEnableClusters,
            "loop_fuse" | "loop_fuse_independent" => AttrKind::LoopFuse,
            _ => return None,
        })
    }
}

impl KernelAttr {
    pub fn kind(&self) -> AttrKind {
        match self {
            KernelAttr::ReqdSubGroupSize(_) => AttrKind::ReqdSubGroupSize,
            KernelAttr::ReqdWorkGroupSize(_) => AttrKind::ReqdWorkGroupSize,
            KernelAttr::MaxWorkGroupSize(_) => AttrKind::MaxWorkGroupSize,
            KernelAttr::NumSimdWorkItems(_) => AttrKind::NumSimdWorkItems,
            KernelAttr::MaxGlobalWorkDim(_) => AttrKind::MaxGlobalWorkDim,
            KernelAttr::SchedulerTargetFmaxMhz(_) => AttrKind::SchedulerTargetFmaxMhz,
            KernelAttr::NoGlobalWorkOffset(_) => AttrKind::NoGlobalWorkOffset,
            KernelAttr::KernelArgsRestrict => AttrKind::KernelArgsRestrict,
            KernelAttr::UseStallEnableClusters => AttrKind::UseStallEnableClusters,
            KernelAttr::LoopFuse { .. } => AttrKind::LoopFuse,
        }
    }

    /// Build an attribute from its spelling and integer arguments, applying
    /// the source-level defaults for omitted arguments.
    pub fn from_parts(name: &str, args: &[i64]) -> Result<Self, String> {
        let kind =
            AttrKind::from_spelling(name).ok_or_else(|| format!("unknown kernel attribute '{}'", name))?;
        let arg = |i: usize, default: Option<u32>| -> Result<u32, String> {
            match args.get(i) {
                Some(&v) => u32::try_from(v).map_err(|_| {
                    format!("'{}' argument must be a non-negative 32-bit integer", kind.spelling())
                }),
                None => default.ok_or_else(|| {
                    format!("'{}' requires at least {} argument(s)", kind.spelling(), i + 1)
                }),
            }
        };
        let max = match kind {
            AttrKind::ReqdWorkGroupSize | AttrKind::MaxWorkGroupSize => 3,
            AttrKind::KernelArgsRestrict | AttrKind::UseStallEnableClusters => 0,
            _ => 1,
        };
        if args.len() > max {
            return Err(format!(
                "'{}' takes at most {} argument(s)",
                kind.spelling(),
                max
            ));
        }
        Ok(match kind {
            AttrKind::ReqdSubGroupSize => KernelAttr::ReqdSubGroupSize(arg(0, None)?),
            AttrKind::ReqdWorkGroupSize => {
                KernelAttr::ReqdWorkGroupSize([arg(0, None)?, arg(1, Some(1))?, arg(2, Some(1))?])
            }
            AttrKind::MaxWorkGroupSize => {
                KernelAttr::MaxWorkGroupSize([arg(0, None)?, arg(1, None)?, arg(2, None)?])
            }
            AttrKind::NumSimdWorkItems => KernelAttr::NumSimdWorkItems(arg(0, None)?),
            AttrKind::MaxGlobalWorkDim => {
                let dim = arg(0, None)?;
                if dim > 3 {
                    return Err("'max_global_work_dim' must be between 0 and 3".to_string());
                }
                KernelAttr::MaxGlobalWorkDim(dim)
            }
            AttrKind::SchedulerTargetFmaxMhz => KernelAttr::SchedulerTargetFmaxMhz(arg(0, None)?),
            AttrKind::NoGlobalWorkOffset => KernelAttr::NoGlobalWorkOffset(arg(0, Some(1))? != 0),
            AttrKind::KernelArgsRestrict => KernelAttr::KernelArgsRestrict,
            AttrKind::UseStallEnableClusters => KernelAttr::UseStallEnableClusters,
            AttrKind::LoopFuse => KernelAttr::LoopFuse {
                depth: arg(0, Some(1))?,
                independent: name.ends_with("loop_fuse_independent"),
            },
        })
    }
}

impl fmt::Display for KernelAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = |d: &[u32; 3]| format!("{}, {}, {}", d[0], d[1], d[2]);
        match self {
            KernelAttr::ReqdSubGroupSize(n) => write!(f, "intel::reqd_sub_group_size({})", n),
            KernelAttr::ReqdWorkGroupSize(d) => write!(f, "sycl::reqd_work_group_size({})", dims(d)),
            KernelAttr::MaxWorkGroupSize(d) => write!(f, "intel::max_work_group_size({})", dims(d)),
            KernelAttr::NumSimdWorkItems(n) => write!(f, "intel::num_simd_work_items({})", n),
            KernelAttr::MaxGlobalWorkDim(n) => write!(f, "intel::max_global_work_dim({})", n),
            KernelAttr::SchedulerTargetFmaxMhz(n) => {
                write!(f, "intel::scheduler_target_fmax_mhz({})", n)
            }
            KernelAttr::NoGlobalWorkOffset(on) => {
                write!(f, "intel::no_global_work_offset({})", u8::from(*on))
            }
            KernelAttr::KernelArgsRestrict => write!(f, "intel::kernel_args_restrict"),
            KernelAttr::UseStallEnableClusters => write!(f, "intel::use_stall_enable_clusters"),
            KernelAttr::LoopFuse { depth, independent } => {
                let name = if *independent { "loop_fuse_independent" } else { "loop_fuse" };
                write!(f, "intel::{}({})", name, depth)
            }
        }
    }
}

fn position(attrs: &[Spanned<KernelAttr>], kind: AttrKind) -> Option<usize> {
    attrs.iter().position(|a| a.node.kind() == kind)
}

fn exceeds(a: &[u32; 3], b: &[u32; 3]) -> bool {
    a.iter().zip(b).any(|(x, y)| x > y)
}

fn conflict(at: Span, first: &Spanned<KernelAttr>, second: &Spanned<KernelAttr>) -> Diagnostic {
    Diagnostic::error(
        DiagKind::AttributeConflict,
        format!(
            "conflicting attributes '{}' and '{}' applied to a kernel",
            first.node, second.node
        ),
        at,
    )
    .with_related("conflicting attribute is here".to_string(), first.span)
    .with_related("conflicting attribute is here".to_string(), second.span)
}

/// Attributes of one function across all of its redeclarations. The same
/// attribute with different arguments on two redeclarations is a
/// conflict; the later declaration wins.
pub fn merge_redecls(table: &FunctionTable, id: FnId) -> (Vec<Spanned<KernelAttr>>, Vec<Diagnostic>) {
    let f = table.get(id);
    let mut merged: Vec<Spanned<KernelAttr>> = Vec::new();
    let mut diagnostics = Vec::new();
    for redecl in &f.redecls {
        for attr in &redecl.attrs {
            match merged.iter_mut().find(|a| a.node.kind() == attr.node.kind()) {
                Some(existing) if existing.node != attr.node => {
                    diagnostics.push(conflict(f.span, existing, attr));
                    *existing = attr.clone();
                }
                Some(_) => {}
                None => merged.push(attr.clone()),
            }
        }
    }
    (merged, diagnostics)
}

/// Collect the attributes of every function reachable from `body` onto
/// the kernel. `simd_kernel` is the kernel's own SIMD marker.
pub fn propagate(
    table: &FunctionTable,
    graph: &CallGraph,
    body: FnId,
    simd_kernel: bool,
    at: Span,
) -> (Vec<Spanned<KernelAttr>>, Vec<Diagnostic>) {
    let mut kernel: Vec<Spanned<KernelAttr>> = Vec::new();
    let mut diagnostics = Vec::new();
    for id in graph.reachable(body) {
        let f = table.get(id);
        let (attrs, merge_diags) = merge_redecls(table, id);
        diagnostics.extend(merge_diags);

        if id != body && f.simd && !simd_kernel {
            diagnostics.push(
                Diagnostic::error(
                    DiagKind::AttributeConflict,
                    format!(
                        "SIMD function '{}' cannot be called from a non-SIMD kernel",
                        f.name
                    ),
                    at,
                )
                .with_related("function declared here".to_string(), f.span),
            );
        }

        for attr in attrs {
            match attr.node {
                KernelAttr::UseStallEnableClusters if id != body => {
                    diagnostics.push(Diagnostic::warning(
                        DiagKind::AttributeConflict,
                        format!(
                            "'{}' attribute ignored: only allowed on the kernel body",
                            attr.node
                        ),
                        attr.span,
                    ));
                    continue;
                }
                KernelAttr::LoopFuse { .. } if id != body => continue,
                _ => {}
            }
            if let Some(diag) = apply(&mut kernel, attr, simd_kernel, at) {
                diagnostics.push(diag);
            }
        }
    }
    (kernel, diagnostics)
}

/// Add one propagated attribute to the kernel's list, or report why it
/// cannot be.
fn apply(
    kernel: &mut Vec<Spanned<KernelAttr>>,
    attr: Spanned<KernelAttr>,
    simd_kernel: bool,
    at: Span,
) -> Option<Diagnostic> {
    if let Some(i) = position(kernel, attr.node.kind()) {
        let existing = &kernel[i];
        if existing.node == attr.node {
            return None;
        }
        return Some(conflict(at, existing, &attr));
    }
    match &attr.node {
        KernelAttr::ReqdSubGroupSize(n) if simd_kernel && *n != 1 => {
            return Some(
                Diagnostic::error(
                    DiagKind::AttributeConflict,
                    format!("'{}' conflicts with the SIMD kernel attribute", attr.node),
                    at,
                )
                .with_related("conflicting attribute is here".to_string(), attr.span),
            );
        }
        KernelAttr::ReqdWorkGroupSize(reqd) => {
            if let Some(i) = position(kernel, AttrKind::MaxWorkGroupSize) {
                if let KernelAttr::MaxWorkGroupSize(max) = &kernel[i].node {
                    if exceeds(reqd, max) {
                        return Some(conflict(at, &kernel[i], &attr));
                    }
                }
            }
        }
        KernelAttr::MaxWorkGroupSize(max) => {
            if let Some(i) = position(kernel, AttrKind::ReqdWorkGroupSize) {
                if let KernelAttr::ReqdWorkGroupSize(reqd) = &kernel[i].node {
                    if exceeds(reqd, max) {
                        return Some(conflict(at, &kernel[i], &attr));
                    }
                }
            }
        }
        _ => {}
    }
    kernel.push(attr);
    None
}
