//! The synthetic device entry point: flattened parameters plus the body
//! that rebuilds the kernel object from them.

pub mod body;
pub mod params;


use std::ops::Range;

use crate::callgraph::attrs::KernelAttr;
use crate::span::{Span, Spanned};
use crate::types::classify::ResourceKind;
use crate::types::{AddrSpace, TyId, TypeTable};

pub use body::BodyBuilder;
pub use params::ParamBuilder;

pub const INIT: &str = "__init";
pub const INIT_ESIMD: &str = "__init_esimd";
pub const FINALIZE: &str = "__finalize";

/// Name of the single-field record synthesized to carry a pointer or an
/// array through a by-value parameter.
pub const CARRIER_NAME: &str = "__wrapper_class";
pub const CARRIER_FIELD: &str = "_data";

/// Local variable holding the rebuilt kernel object.
pub const CLONE_NAME: &str = "__clone";

/// Designated init routine of a resource for the given kernel flavour.
pub fn init_method_name(kind: ResourceKind, simd: bool) -> &'static str {
    if simd && kind == ResourceKind::Accessor {
        INIT_ESIMD
    } else {
        INIT
    }
}

/// Type of a synthetic parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamTy {
    /// Passed as the declared type.
    Value(TyId),
    /// Pointer with a normalized address space.
    Pointer { pointee: TyId, space: AddrSpace },
    /// Wrapped in a fresh single-field carrier record.
    Carrier(Box<ParamTy>),
}

impl ParamTy {
    pub fn size(&self, types: &TypeTable) -> u64 {
        match self {
            ParamTy::Value(ty) => types.size_of(*ty),
            ParamTy::Pointer { .. } => types.pointer_size(),
            ParamTy::Carrier(inner) => inner.size(types),
        }
    }

    pub fn is_carrier(&self) -> bool {
        matches!(self, ParamTy::Carrier(_))
    }

    pub fn display(&self, types: &TypeTable) -> String {
        match self {
            ParamTy::Value(ty) => types.display(*ty),
            ParamTy::Pointer { pointee, space } => {
                format!("{} {} *", space.qualifier(), types.display(*pointee))
            }
            ParamTy::Carrier(inner) => {
                format!("{}<{}>", CARRIER_NAME, inner.display(types))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelParam {
    pub name: String,
    pub ty: ParamTy,
    /// Compile-time buffer location of an accessor's pointer.
    pub buffer_location: Option<u32>,
    /// Pointer parameter of an accessor in a SIMD kernel.
    pub simd_accessor_ptr: bool,
}

impl KernelParam {
    pub fn new(name: String, ty: ParamTy) -> Self {
        Self {
            name,
            ty,
            buffer_location: None,
            simd_accessor_ptr: false,
        }
    }
}

/// Append-only parameter list shared by the code generation handlers.
/// The window is the run of parameters appended for the field visited
/// last.
#[derive(Debug, Default)]
pub struct ParamList {
    params: Vec<KernelParam>,
    window_start: usize,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new (empty) window for the next field.
    pub fn begin_field(&mut self) {
        self.window_start = self.params.len();
    }

    pub fn push(&mut self, param: KernelParam) {
        self.params.push(param);
    }

    pub fn window(&self) -> Range<usize> {
        self.window_start..self.params.len()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[KernelParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<KernelParam> {
        self.params
    }
}

/// Expression inside the synthetic body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// The local clone of the kernel object.
    Clone,
    Param(usize),
    Member { base: Box<Expr>, name: String },
    /// Base-class subobject.
    Base { base: Box<Expr>, ty: TyId },
    Index { base: Box<Expr>, index: u64 },
    /// Cast back to the field's declared pointer type.
    AddrSpaceCast { expr: Box<Expr>, to: TyId },
}

impl Expr {
    pub fn member(base: Expr, name: &str) -> Self {
        Expr::Member {
            base: Box::new(base),
            name: name.to_string(),
        }
    }

    /// Read the payload of a carrier parameter.
    pub fn unwrap_carrier(param: usize) -> Self {
        Expr::member(Expr::Param(param), CARRIER_FIELD)
    }
}

/// Initializer tree mirroring the kernel object's shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Init {
    List { ty: TyId, elems: Vec<Init> },
    Copy { ty: TyId, from: Expr },
    /// Empty placeholder for a resource rebuilt by its init routine.
    Default(TyId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    DeclareClone { ty: TyId, init: Init },
    Call {
        receiver: Expr,
        method: String,
        args: Vec<usize>,
    },
    /// Invoke the user's kernel body on the clone.
    InvokeBody,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelBody {
    pub stmts: Vec<Stmt>,
}

impl KernelBody {
    pub fn calls(&self) -> impl Iterator<Item = (&Expr, &str, &[usize])> {
        self.stmts.iter().filter_map(|s| match s {
            Stmt::Call {
                receiver,
                method,
                args,
            } => Some((receiver, method.as_str(), args.as_slice())),
            _ => None,
        })
    }

    pub fn clone_init(&self) -> Option<&Init> {
        self.stmts.iter().find_map(|s| match s {
            Stmt::DeclareClone { init, .. } => Some(init),
            _ => None,
        })
    }
}

/// Device entry point synthesized for one launch site.
#[derive(Clone, Debug)]
pub struct SyntheticKernel {
    pub name: String,
    pub kernel_object: TyId,
    pub params: Vec<KernelParam>,
    pub body: KernelBody,
    pub attrs: Vec<Spanned<KernelAttr>>,
    pub simd: bool,
    pub span: Span,
}

impl SyntheticKernel {
    pub fn param_bytes(&self, types: &TypeTable) -> u64 {
        self.params.iter().map(|p| p.ty.size(types)).sum()
    }

    /// Pseudo-source listing for `--dump-kernels`.
    pub fn render(&self, types: &TypeTable) -> String {
        let mut out = String::new();
        for attr in &self.attrs {
            out.push_str(&format!("[[{}]]\n", attr.node));
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let mut s = format!("{} {}", p.ty.display(types), p.name);
                if let Some(loc) = p.buffer_location {
                    s.push_str(&format!(" [[buffer_location({})]]", loc));
                }
                if p.simd_accessor_ptr {
                    s.push_str(" [[simd_accessor_ptr]]");
                }
                s
            })
            .collect();
        out.push_str(&format!(
            "{}void {}({})\n{{\n",
            if self.simd { "[[simd]] " } else { "" },
            self.name,
            params.join(", ")
        ));
        for stmt in &self.body.stmts {
            let line = match stmt {
                Stmt::DeclareClone { ty, init } => format!(
                    "{} {} = {};",
                    types.display(*ty),
                    CLONE_NAME,
                    self.render_init(types, init)
                ),
                Stmt::Call {
                    receiver,
                    method,
                    args,
                } => {
                    let args: Vec<&str> = args
                        .iter()
                        .map(|&i| self.params[i].name.as_str())
                        .collect();
                    format!(
                        "{}.{}({});",
                        self.render_expr(types, receiver),
                        method,
                        args.join(", ")
                    )
                }
                Stmt::InvokeBody => format!("{}();", CLONE_NAME),
            };
            out.push_str("  ");
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }

    fn render_init(&self, types: &TypeTable, init: &Init) -> String {
        match init {
            Init::List { elems, .. } => {
                if elems.is_empty() {
                    return "{}".to_string();
                }
                let parts: Vec<String> =
                    elems.iter().map(|e| self.render_init(types, e)).collect();
                format!("{{ {} }}", parts.join(", "))
            }
            Init::Copy { from, .. } => self.render_expr(types, from),
            Init::Default(_) => "{}".to_string(),
        }
    }

    fn render_expr(&self, types: &TypeTable, expr: &Expr) -> String {
        match expr {
            Expr::Clone => CLONE_NAME.to_string(),
            Expr::Param(i) => self.params[*i].name.clone(),
            Expr::Member { base, name } => format!("{}.{}", self.render_expr(types, base), name),
            Expr::Base { base, ty } => format!(
                "static_cast<{} &>({})",
                types.display(*ty),
                self.render_expr(types, base)
            ),
            Expr::Index { base, index } => {
                format!("{}[{}]", self.render_expr(types, base), index)
            }
            Expr::AddrSpaceCast { expr, to } => {
                format!("({}){}", types.display(*to), self.render_expr(types, expr))
            }
        }
    }
}
