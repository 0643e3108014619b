//! Textual rendering of an [`IntegrationTable`] as the host-side
//! integration header.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::types::{DeclContext, RecordKind, TemplateArg, TyId, TypeTable};

use super::IntegrationTable;

/// Render the complete header. `stable_names` keys the per-kernel
/// specializations by stable name instead of by kernel name type.
pub fn render_header(table: &IntegrationTable, types: &TypeTable, stable_names: bool) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_header(&mut out, table, types, stable_names);
    out
}

fn write_header(
    out: &mut String,
    table: &IntegrationTable,
    types: &TypeTable,
    stable_names: bool,
) -> std::fmt::Result {
    writeln!(out, "// This is auto-generated kernel integration header.")?;
    writeln!(out)?;
    writeln!(out, "#include <CL/sycl/detail/defines_elementary.hpp>")?;
    writeln!(out, "#include <CL/sycl/detail/kernel_desc.hpp>")?;
    writeln!(out)?;

    let mut declared = BTreeSet::new();
    let spec_constants = table.unique_spec_constants();
    if !spec_constants.is_empty() {
        writeln!(out, "// Forward declarations of spec constant ID types:")?;
        for spec in &spec_constants {
            forward_declare(out, types, spec.id_type, &mut declared)?;
        }
        writeln!(out)?;
        writeln!(out, "// Specialization constants IDs:")?;
        for spec in &spec_constants {
            writeln!(
                out,
                "template <> struct sycl::detail::SpecConstantInfo<{}> {{",
                types.display(spec.id_type)
            )?;
            writeln!(out, "  static constexpr const char* getName() {{")?;
            writeln!(out, "    return \"{}\";", spec.stable_name)?;
            writeln!(out, "  }}")?;
            writeln!(out, "}};")?;
        }
    }

    if !stable_names {
        writeln!(out, "// Forward declarations of kernel name types:")?;
        for kernel in table.kernels() {
            forward_declare(out, types, kernel.name_type, &mut declared)?;
        }
    }
    writeln!(out)?;

    writeln!(out, "__SYCL_INLINE_NAMESPACE(cl) {{")?;
    writeln!(out, "namespace sycl {{")?;
    writeln!(out, "namespace detail {{")?;
    writeln!(out)?;

    writeln!(out, "// names of all kernels defined in the corresponding source")?;
    writeln!(out, "static constexpr")?;
    writeln!(out, "const char* const kernel_names[] = {{")?;
    let names: Vec<String> = table
        .kernels()
        .iter()
        .map(|k| format!("  \"{}\"", k.name))
        .collect();
    if !names.is_empty() {
        writeln!(out, "{}", names.join(",\n"))?;
    }
    writeln!(out, "}};")?;
    writeln!(out)?;

    writeln!(out, "// array representing signatures of all kernels defined in the")?;
    writeln!(out, "// corresponding source")?;
    writeln!(out, "static constexpr")?;
    writeln!(out, "const kernel_param_desc_t kernel_signatures[] = {{")?;
    for kernel in table.kernels() {
        writeln!(out, "  //--- {}", kernel.name)?;
        for entry in &kernel.entries {
            writeln!(
                out,
                "  {{ kernel_param_kind_t::{}, {}, {} }},",
                entry.kind, entry.info, entry.offset
            )?;
        }
        writeln!(out)?;
    }
    writeln!(out, "}};")?;
    writeln!(out)?;

    writeln!(out, "// Specializations of KernelInfo for kernel function types:")?;
    let mut first = 0usize;
    for kernel in table.kernels() {
        if stable_names {
            let chars: Vec<String> = kernel
                .stable_name
                .chars()
                .map(|c| format!("'{}'", c))
                .collect();
            writeln!(out, "template <> struct KernelInfoData<{}> {{", chars.join(", "))?;
        } else {
            writeln!(
                out,
                "template <> struct KernelInfo<{}> {{",
                types.display(kernel.name_type)
            )?;
        }
        writeln!(out, "  __SYCL_DLL_LOCAL")?;
        writeln!(
            out,
            "  static constexpr const char* getName() {{ return \"{}\"; }}",
            kernel.name
        )?;
        writeln!(out, "  __SYCL_DLL_LOCAL")?;
        writeln!(
            out,
            "  static constexpr unsigned getNumParams() {{ return {}; }}",
            kernel.entries.len()
        )?;
        writeln!(out, "  __SYCL_DLL_LOCAL")?;
        writeln!(
            out,
            "  static constexpr const kernel_param_desc_t& getParamDesc(unsigned i) {{"
        )?;
        writeln!(out, "    return kernel_signatures[i+{}];", first)?;
        writeln!(out, "  }}")?;
        writeln!(out, "  __SYCL_DLL_LOCAL")?;
        writeln!(
            out,
            "  static constexpr bool isESIMD() {{ return {}; }}",
            u8::from(kernel.is_simd)
        )?;
        writeln!(out, "  __SYCL_DLL_LOCAL")?;
        writeln!(
            out,
            "  static constexpr bool callsThisItem() {{ return {}; }}",
            u8::from(kernel.calls_this_item)
        )?;
        writeln!(out, "}};")?;
        first += kernel.entries.len();
    }
    writeln!(out)?;
    writeln!(out, "}} // namespace detail")?;
    writeln!(out, "}} // namespace sycl")?;
    writeln!(out, "}} // __SYCL_INLINE_NAMESPACE(cl)")?;
    writeln!(out)
}

/// Forward-declare a namespace-scope record so that it can be named in
/// the header. Type template arguments are declared first. Builtins and
/// records nested in classes or functions have nothing to declare.
fn forward_declare(
    out: &mut String,
    types: &TypeTable,
    ty: TyId,
    declared: &mut BTreeSet<TyId>,
) -> std::fmt::Result {
    let Some(decl) = types.as_record(ty) else {
        return Ok(());
    };
    if decl.is_specialization() {
        for arg in decl.template_args.iter().flatten() {
            if let TemplateArg::Type(inner) = arg {
                forward_declare(out, types, *inner, declared)?;
            }
        }
        return Ok(());
    }
    if decl.name.is_empty()
        || !decl
            .scope
            .iter()
            .all(|c| matches!(c, DeclContext::Namespace(_)))
        || !declared.insert(ty)
    {
        return Ok(());
    }
    let keyword = match decl.kind {
        RecordKind::Struct => "struct",
        RecordKind::Class => "class",
        RecordKind::Union => "union",
    };
    let mut line = String::new();
    for ctx in &decl.scope {
        line.push_str(&format!("namespace {} {{ ", ctx.name()));
    }
    line.push_str(&format!("{} {};", keyword, decl.name));
    for _ in &decl.scope {
        line.push_str(" }");
    }
    writeln!(out, "{}", line)
}
