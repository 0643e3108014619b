use super::emit::render_header;
use super::layout::accessor_info;
use super::*;
use crate::fixtures::{Fixture, GLOBAL_BUFFER};
use crate::names::DigestNames;
use crate::types::{AddrSpace, RecordKind, Scalar, TemplateArg, TypeTable};
use crate::visit::{Handler, KernelObjVisitor};

fn layout(fx: &Fixture, object: TyId) -> (Vec<LayoutEntry>, Vec<SpecConstant>) {
    let names = DigestNames;
    let mut emitter = LayoutEmitter::new(&fx.types, &fx.classifier, &names);
    {
        let mut handlers: [&mut Handler<'_>; 1] = [&mut emitter];
        KernelObjVisitor::new(&fx.types, &fx.classifier).visit(object, &mut handlers);
    }
    emitter.finish()
}

fn entry(kind: ParamKind, info: i32, offset: u32) -> LayoutEntry {
    LayoutEntry { kind, info, offset }
}

#[test]
fn test_accessor_info_packs_dimensions_above_target() {
    assert_eq!(accessor_info(1, GLOBAL_BUFFER), 4062);
    assert_eq!(accessor_info(2, GLOBAL_BUFFER), 6110);
    assert_eq!(accessor_info(0, 0), 0);
}

#[test]
fn test_flat_kernel_layout() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let float = fx.float;
    let acc = fx.accessor(Scalar::I32, 1);
    let ptr = fx.types.pointer(float, AddrSpace::Global);
    let smp = fx.sampler;
    let k = fx
        .kernel("K")
        .field("n", int)
        .field("acc", acc)
        .field("p", ptr)
        .field("smp", smp)
        .finish();
    let (entries, spec_constants) = layout(&fx, k);
    assert_eq!(
        entries,
        vec![
            entry(ParamKind::StdLayout, 4, 0),
            entry(ParamKind::Accessor, 4062, 8),
            entry(ParamKind::Pointer, 8, 40),
            entry(ParamKind::Sampler, 8, 48),
        ]
    );
    assert!(spec_constants.is_empty());
}

#[test]
fn test_decomposed_struct_offsets_are_absolute() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let ptr = fx.types.pointer(int, AddrSpace::Global);
    let inner = fx.types.record("Inner").field("a", int).field("p", ptr).finish();
    fx.types.persist_decomposition(inner, true);
    let k = fx.kernel("K").field("x", int).field("s", inner).finish();
    let (entries, _) = layout(&fx, k);
    assert_eq!(
        entries,
        vec![
            entry(ParamKind::StdLayout, 4, 0),
            entry(ParamKind::StdLayout, 4, 8),
            // Pointers below the top level travel wrapped.
            entry(ParamKind::StdLayout, 8, 16),
        ]
    );
}

#[test]
fn test_simple_containers_are_single_entries() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let float = fx.float;
    let arr = fx.types.array(int, 4);
    let inner = fx.types.record("Inner").field("x", int).finish();
    let u = fx.types.union("U").field("i", int).field("f", float).finish();
    let k = fx
        .kernel("K")
        .field("s", inner)
        .field("a", arr)
        .field("u", u)
        .finish();
    let (entries, _) = layout(&fx, k);
    assert_eq!(
        entries,
        vec![
            entry(ParamKind::StdLayout, 4, 0),
            entry(ParamKind::StdLayout, 16, 4),
            entry(ParamKind::StdLayout, 4, 20),
        ]
    );
}

#[test]
fn test_array_elements_are_strided() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let acc = fx.accessor(Scalar::I32, 1);
    let arr = fx.types.array(acc, 2);
    fx.types.persist_decomposition(arr, true);
    let k = fx.kernel("K").field("n", int).field("accs", arr).field("m", int).finish();
    let (entries, _) = layout(&fx, k);
    assert_eq!(
        entries,
        vec![
            entry(ParamKind::StdLayout, 4, 0),
            entry(ParamKind::Accessor, 4062, 8),
            entry(ParamKind::Accessor, 4062, 40),
            entry(ParamKind::StdLayout, 4, 72),
        ]
    );
}

#[test]
fn test_stream_and_its_accessors() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let stream = fx.stream;
    let k = fx.kernel("K").field("n", int).field("out", stream).finish();
    let (entries, _) = layout(&fx, k);
    assert_eq!(
        entries,
        vec![
            entry(ParamKind::StdLayout, 4, 0),
            entry(ParamKind::StdLayout, 104, 8),
            entry(ParamKind::Accessor, 4062, 8),
            entry(ParamKind::Accessor, 4062, 40),
            entry(ParamKind::Accessor, 4062, 72),
        ]
    );
}

#[test]
fn test_spec_constants_are_collected_not_laid_out() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let width = fx.spec_constant("Width");
    let k = fx.kernel("K").field("w", width).field("n", int).finish();
    let (entries, spec_constants) = layout(&fx, k);
    assert_eq!(entries, vec![entry(ParamKind::StdLayout, 4, 4)]);
    assert_eq!(spec_constants.len(), 1);
    assert_eq!(spec_constants[0].stable_name, "app::Width");
}

#[test]
fn test_unique_spec_constants_sorted_by_name() {
    let mut types = TypeTable::new();
    let b = types.record("B").in_namespace("app").incomplete().finish();
    let a = types.record("A").in_namespace("app").incomplete().finish();
    let mut table = IntegrationTable::new();
    assert!(table.is_empty());
    for (name, id_type) in [("app::B", b), ("app::A", a), ("app::B", b)] {
        table.add_spec_constant(SpecConstant {
            stable_name: name.to_string(),
            id_type,
        });
    }
    let unique: Vec<&str> = table
        .unique_spec_constants()
        .iter()
        .map(|s| s.stable_name.as_str())
        .collect();
    assert_eq!(unique, vec!["app::A", "app::B"]);
}

fn descriptor(name: &str, name_type: TyId, entries: Vec<LayoutEntry>) -> KernelDescriptor {
    KernelDescriptor {
        name: name.to_string(),
        stable_name: String::new(),
        display_name: String::new(),
        name_type,
        span: Span::dummy(),
        is_simd: false,
        calls_this_item: false,
        entries,
    }
}

#[test]
fn test_header_snapshot() {
    let mut types = TypeTable::new();
    let kernel_name = types
        .record("MyKernel")
        .kind(RecordKind::Class)
        .in_namespace("app")
        .incomplete()
        .finish();
    let width = types
        .record("Width")
        .kind(RecordKind::Class)
        .in_namespace("app")
        .incomplete()
        .finish();

    let mut table = IntegrationTable::new();
    table.add_spec_constant(SpecConstant {
        stable_name: "app::Width".to_string(),
        id_type: width,
    });
    table.add_kernel(KernelDescriptor {
        calls_this_item: true,
        ..descriptor(
            "_ZTSapp_MyKernel",
            kernel_name,
            vec![
                entry(ParamKind::StdLayout, 4, 0),
                entry(ParamKind::Accessor, 4062, 8),
            ],
        )
    });

    insta::assert_snapshot!(render_header(&table, &types, false), @r#"
// This is auto-generated kernel integration header.

#include <CL/sycl/detail/defines_elementary.hpp>
#include <CL/sycl/detail/kernel_desc.hpp>

// Forward declarations of spec constant ID types:
namespace app { class Width; }

// Specialization constants IDs:
template <> struct sycl::detail::SpecConstantInfo<app::Width> {
  static constexpr const char* getName() {
    return "app::Width";
  }
};
// Forward declarations of kernel name types:
namespace app { class MyKernel; }

__SYCL_INLINE_NAMESPACE(cl) {
namespace sycl {
namespace detail {

// names of all kernels defined in the corresponding source
static constexpr
const char* const kernel_names[] = {
  "_ZTSapp_MyKernel"
};

// array representing signatures of all kernels defined in the
// corresponding source
static constexpr
const kernel_param_desc_t kernel_signatures[] = {
  //--- _ZTSapp_MyKernel
  { kernel_param_kind_t::kind_std_layout, 4, 0 },
  { kernel_param_kind_t::kind_accessor, 4062, 8 },

};

// Specializations of KernelInfo for kernel function types:
template <> struct KernelInfo<app::MyKernel> {
  __SYCL_DLL_LOCAL
  static constexpr const char* getName() { return "_ZTSapp_MyKernel"; }
  __SYCL_DLL_LOCAL
  static constexpr unsigned getNumParams() { return 2; }
  __SYCL_DLL_LOCAL
  static constexpr const kernel_param_desc_t& getParamDesc(unsigned i) {
    return kernel_signatures[i+0];
  }
  __SYCL_DLL_LOCAL
  static constexpr bool isESIMD() { return 0; }
  __SYCL_DLL_LOCAL
  static constexpr bool callsThisItem() { return 1; }
};

} // namespace detail
} // namespace sycl
} // __SYCL_INLINE_NAMESPACE(cl)
"#);
}

#[test]
fn test_header_offsets_accumulate_across_kernels() {
    let mut types = TypeTable::new();
    let first = types.record("First").in_namespace("app").incomplete().finish();
    let second = types.record("Second").in_namespace("app").incomplete().finish();
    let mut table = IntegrationTable::new();
    table.add_kernel(descriptor(
        "first",
        first,
        vec![entry(ParamKind::StdLayout, 4, 0), entry(ParamKind::Pointer, 8, 8)],
    ));
    table.add_kernel(descriptor("second", second, vec![entry(ParamKind::StdLayout, 4, 0)]));
    let header = render_header(&table, &types, false);
    assert!(header.contains("  \"first\",\n  \"second\"\n};"));
    assert!(header.contains("return kernel_signatures[i+0];"));
    assert!(header.contains("return kernel_signatures[i+2];"));
    assert!(header.contains("namespace app { struct First; }"));
}

#[test]
fn test_header_with_stable_names() {
    let mut types = TypeTable::new();
    let k = types.record("K").in_namespace("app").incomplete().finish();
    let mut table = IntegrationTable::new();
    table.add_kernel(KernelDescriptor {
        stable_name: "app::K".to_string(),
        ..descriptor("_ZTSapp_K", k, Vec::new())
    });
    let header = render_header(&table, &types, true);
    assert!(header.contains("template <> struct KernelInfoData<'a', 'p', 'p', ':', ':', 'K'> {"));
    assert!(!header.contains("Forward declarations of kernel name types"));
    assert!(!header.contains("KernelInfo<app::K>"));
}

#[test]
fn test_forward_declarations_follow_template_arguments() {
    let mut types = TypeTable::new();
    let int = types.scalar(Scalar::I32);
    let id = types
        .record("Id")
        .kind(RecordKind::Class)
        .in_namespace("app")
        .incomplete()
        .finish();
    let local = types
        .record("Local")
        .in_namespace("app")
        .in_context(crate::types::DeclContext::Function("main".to_string()))
        .incomplete()
        .finish();
    let generic = types
        .record("Kern")
        .in_namespace("ns")
        .template(vec![
            TemplateArg::Type(id),
            TemplateArg::Type(int),
            TemplateArg::Type(id),
        ])
        .incomplete()
        .finish();
    let mut table = IntegrationTable::new();
    table.add_kernel(descriptor("a", generic, Vec::new()));
    table.add_kernel(descriptor("b", local, Vec::new()));
    let header = render_header(&table, &types, false);
    assert_eq!(header.matches("namespace app { class Id; }").count(), 1);
    assert!(!header.contains("struct Kern;"));
    assert!(!header.contains("Local;"));
    assert!(header.contains("template <> struct KernelInfo<ns::Kern<app::Id, int, app::Id>> {"));
}
