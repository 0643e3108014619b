use super::*;
use crate::callgraph::attrs::KernelAttr;
use crate::callgraph::{CallSite, Callee, FunctionDecl, Redecl};
use crate::diagnostic::DiagKind;
use crate::error::Error;
use crate::fixtures::Fixture;
use crate::span::Spanned;
use crate::types::{AddrSpace, DeclContext, RecordKind, Scalar};

fn launch(name_type: TyId, kernel_object: TyId) -> LaunchSite {
    LaunchSite {
        name_type,
        kernel_object,
        body: None,
        kind: InvocationKind::ParallelFor,
        span: Span::new(0, 10, 20),
    }
}

fn call(table: &mut FunctionTable, from: FnId, to: FnId) {
    table.get_mut(from).calls.push(CallSite {
        callee: Callee::Direct(to),
        span: Span::dummy(),
        constexpr: false,
    });
}

// --- driver ---

#[test]
fn test_lower_single_kernel() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let acc = fx.accessor(Scalar::I32, 1);
    let k = fx.kernel("K").field("n", int).field("acc", acc).finish();
    let name = fx.name_type("Name");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[launch(name, k)]);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(output.kernels.len(), 1);
    let kernel = &output.kernels[0];
    assert!(kernel.name.starts_with("_ZTSapp_Name_"));
    assert_eq!(kernel.params.len(), 5);
    assert!(!kernel.simd);

    let desc = &output.table.kernels()[0];
    assert_eq!(desc.name, kernel.name);
    assert_eq!(desc.stable_name, "app::Name");
    assert_eq!(desc.display_name, "app::Name");
    assert_eq!(desc.entries.len(), 2);
    assert!(!desc.calls_this_item);
}

#[test]
fn test_invalid_kernel_object_stops_lowering() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let u = fx.types.union("U").field("n", int).finish();
    let name = fx.name_type("Name");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[launch(name, u), launch(name, int)]);
    assert!(output.has_errors());
    assert_eq!(output.diagnostics.len(), 2);
    assert!(output.kernels.is_empty());
    assert!(output.table.is_empty());
}

#[test]
fn test_field_errors_suppress_codegen_for_that_kernel_only() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let reference = fx.types.reference(int);
    let bad = fx.kernel("Bad").field("r", reference).finish();
    let good = fx.kernel("Good").field("n", int).finish();
    let bad_name = fx.name_type("BadName");
    let good_name = fx.name_type("GoodName");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[launch(bad_name, bad), launch(good_name, good)]);
    assert_eq!(output.diagnostics.len(), 1);
    assert_eq!(output.kernels.len(), 1);
    assert_eq!(output.table.kernels()[0].display_name, "app::GoodName");

    let checked = compiler.check(&[launch(bad_name, bad), launch(good_name, good)]);
    assert_eq!(checked.len(), 1);
    assert_eq!(checked[0].message, output.diagnostics[0].message);
}

#[test]
fn test_size_budget_skipped_for_rejected_object() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let reference = fx.types.reference(int);
    let big = fx.types.array(int, 600);
    let bad = fx.kernel("Bad").field("r", reference).field("big", big).finish();
    let fat = fx.kernel("Fat").field("big", big).finish();
    let name = fx.name_type("Name");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let diags = compiler.check(&[launch(name, bad)]);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagKind::StructuralViolation);

    let diags = compiler.check(&[launch(name, fat)]);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagKind::SizeBudgetExceeded);
    assert!(!diags[0].is_error());
}

#[test]
fn test_union_of_two_resources_rejected_in_either_order() {
    let mut fx = Fixture::new();
    let acc = fx.accessor(Scalar::I32, 1);
    let smp = fx.sampler;
    let acc_first = fx.types.union("AccFirst").field("a", acc).field("s", smp).finish();
    let smp_first = fx.types.union("SmpFirst").field("s", smp).field("a", acc).finish();
    let k1 = fx.kernel("K1").field("u", acc_first).finish();
    let k2 = fx.kernel("K2").field("u", smp_first).finish();
    let n1 = fx.name_type("N1");
    let n2 = fx.name_type("N2");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let cases = [
        (n1, k1, ["accessor", "sampler"]),
        (n2, k2, ["sampler", "accessor"]),
    ];
    for (name, object, order) in cases {
        let output = compiler.lower(&[launch(name, object)]);
        assert!(output.kernels.is_empty());
        assert!(output.table.is_empty());
        assert_eq!(output.diagnostics.len(), 2);
        for (diag, kind) in output.diagnostics.iter().zip(order) {
            assert_eq!(diag.kind, DiagKind::UnionResourceViolation);
            assert!(diag.message.starts_with(kind), "{}", diag.message);
        }
    }
}

#[test]
fn test_lowering_same_object_twice_is_stable() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let acc = fx.accessor(Scalar::I32, 1);
    let ptr = fx.types.pointer(int, AddrSpace::Global);
    let item = fx.types.record("Item").field("acc", acc).finish();
    let items = fx.types.array(item, 2);
    let holder = fx
        .types
        .record("Holder")
        .field("acc", acc)
        .field("p", ptr)
        .field("items", items)
        .finish();
    let k = fx.kernel("K").field("h", holder).finish();
    let first = fx.name_type("First");
    let second = fx.name_type("Second");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[launch(first, k), launch(second, k)]);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    let flags: Vec<Option<bool>> = [k, holder, items, item]
        .iter()
        .map(|&ty| fx.types.decomposition_flag(ty))
        .collect();
    assert_eq!(flags, vec![Some(true); 4]);

    let again = compiler.lower(&[launch(first, k)]);
    assert!(again.diagnostics.is_empty(), "{:?}", again.diagnostics);
    let descriptors = [
        &output.table.kernels()[0],
        &output.table.kernels()[1],
        &again.table.kernels()[0],
    ];
    // Three accessors and the pointer.
    assert_eq!(descriptors[0].entries.len(), 4);
    for desc in &descriptors[1..] {
        assert_eq!(desc.entries, descriptors[0].entries);
    }
    assert_eq!(output.kernels[1].params, output.kernels[0].params);
    assert_eq!(again.kernels[0].params, output.kernels[0].params);
    assert_eq!(again.kernels[0].body, output.kernels[0].body);

    let after: Vec<Option<bool>> = [k, holder, items, item]
        .iter()
        .map(|&ty| fx.types.decomposition_flag(ty))
        .collect();
    assert_eq!(after, flags);
}

#[test]
fn test_check_marks_decomposition_without_lowering() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let ptr = fx.types.pointer(int, AddrSpace::Global);
    let inner = fx.types.record("Inner").field("p", ptr).finish();
    let k = fx.kernel("K").field("s", inner).finish();
    let name = fx.name_type("Name");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    assert!(compiler.check(&[launch(name, k)]).is_empty());
    assert_eq!(fx.types.decomposition_flag(inner), Some(true));

    let output = compiler.lower(&[launch(name, k)]);
    assert!(output.kernels[0].params[0].ty.is_carrier());
}

#[test]
fn test_std_kernel_name_is_rejected_unless_names_are_unnamed() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let k = fx.kernel("K").field("n", int).finish();
    let std_name = fx
        .types
        .record("Bad")
        .kind(RecordKind::Class)
        .in_namespace("std")
        .incomplete()
        .finish();
    let functions = FunctionTable::new();

    let strict = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());
    let output = strict.lower(&[launch(std_name, k)]);
    assert!(output.has_errors());
    assert!(output.kernels.is_empty());

    let target = TargetConfig {
        unnamed_lambda: true,
        ..TargetConfig::spir64()
    };
    let relaxed = DeviceCompiler::new(&fx.types, &functions, target);
    assert!(relaxed.target().unnamed_lambda);
    let output = relaxed.lower(&[launch(std_name, k)]);
    assert!(output.diagnostics.is_empty());
    assert_eq!(output.kernels[0].name, "std::Bad");
}

#[test]
fn test_call_graph_findings_reported_once_per_unit() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let k = fx.kernel("K").field("n", int).finish();
    let first = fx.name_type("First");
    let second = fx.name_type("Second");
    let mut functions = FunctionTable::new();
    let body = functions.add(FunctionDecl::new("operator()"));
    let helper = functions.add(FunctionDecl::new("helper"));
    call(&mut functions, body, helper);
    call(&mut functions, helper, helper);
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let launches = [
        LaunchSite {
            body: Some(body),
            ..launch(first, k)
        },
        LaunchSite {
            body: Some(body),
            ..launch(second, k)
        },
    ];
    let diagnostics = compiler.check(&launches);
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("recursive"));
}

#[test]
fn test_this_item_only_for_parallel_for() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let k = fx.kernel("K").field("n", int).finish();
    let range_launch = fx.name_type("RangeLaunch");
    let single = fx.name_type("Single");
    let mut functions = FunctionTable::new();
    let body = functions.add(FunctionDecl::new("operator()"));
    let this_item = functions.add(FunctionDecl {
        scope: vec![
            DeclContext::Namespace("cl".to_string()),
            DeclContext::Namespace("sycl".to_string()),
        ],
        builtin: true,
        ..FunctionDecl::new("this_item")
    });
    call(&mut functions, body, this_item);
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[
        LaunchSite {
            body: Some(body),
            ..launch(range_launch, k)
        },
        LaunchSite {
            body: Some(body),
            kind: InvocationKind::SingleTask,
            ..launch(single, k)
        },
    ]);
    let flags: Vec<bool> = output
        .table
        .kernels()
        .iter()
        .map(|d| d.calls_this_item)
        .collect();
    assert_eq!(flags, vec![true, false]);
}

#[test]
fn test_attributes_reach_the_kernel() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let k = fx.kernel("K").field("n", int).finish();
    let name = fx.name_type("Name");
    let mut functions = FunctionTable::new();
    let body = functions.add(FunctionDecl::new("operator()"));
    let mut helper = FunctionDecl::new("helper");
    helper.redecls.push(Redecl {
        span: Span::dummy(),
        attrs: vec![Spanned::dummy(KernelAttr::ReqdWorkGroupSize([8, 8, 1]))],
    });
    let helper = functions.add(helper);
    call(&mut functions, body, helper);
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[LaunchSite {
        body: Some(body),
        ..launch(name, k)
    }]);
    let attrs: Vec<&KernelAttr> = output.kernels[0].attrs.iter().map(|a| &a.node).collect();
    assert_eq!(attrs, vec![&KernelAttr::ReqdWorkGroupSize([8, 8, 1])]);
}

#[test]
fn test_simd_call_operator_makes_a_simd_kernel() {
    let mut fx = Fixture::new();
    let acc = fx.accessor(Scalar::F32, 1);
    let k = fx
        .types
        .record("K")
        .in_namespace("app")
        .lambda(None)
        .call_operator(true)
        .field("acc", acc)
        .finish();
    let name = fx.name_type("Name");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[launch(name, k)]);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert!(output.kernels[0].simd);
    assert_eq!(output.kernels[0].params.len(), 1);
    assert!(output.table.kernels()[0].is_simd);
}

#[test]
fn test_spec_constants_reach_the_table() {
    let mut fx = Fixture::new();
    let width = fx.spec_constant("Width");
    let k = fx.kernel("K").field("w", width).finish();
    let name = fx.name_type("Name");
    let functions = FunctionTable::new();
    let compiler = DeviceCompiler::new(&fx.types, &functions, fx.target.clone());

    let output = compiler.lower(&[launch(name, k)]);
    assert!(output.kernels[0].params.is_empty());
    let spec: Vec<&str> = output
        .table
        .unique_spec_constants()
        .iter()
        .map(|s| s.stable_name.as_str())
        .collect();
    assert_eq!(spec, vec!["app::Width"]);
}

struct FixedNames;

impl NameOracle for FixedNames {
    fn mangled_name(&self, _: &TypeTable, _: TyId) -> String {
        "kernel_0".to_string()
    }

    fn stable_name(&self, types: &TypeTable, ty: TyId) -> String {
        format!("stable:{}", types.display(ty))
    }
}

#[test]
fn test_custom_name_oracle() {
    let mut fx = Fixture::new();
    let int = fx.int;
    let k = fx.kernel("K").field("n", int).finish();
    let name = fx.name_type("Name");
    let functions = FunctionTable::new();
    let compiler =
        DeviceCompiler::new(&fx.types, &functions, fx.target.clone()).with_names(FixedNames);

    let output = compiler.lower(&[launch(name, k)]);
    assert_eq!(output.kernels[0].name, "kernel_0");
    assert_eq!(output.table.kernels()[0].stable_name, "stable:app::Name");
}

// --- unit descriptions ---

const MINIMAL: &str = r#"{
  "source": "main.cpp",
  "records": [
    { "id": "K", "name": "K", "scope": [{ "namespace": "app" }],
      "lambda": {}, "fields": [{ "name": "n", "ty": { "scalar": "i32" } }],
      "methods": [{ "name": "operator()", "call_operator": true }] }
  ],
  "functions": [{ "id": "body", "name": "operator()" }],
  "launches": [{ "name": { "record": "K" }, "object": { "record": "K" },
                 "body": "body", "kind": "parallel_for",
                 "span": { "start": 4, "end": 9 } }]
}"#;

fn load(json: &str) -> Unit {
    match Unit::from_json(json, "test.json", &TargetConfig::spir64()) {
        Ok(unit) => unit,
        Err(e) => panic!("unit failed to load: {}", e),
    }
}

fn load_error(json: &str) -> String {
    match Unit::from_json(json, "test.json", &TargetConfig::spir64()) {
        Ok(_) => panic!("unit loaded"),
        Err(e) => e.to_string(),
    }
}

#[test]
fn test_load_minimal_unit() {
    let unit = load(MINIMAL);
    assert_eq!(unit.source_file.as_deref(), Some("main.cpp"));
    let k = unit.record("K").unwrap();
    assert_eq!(unit.types.display(k), "app::(lambda)");
    assert_eq!(unit.launches.len(), 1);
    assert_eq!(unit.launches[0].kind, InvocationKind::ParallelFor);
    assert_eq!(unit.launches[0].body, unit.function("body"));
    assert_eq!(unit.launches[0].span, Span::new(0, 4, 9));

    let output = DeviceCompiler::for_unit(&unit, TargetConfig::spir64()).lower(&unit.launches);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(output.kernels.len(), 1);
    assert_eq!(output.kernels[0].params.len(), 1);
}

#[test]
fn test_records_defined_in_dependency_order() {
    let unit = load(
        r#"{ "records": [
            { "id": "Outer", "name": "Outer", "fields": [
                { "name": "x", "ty": { "scalar": "i8" } },
                { "name": "arr", "ty": { "array": { "of": { "record": "Inner" }, "len": 2 } } } ] },
            { "id": "Inner", "name": "Inner", "fields": [
                { "name": "d", "ty": { "scalar": "f64" } } ] },
            { "id": "Node", "name": "Node", "fields": [
                { "name": "next", "ty": { "pointer": { "to": { "record": "Node" } } } } ] }
        ] }"#,
    );
    let outer = unit.record("Outer").unwrap();
    let node = unit.record("Node").unwrap();
    assert_eq!(unit.types.size_of(outer), 24);
    assert_eq!(unit.types.size_of(node), 8);
}

#[test]
fn test_function_attributes_and_calls() {
    let unit = load(
        r#"{ "functions": [
            { "id": "body", "name": "operator()",
              "attrs": [{ "name": "intel::reqd_sub_group_size", "args": [8] }],
              "redecls": [{ "attrs": [{ "name": "intel::kernel_args_restrict" }] }],
              "calls": [{ "callee": { "direct": "f" } }, { "callee": "indirect" }],
              "rtti": [{ "kind": "typeid", "constexpr": true }] },
            { "id": "f", "name": "f", "defined": false, "external": true }
        ] }"#,
    );
    let body = unit.functions.get(unit.function("body").unwrap());
    assert_eq!(body.redecls.len(), 2);
    assert_eq!(body.redecls[0].attrs[0].node, KernelAttr::ReqdSubGroupSize(8));
    assert_eq!(body.redecls[1].attrs[0].node, KernelAttr::KernelArgsRestrict);
    assert_eq!(body.calls.len(), 2);
    assert_eq!(body.calls[1].callee, Callee::Indirect);
    assert!(body.rtti[0].constexpr);
    let f = unit.functions.get(unit.function("f").unwrap());
    assert!(!f.defined && f.external);
}

#[test]
fn test_unit_errors() {
    assert_eq!(
        load_error(r#"{ "records": [{ "id": "A", "fields": [{ "ty": { "record": "Missing" } }] }] }"#),
        "invalid unit description: unknown record 'Missing'"
    );
    assert_eq!(
        load_error(r#"{ "records": [{ "id": "A", "fields": [{ "ty": { "record": "A" } }] }] }"#),
        "invalid unit description: record 'A' contains itself by value"
    );
    assert_eq!(
        load_error(r#"{ "records": [{ "id": "A" }, { "id": "A" }] }"#),
        "invalid unit description: duplicate record id 'A'"
    );
    assert_eq!(
        load_error(r#"{ "functions": [{ "id": "f", "name": "f", "calls": [{ "callee": { "direct": "g" } }] }] }"#),
        "invalid unit description: unknown function 'g'"
    );
    assert_eq!(
        load_error(r#"{ "functions": [{ "id": "f", "name": "f", "attrs": [{ "name": "bogus" }] }] }"#),
        "invalid unit description: function 'f': unknown kernel attribute 'bogus'"
    );
}

#[test]
fn test_oversized_types_are_rejected() {
    let err = load_error(
        r#"{ "records": [{ "id": "A", "fields": [
            { "ty": { "array": { "of": { "scalar": "i64" }, "len": 4611686018427387904 } } } ] }] }"#,
    );
    assert!(err.starts_with("invalid unit description: array of 4611686018427387904 "));
    assert!(err.ends_with("elements is too large"));

    assert_eq!(
        load_error(
            r#"{ "records": [{ "id": "A", "fields": [
                { "ty": { "array": { "of": { "scalar": "i8" }, "len": 9223372036854775808 } } },
                { "ty": { "array": { "of": { "scalar": "i8" }, "len": 9223372036854775808 } } } ] }] }"#,
        ),
        "invalid unit description: record 'A' is too large"
    );
}

#[test]
fn test_unknown_keys_are_rejected() {
    let err = Unit::from_json(r#"{ "recrods": [] }"#, "test.json", &TargetConfig::spir64());
    assert!(matches!(err, Err(Error::Json { .. })));
}
