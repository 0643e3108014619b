//! Miniature resource library shared by unit tests.

use std::collections::BTreeMap;

use crate::config::TargetConfig;
use crate::types::builder::RecordBuilder;
use crate::types::classify::Classifier;
use crate::types::{AddrSpace, DeclContext, RecordKind, Scalar, TemplateArg, TyId, TypeTable};

pub(crate) const GLOBAL_BUFFER: i64 = 2014;
pub(crate) const READ_WRITE: i64 = 1026;

pub(crate) struct Fixture {
    pub types: TypeTable,
    pub classifier: Classifier,
    pub target: TargetConfig,
    pub int: TyId,
    pub float: TyId,
    pub sampler: TyId,
    pub stream: TyId,
    pub half: TyId,
    ranges: BTreeMap<(&'static str, i64), TyId>,
}

fn sycl(builder: RecordBuilder<'_>) -> RecordBuilder<'_> {
    builder.in_namespace("cl").in_namespace("sycl")
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_target(TargetConfig::spir64())
    }

    pub fn with_target(target: TargetConfig) -> Self {
        let mut types = TypeTable::with_pointer_size(target.pointer_size());
        let int = types.scalar(Scalar::I32);
        let float = types.scalar(Scalar::F32);

        let f16 = types.scalar(Scalar::F16);
        let half = types
            .record("half")
            .kind(RecordKind::Class)
            .in_namespace("cl")
            .in_namespace("sycl")
            .in_namespace("detail")
            .in_namespace("half_impl")
            .field("Data", f16)
            .finish();

        let raw_sampler = types.opaque("__ocl_sampler_t");
        let sampler_ptr = types.pointer(raw_sampler, AddrSpace::Constant);
        let sampler = sycl(types.record("sampler").kind(RecordKind::Class))
            .field("m_Sampler", sampler_ptr)
            .method("__init", vec![sampler_ptr])
            .finish();

        let mut fx = Self {
            types,
            classifier: Classifier::new(&target),
            target,
            int,
            float,
            sampler,
            stream: int,
            half,
            ranges: BTreeMap::new(),
        };

        let buf = fx.accessor(Scalar::I8, 1);
        let offsets = fx.accessor(Scalar::U32, 1);
        let size = fx.types.scalar(Scalar::U64);
        fx.stream = sycl(fx.types.record("stream").kind(RecordKind::Class))
            .field("GlobalBuf", buf)
            .field("GlobalOffset", offsets)
            .field("GlobalFlushBuf", buf)
            .field("FlushBufferSize", size)
            .method("__init", Vec::new())
            .method("__finalize", Vec::new())
            .finish();
        fx
    }

    fn dims_record(&mut self, name: &'static str, dims: i64) -> TyId {
        if let Some(&ty) = self.ranges.get(&(name, dims)) {
            return ty;
        }
        let size = self.types.scalar(Scalar::U64);
        let arr = self.types.array(size, dims as u64);
        let ty = sycl(self.types.record(name).kind(RecordKind::Class))
            .template(vec![TemplateArg::Integral(dims)])
            .field("common_array", arr)
            .finish();
        self.ranges.insert((name, dims), ty);
        ty
    }

    pub fn range(&mut self, dims: i64) -> TyId {
        self.dims_record("range", dims)
    }

    pub fn id(&mut self, dims: i64) -> TyId {
        self.dims_record("id", dims)
    }

    pub fn accessor(&mut self, elem: Scalar, dims: i64) -> TyId {
        self.accessor_with(elem, dims, GLOBAL_BUFFER, None)
    }

    /// `accessor<elem, dims, read_write, target, false[, props]>` with
    /// `__init(elem __global *, range, range, id)` and
    /// `__init_esimd(elem __global *)`.
    pub fn accessor_with(
        &mut self,
        elem: Scalar,
        dims: i64,
        target: i64,
        props: Option<TyId>,
    ) -> TyId {
        let elem_ty = self.types.scalar(elem);
        let ptr = self.types.pointer(elem_ty, AddrSpace::Global);
        let range = self.range(dims);
        let id = self.id(dims);
        let mut args = vec![
            TemplateArg::Type(elem_ty),
            TemplateArg::Integral(dims),
            TemplateArg::Integral(READ_WRITE),
            TemplateArg::Integral(target),
            TemplateArg::Integral(0),
        ];
        if let Some(props) = props {
            args.push(TemplateArg::Type(props));
        }
        sycl(self.types.record("accessor").kind(RecordKind::Class))
            .template(args)
            .field("MData", ptr)
            .field("AccessRange", range)
            .field("MemRange", range)
            .field("Offset", id)
            .method("__init", vec![ptr, range, range, id])
            .method("__init_esimd", vec![ptr])
            .finish()
    }

    pub fn property_list(&mut self, props: Vec<TyId>) -> TyId {
        let pack = props.into_iter().map(TemplateArg::Type).collect();
        sycl(self.types.record("accessor_property_list").kind(RecordKind::Class))
            .in_namespace("ONEAPI")
            .template(vec![TemplateArg::Pack(pack)])
            .finish()
    }

    pub fn buffer_location(&mut self, location: i64) -> TyId {
        sycl(self.types.record("instance"))
            .in_namespace("INTEL")
            .in_namespace("property")
            .in_context(DeclContext::Record("buffer_location".to_string()))
            .template(vec![TemplateArg::Integral(location)])
            .finish()
    }

    /// `spec_constant<int, app::{id_name}>`.
    pub fn spec_constant(&mut self, id_name: &str) -> TyId {
        let id = self
            .types
            .record(id_name)
            .kind(RecordKind::Class)
            .in_namespace("app")
            .incomplete()
            .finish();
        let int = self.int;
        sycl(self.types.record("spec_constant").kind(RecordKind::Class))
            .in_namespace("ONEAPI")
            .in_namespace("experimental")
            .template(vec![TemplateArg::Type(int), TemplateArg::Type(id)])
            .field("value", int)
            .finish()
    }

    /// A lambda-like kernel object in namespace `app`.
    pub fn kernel(&mut self, name: &str) -> RecordBuilder<'_> {
        self.types
            .record(name)
            .in_namespace("app")
            .lambda(None)
            .call_operator(false)
    }

    /// Forward-declarable kernel name type `app::{name}`.
    pub fn name_type(&mut self, name: &str) -> TyId {
        self.types
            .record(name)
            .kind(RecordKind::Class)
            .in_namespace("app")
            .incomplete()
            .finish()
    }
}
