use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default byte budget for the flattened kernel argument list.
pub const DEFAULT_KERNEL_ARGS_BUDGET: u64 = 2048;

/// Names of the targets compiled into the binary.
pub const BUILTIN_TARGETS: &[&str] = &["spir64", "spir64_fpga", "nvptx64"];

/// Device target configuration: every target-dependent policy the
/// lowering consults lives here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetConfig {
    /// Short identifier used in CLI and file paths (e.g. "spir64").
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Pointer width in bits (32 or 64).
    pub pointer_width: u32,
    /// Byte budget for the sum of all flattened kernel parameters.
    /// Exceeding it is a warning, never an error.
    pub max_kernel_args_size: u64,
    /// Whether `__float128` has native device support.
    pub has_float128: bool,
    /// Whether indirect calls through function pointers are allowed
    /// in device code.
    pub allow_function_pointers: bool,
    /// Name kernels by the unique stable name of their name type instead
    /// of its mangled name, and skip kernel-name checks.
    pub unnamed_lambda: bool,
    /// Require every by-value kernel parameter type to be standard layout.
    pub std_layout_kernel_params: bool,
}

impl TargetConfig {
    /// Generic SPIR-V 64-bit device.
    pub fn spir64() -> Self {
        Self {
            name: "spir64".to_string(),
            display_name: "SPIR-V 64-bit".to_string(),
            pointer_width: 64,
            max_kernel_args_size: DEFAULT_KERNEL_ARGS_BUDGET,
            has_float128: true,
            allow_function_pointers: false,
            unnamed_lambda: false,
            std_layout_kernel_params: false,
        }
    }

    /// FPGA flavour of SPIR-V: larger argument budget.
    pub fn spir64_fpga() -> Self {
        Self {
            name: "spir64_fpga".to_string(),
            display_name: "SPIR-V 64-bit (FPGA)".to_string(),
            max_kernel_args_size: 4096,
            ..Self::spir64()
        }
    }

    pub fn nvptx64() -> Self {
        Self {
            name: "nvptx64".to_string(),
            display_name: "NVPTX 64-bit".to_string(),
            max_kernel_args_size: 4096,
            has_float128: false,
            ..Self::spir64()
        }
    }

    /// Pointer size in bytes.
    pub fn pointer_size(&self) -> u64 {
        u64::from(self.pointer_width / 8)
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "spir64" => Some(Self::spir64()),
            "spir64_fpga" => Some(Self::spir64_fpga()),
            "nvptx64" => Some(Self::nvptx64()),
            _ => None,
        }
    }

    /// Load a target configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse_json(&content, &path.display().to_string())
    }

    /// Resolve a target by name: built-ins first, then `targets/{name}.json`
    /// relative to the binary or the working directory.
    pub fn resolve(name: &str) -> Result<Self> {
        // Reject path traversal
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(Error::InvalidTargetName(name.to_string()));
        }

        if let Some(config) = Self::builtin(name) {
            return Ok(config);
        }

        let relative = PathBuf::from("targets").join(format!("{}.json", name));

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                for base in dir.ancestors().take(3) {
                    let path = base.join(&relative);
                    if path.exists() {
                        return Self::load(&path);
                    }
                }
            }
        }

        if relative.exists() {
            return Self::load(&relative);
        }

        Err(Error::UnknownTarget {
            name: name.to_string(),
            looked_for: relative.display().to_string(),
        })
    }

    pub fn parse_json(content: &str, origin: &str) -> Result<Self> {
        let raw: RawTarget =
            serde_json::from_str(content).map_err(|e| Error::json(origin, e))?;
        let err = |message: String| Error::TargetConfig {
            origin: origin.to_string(),
            message,
        };

        if raw.target.name.is_empty() {
            return Err(err("target.name must not be empty".to_string()));
        }
        if !matches!(raw.abi.pointer_width, 32 | 64) {
            return Err(err(format!(
                "abi.pointer_width must be 32 or 64, got {}",
                raw.abi.pointer_width
            )));
        }

        Ok(Self {
            display_name: raw
                .target
                .display_name
                .unwrap_or_else(|| raw.target.name.clone()),
            name: raw.target.name,
            pointer_width: raw.abi.pointer_width,
            max_kernel_args_size: raw.abi.max_kernel_args_size,
            has_float128: raw.features.float128,
            allow_function_pointers: raw.features.function_pointers,
            unnamed_lambda: raw.features.unnamed_lambda,
            std_layout_kernel_params: raw.features.std_layout_kernel_params,
        })
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::spir64()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    target: RawIdent,
    #[serde(default)]
    abi: RawAbi,
    #[serde(default)]
    features: RawFeatures,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIdent {
    name: String,
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawAbi {
    pointer_width: u32,
    max_kernel_args_size: u64,
}

impl Default for RawAbi {
    fn default() -> Self {
        Self {
            pointer_width: 64,
            max_kernel_args_size: DEFAULT_KERNEL_ARGS_BUDGET,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawFeatures {
    float128: bool,
    function_pointers: bool,
    unnamed_lambda: bool,
    std_layout_kernel_params: bool,
}

impl Default for RawFeatures {
    fn default() -> Self {
        Self {
            float128: true,
            function_pointers: false,
            unnamed_lambda: false,
            std_layout_kernel_params: false,
        }
    }
}
