use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use offload_kernel::config::target::BUILTIN_TARGETS;
use offload_kernel::diagnostic::Diagnostic;
use offload_kernel::logging::{self, LogFormat, LogLevel};
use offload_kernel::{render_header, DeviceCompiler, TargetConfig, Unit};

#[derive(Parser)]
#[command(
    name = "offloadk",
    version,
    about = "Kernel-object decomposition and device entry-point synthesis"
)]
struct Cli {
    /// Log verbosity (overridden by RUST_LOG)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check and lower every launch site of a unit
    Lower {
        /// Unit description (.json)
        input: PathBuf,
        /// Device target (built-in name or targets/<name>.json)
        #[arg(long, default_value = "spir64")]
        target: String,
        /// Write the integration header here (default: stdout)
        #[arg(long, value_name = "PATH")]
        header: Option<PathBuf>,
        /// Print the synthesized kernels
        #[arg(long)]
        dump_kernels: bool,
    },
    /// Run the validity checks only
    Check {
        /// Unit description (.json)
        input: PathBuf,
        /// Device target (built-in name or targets/<name>.json)
        #[arg(long, default_value = "spir64")]
        target: String,
    },
    /// List built-in device targets
    Targets,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level, cli.log_format);

    match cli.command {
        Command::Lower {
            input,
            target,
            header,
            dump_kernels,
        } => cmd_lower(&input, &target, header.as_deref(), dump_kernels),
        Command::Check { input, target } => cmd_check(&input, &target),
        Command::Targets => cmd_targets(),
    }
}

fn load(input: &Path, target: &str) -> (Unit, TargetConfig) {
    let target = match TargetConfig::resolve(target) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    match Unit::load(input, &target) {
        Ok(unit) => (unit, target),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

/// Render against the unit's source file when it can be read, otherwise
/// one line per diagnostic.
fn report(input: &Path, unit: &Unit, diagnostics: &[Diagnostic]) {
    let source = unit.source_file.as_ref().and_then(|name| {
        let path = input.parent().unwrap_or(Path::new(".")).join(name);
        std::fs::read_to_string(path).ok().map(|text| (name, text))
    });
    for diag in diagnostics {
        match &source {
            Some((name, text)) => diag.render(name, text),
            None => eprintln!("{}", diag.render_plain()),
        }
    }
}

fn cmd_lower(input: &Path, target: &str, header: Option<&Path>, dump_kernels: bool) {
    let (unit, target) = load(input, target);
    let stable_names = target.unnamed_lambda;
    let compiler = DeviceCompiler::for_unit(&unit, target);
    let output = compiler.lower(&unit.launches);
    report(input, &unit, &output.diagnostics);
    if output.has_errors() {
        process::exit(1);
    }

    if dump_kernels {
        for kernel in &output.kernels {
            println!("{}", kernel.render(&unit.types));
        }
    }

    let text = render_header(&output.table, &unit.types, stable_names);
    match header {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!(
                "Lowered {} kernel(s) -> {}",
                output.kernels.len(),
                path.display()
            );
        }
        None => print!("{}", text),
    }
}

fn cmd_check(input: &Path, target: &str) {
    let (unit, target) = load(input, target);
    let compiler = DeviceCompiler::for_unit(&unit, target);
    let diagnostics = compiler.check(&unit.launches);
    report(input, &unit, &diagnostics);
    if diagnostics.iter().any(Diagnostic::is_error) {
        process::exit(1);
    }
    eprintln!("OK: {}", input.display());
}

fn cmd_targets() {
    for name in BUILTIN_TARGETS {
        if let Some(t) = TargetConfig::builtin(name) {
            println!(
                "{:<12} {} (pointer width {}, argument budget {} bytes)",
                t.name, t.display_name, t.pointer_width, t.max_kernel_args_size
            );
        }
    }
}
