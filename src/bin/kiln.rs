//! `kiln` — the runtime driver: `build` compiles a source file to
//! disassembled bytecode, `run` compiles and executes it on the stack VM
//! (or walks the AST directly under the legacy `-i` flag), `repl` starts a
//! line-at-a-time session that keeps one VM's globals and call table alive
//! across lines, the way a shell keeps its environment alive across
//! commands. A bare invocation with no subcommand falls back to the legacy
//! single-flag dispatch (`-c | -v | -i | -O | -b`), the way `kotha`'s own
//! driver accepts both a modern subcommand and its older flag-only form.

use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln::back::codegen::{self, SlotTable};
use kiln::back::vm::Vm;
use kiln::error::ToolchainError;
use kiln::front::{lower, parse};
use kiln::interp::Interpreter;

#[derive(Debug, Parser)]
#[command(version, about = "run a kiln program", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// The input file, used only in legacy flag mode (no subcommand given).
    file: Option<String>,
    /// Legacy: compile (no native target exists, so this dumps bytecode).
    #[arg(short = 'c', long = "compile")]
    legacy_compile: bool,
    /// Legacy: run via the bytecode VM.
    #[arg(short = 'v', long = "vm")]
    legacy_vm: bool,
    /// Legacy: walk the AST directly instead of compiling to bytecode.
    #[arg(short = 'i', long = "interpret")]
    legacy_interpret: bool,
    /// Legacy: show "optimizations" — there's no peephole optimizer in this
    /// crate (an out-of-scope external collaborator), so this dumps IR.
    #[arg(short = 'O', long = "optimize")]
    legacy_optimize: bool,
    /// Legacy: show disassembled bytecode.
    #[arg(short = 'b', long = "bytecode")]
    legacy_bytecode: bool,

    /// Print every instruction as it executes.
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile a file to disassembled bytecode.
    Build {
        file: String,
        /// Write output to FILE instead of stdout.
        #[arg(short = 'o', long)]
        output: Option<String>,
        /// Accepted for contract compatibility; this crate has only one
        /// execution target (the bytecode VM), so it's a no-op.
        #[arg(long)]
        vm: bool,
    },
    /// Compile and run a file.
    Run {
        file: String,
        /// Accepted for contract compatibility; `run` always uses the VM
        /// unless the legacy `-i` flag asked for the interpreter.
        #[arg(long)]
        vm: bool,
    },
    /// Start an interactive line-at-a-time session.
    Repl,
    /// Print usage information.
    Help,
    /// Print version information.
    Version,
}

fn install_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("kiln=trace")
    } else {
        EnvFilter::new("kiln=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn print_usage() {
    println!("kiln — a toy compiler/VM toolchain\n");
    println!("Usage:\n  kiln <command> [options] [file]\n");
    println!("Commands:");
    println!("  build <file>     Compile a kiln file to disassembled bytecode");
    println!("  run <file>       Compile and run a kiln file");
    println!("  repl             Start an interactive session");
    println!("  help             Show this help message");
    println!("  version          Show version information\n");
    println!("Build Options:\n  -o <file>        Write output to file\n  --vm             No-op (only one execution target exists)\n");
    println!("Run Options:\n  --vm             No-op (run always uses the VM)\n  --debug          Enable per-instruction trace logging\n");
    println!("Legacy Options (deprecated):");
    println!("  -c, --compile    Dump bytecode (no native compile target)");
    println!("  -v, --vm         Run in the VM");
    println!("  -i, --interpret  Direct interpretation");
    println!("  -O, --optimize   Dump IR (no optimizer in this crate)");
    println!("  -b, --bytecode   Show bytecode");
}

fn print_version() {
    println!("kiln {}", env!("CARGO_PKG_VERSION"));
}

fn dump_bytecode(ast: kiln::front::ast::Program) -> Result<String, ToolchainError> {
    let ir = lower(ast);
    let vm = codegen::generate(&ir)?;
    let mut out = String::new();
    for (addr, instr) in vm.code.iter().enumerate() {
        out.push_str(&format!("{addr:>5}  {instr}\n"));
    }
    Ok(out)
}

fn dump_ir(ast: kiln::front::ast::Program) -> String {
    format!("{}", lower(ast))
}

fn write_output(text: &str, output: Option<&str>) -> ExitCode {
    match output {
        Some(path) => match std::fs::write(path, text) {
            Ok(()) => ExitCode::from(0),
            Err(e) => {
                eprintln!("kiln: {e}");
                ExitCode::from(1)
            }
        },
        None => {
            print!("{text}");
            ExitCode::from(0)
        }
    }
}

fn cmd_build(file: &str, output: Option<&str>) -> ExitCode {
    let result = std::fs::read_to_string(file)
        .map_err(ToolchainError::from)
        .and_then(|input| parse(&input).map_err(ToolchainError::from))
        .and_then(dump_bytecode);
    match result {
        Ok(text) => write_output(&text, output),
        Err(e) => {
            eprintln!("kiln: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run_file(path: &str, interp: bool, debug: bool) -> Result<(), ToolchainError> {
    let input = std::fs::read_to_string(path)?;
    if interp {
        let ast = parse(&input)?;
        let mut interpreter = Interpreter::new();
        interpreter.run(&ast)?;
    } else {
        let ast = parse(&input)?;
        let ir = lower(ast);
        let mut vm = codegen::generate(&ir)?;
        vm.debug = debug;
        vm.run()?;
    }
    Ok(())
}

fn cmd_run(file: &str, interp: bool, debug: bool) -> ExitCode {
    match run_file(file, interp, debug) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("kiln: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// A line-at-a-time REPL. Each line is parsed and lowered as its own
/// self-contained program, then its bytecode is appended to one `Vm` that
/// lives for the whole session: `codegen::append` predicts addresses from
/// the VM's current code length rather than from zero, so the new
/// instructions' jump targets and function-table ids are already correct
/// in place, and earlier top-level locals stay live because `slots` is
/// never reset except at a function boundary.
fn repl(debug: bool) {
    let mut vm = Vm::new();
    vm.debug = debug;
    let mut slots = SlotTable::default();
    println!("kiln repl — ctrl-d to exit");
    loop {
        print!("kiln> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        match parse(&line) {
            Ok(ast) => {
                let ir = lower(ast);
                let start = vm.code.len();
                match codegen::append(&mut vm, &mut slots, &ir) {
                    Ok(()) => {
                        vm.goto(start);
                        if let Err(e) = vm.run() {
                            eprintln!("kiln: {e}");
                        }
                    }
                    Err(e) => eprintln!("kiln: {e}"),
                }
            }
            Err(e) => eprintln!("kiln: {e}"),
        }
    }
}

/// Dispatch for the older, flag-only form (`kiln -v file.kiln`, etc), kept
/// alongside the subcommand form the way `kotha`'s own driver keeps both —
/// whichever single mode flag was passed wins, legacy-optimize and
/// legacy-compile falling back to an IR/bytecode dump since this crate has
/// no optimizer or native compile target to run instead.
fn legacy_dispatch(cli: &Cli) -> ExitCode {
    let Some(file) = cli.file.as_deref() else {
        eprintln!("kiln: no input file specified");
        print_usage();
        return ExitCode::from(1);
    };
    if cli.legacy_bytecode {
        return cmd_build(file, None);
    }
    if cli.legacy_interpret {
        return cmd_run(file, true, cli.debug);
    }
    if cli.legacy_optimize {
        let result = std::fs::read_to_string(file)
            .map_err(ToolchainError::from)
            .and_then(|input| parse(&input).map_err(ToolchainError::from));
        return match result {
            Ok(ast) => write_output(&dump_ir(ast), None),
            Err(e) => {
                eprintln!("kiln: {e}");
                ExitCode::from(e.exit_code() as u8)
            }
        };
    }
    if cli.legacy_vm {
        return cmd_run(file, false, cli.debug);
    }
    // `-c`/`--compile`, and no mode flag at all, both land here: `kotha`'s
    // own default (`MODE_COMPILE_C`) compiles without running, which this
    // crate has no native target for, so the closest equivalent is
    // compiling to disassembled bytecode and stopping there.
    cmd_build(file, None)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_tracing(cli.debug);

    match &cli.command {
        Some(Command::Build { file, output, vm: _ }) => cmd_build(file, output.as_deref()),
        Some(Command::Run { file, vm: _ }) => cmd_run(file, false, cli.debug),
        Some(Command::Repl) => {
            repl(cli.debug);
            ExitCode::from(0)
        }
        Some(Command::Help) => {
            print_usage();
            ExitCode::from(0)
        }
        Some(Command::Version) => {
            print_version();
            ExitCode::from(0)
        }
        None => legacy_dispatch(&cli),
    }
}
