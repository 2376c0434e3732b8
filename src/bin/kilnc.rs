//! `kilnc` — the compiler driver. Takes a source file and emits whatever
//! stage of the pipeline was asked for: raw tokens, the parsed AST, the
//! three-address IR, or disassembled bytecode.
//!
//! Run with `--help` for the full flag surface.

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use kiln::back::codegen;
use kiln::error::ToolchainError;
use kiln::front::{lex::Lexer, lower, parse};

#[derive(Debug, Parser)]
#[command(version, about = "compile a kiln source file", long_about = None)]
struct Args {
    /// The input source file.
    file: String,
    /// Which stage of the pipeline to print.
    #[arg(value_enum, short, long, default_value_t = Stage::Bytecode)]
    emit: Stage,
    /// Write output to FILE instead of stdout.
    #[arg(short = 'o', long)]
    output: Option<String>,
    /// Enable trace-level logging of the compiler's stages.
    #[arg(short, long)]
    debug: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// The lexer's token stream.
    Tokens,
    /// The parsed AST, pretty-printed with `{:#?}`.
    Ast,
    /// The three-address IR.
    Ir,
    /// Disassembled bytecode (the default).
    Bytecode,
}

fn install_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("kilnc=trace,kiln=trace")
    } else {
        EnvFilter::new("kilnc=warn,kiln=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(args: &Args) -> Result<String, ToolchainError> {
    let input = std::fs::read_to_string(&args.file)?;

    let text = match args.emit {
        Stage::Tokens => {
            let mut lexer = Lexer::new(&input);
            let mut out = String::new();
            loop {
                match lexer.next().map_err(ToolchainError::Lex)? {
                    Some(tok) => out.push_str(&format!("{tok}\n")),
                    None => break,
                }
            }
            out
        }
        Stage::Ast => {
            let ast = parse(&input)?;
            format!("{ast:#?}\n")
        }
        Stage::Ir => {
            let ast = parse(&input)?;
            let ir = lower(ast);
            format!("{ir}")
        }
        Stage::Bytecode => {
            let ast = parse(&input)?;
            let ir = lower(ast);
            let vm = codegen::generate(&ir)?;
            let mut out = String::new();
            for (addr, instr) in vm.code.iter().enumerate() {
                out.push_str(&format!("{addr:>5}  {instr}\n"));
            }
            out
        }
    };
    Ok(text)
}

fn main() -> ExitCode {
    let args = Args::parse();
    install_tracing(args.debug);

    match run(&args) {
        Ok(text) => {
            match &args.output {
                Some(path) => {
                    if let Err(e) = std::fs::write(path, text) {
                        eprintln!("kilnc: {e}");
                        return ExitCode::from(1);
                    }
                }
                None => print!("{text}"),
            }
            ExitCode::from(0)
        }
        Err(e) => {
            eprintln!("kilnc: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
