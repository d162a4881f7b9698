//! lemonc - lemonscript opcode optimizer and disassembler

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use lemonc::bytecode::compile::assign_opcode_flags;
use lemonc::bytecode::disasm::Disassembler;
use lemonc::bytecode::optimize::{self, OptimizerWorkspace};
use lemonc::bytecode::{ScriptFunction, verify};
use lemonc::config::CompileOptions;

#[derive(Parser)]
#[command(name = "lemonc", about = "Lemonscript opcode tools", version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize a script function and verify the result
    Optimize {
        /// Script function, postcard encoded or `.toml`
        input: PathBuf,

        /// Write the optimized function here (postcard)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compile options file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the opcode listing of a script function
    Disasm {
        input: PathBuf,

        #[arg(long)]
        no_color: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "lemonc=debug" } else { "lemonc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let result = match cli.command {
        Command::Optimize { input, output, config } => run_optimize(&input, output.as_deref(), config.as_deref()),
        Command::Disasm { input, no_color } => run_disasm(&input, no_color),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_optimize(input: &Path, output: Option<&Path>, config: Option<&Path>) -> Result<(), String> {
    let options = match config {
        Some(path) => CompileOptions::load(path).map_err(|e| e.to_string())?,
        None => CompileOptions::default(),
    };
    let mut function = read_function(input)?;

    if options.optimize {
        let mut workspace = OptimizerWorkspace::new();
        let stats = optimize::optimize_function(&mut function, &mut workspace, options.max_optimizer_rounds)
            .map_err(|e| e.to_string())?;
        if options.verify {
            verify::verify_optimized(&function.opcodes, &function.labels).map_err(|e| e.to_string())?;
        }
        println!(
            "{}: {} -> {} opcodes in {} rounds",
            input.display(),
            stats.opcodes_before,
            stats.opcodes_after,
            stats.rounds
        );
        println!(
            "  peephole {}, jumps shortened {}, branches folded {}, terminals inlined {}, unreachable {}, redundant jumps {}",
            stats.peephole_rewrites,
            stats.jumps_shortened,
            stats.branches_folded,
            stats.terminals_inlined,
            stats.unreachable_removed,
            stats.redundant_jumps_removed
        );
    } else {
        warn!("optimization is disabled in the compile options");
    }
    assign_opcode_flags(&mut function);

    if let Some(path) = output {
        let bytes = function.to_bytes().map_err(|e| e.to_string())?;
        std::fs::write(path, bytes).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
        debug!(path = %path.display(), "wrote optimized function");
    }
    Ok(())
}

fn run_disasm(input: &Path, no_color: bool) -> Result<(), String> {
    let function = read_function(input)?;
    let mut disassembler = Disassembler::new();
    if no_color {
        disassembler = disassembler.no_color();
    }
    let name = input.file_stem().and_then(|s| s.to_str()).unwrap_or("function");
    print!("{}", disassembler.disassemble(name, &function));
    Ok(())
}

fn read_function(path: &Path) -> Result<ScriptFunction, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let function = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        let text = String::from_utf8(bytes).map_err(|e| e.to_string())?;
        toml::from_str(&text).map_err(|e| format!("Invalid script function '{}': {}", path.display(), e))?
    } else {
        ScriptFunction::from_bytes(&bytes).map_err(|e| format!("Invalid script function '{}': {}", path.display(), e))?
    };
    debug!(path = %path.display(), "loaded script function");
    Ok(function)
}
