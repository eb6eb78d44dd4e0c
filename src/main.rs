//! runcool - CLI Entry Point
//!
//! Commands:
//! - `runcool <image>` - Run an image and report cache statistics
//! - `runcool debug <image>` - Interactive debugger
//! - `runcool asm <source>` - Assemble to an image
//! - `runcool disasm <image>` - Disassemble an image

use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{debug, info, warn, LevelFilter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;

/// Exit statuses for failures outside the machine itself.
const EXIT_USAGE: i32 = 64;
const EXIT_ASSEMBLY: i32 = 65;
const EXIT_IMAGE: i32 = 66;
const EXIT_FAULT: i32 = 70;

#[derive(Parser)]
#[command(name = "runcool")]
#[command(version)]
#[command(about = "Run a stack machine image through a direct-mapped write-back cache")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the image to execute
    program: Option<PathBuf>,
    /// Stop with a fault after this many instructions
    #[arg(short, long)]
    max_cycles: Option<u64>,
    /// Log each executed instruction to stderr
    #[arg(short, long)]
    trace: bool,
    /// Write a JSON snapshot of registers, counters and cache lines on exit
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive debugger
    #[cfg(feature = "tui")]
    Debug {
        /// Path to the image to debug
        program: PathBuf,
    },
    /// Assemble source to an image
    Asm {
        /// Path to the source file
        source: PathBuf,
        /// Output image file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the image
        image: PathBuf,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            exit(EXIT_USAGE);
        }
        Err(e) => e.exit(),
    };

    let mut logger = env_logger::Builder::from_default_env();
    if cli.run.trace {
        logger.filter_module("cool::cpu::execute", LevelFilter::Trace);
    }
    logger.init();

    match cli.command {
        #[cfg(feature = "tui")]
        Some(Commands::Debug { program }) => debug_program(&program),
        Some(Commands::Asm { source, output }) => assemble_file(&source, output),
        Some(Commands::Disasm { image }) => disassemble_file(&image),
        None => match cli.run.program.clone() {
            Some(program) => run_program(&program, &cli.run),
            None => {
                eprintln!("{}", Cli::command().render_usage());
                exit(EXIT_USAGE);
            }
        },
    }
}

fn load_or_exit(path: &Path) -> Vec<cool::Word> {
    match cool::load_image(path) {
        Ok(image) => {
            debug!("read {} words from {}", image.len(), path.display());
            image
        }
        Err(e) => {
            eprintln!("runcool: cannot load image: {}", e);
            exit(EXIT_IMAGE);
        }
    }
}

fn run_program(path: &Path, args: &RunArgs) {
    use cool::{Cpu, CpuError};

    let image = load_or_exit(path);
    let mut cpu = match Cpu::with_image(&image) {
        Ok(cpu) => cpu,
        Err(e) => {
            eprintln!("runcool: cannot load image: {}", e);
            exit(EXIT_IMAGE);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let result = match args.max_cycles {
        Some(max) => cpu.run_limited(max, &mut out).and_then(|_| {
            if cpu.is_running() {
                Err(CpuError::CycleLimit(max))
            } else {
                cpu.exit_value()
            }
        }),
        None => cpu.run(&mut out),
    };

    if let Some(snapshot_path) = &args.snapshot {
        write_snapshot(&cpu, snapshot_path);
    }

    // Statistics are reported even after a fault.
    let exit_value = result.as_ref().ok().map(|value| value.as_signed());
    if let Err(e) = cpu.stats().write_report(&mut out, exit_value).and_then(|()| out.flush()) {
        warn!("cannot write statistics report: {}", e);
    }

    match result {
        Ok(value) => {
            let code = i32::from(value.as_signed());
            info!("exit value {} after {} cycles", code, cpu.cycles);
            exit(code);
        }
        Err(e) => {
            eprintln!("runcool: machine fault at PC={}: {}", cpu.regs.pc, e);
            exit(EXIT_FAULT);
        }
    }
}

fn write_snapshot(cpu: &cool::Cpu, path: &Path) {
    let written = serde_json::to_string_pretty(&cpu.snapshot())
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));

    if let Err(e) = written {
        eprintln!("runcool: cannot write snapshot {}: {}", path.display(), e);
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &Path) {
    let image = load_or_exit(path);

    if let Err(e) = cool::run_debugger(image) {
        eprintln!("runcool: debugger error: {}", e);
        exit(1);
    }
}

fn assemble_file(source_path: &Path, output: Option<PathBuf>) {
    let out_path = output.unwrap_or_else(|| source_path.with_extension("coolexe"));

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("runcool: cannot read {}: {}", source_path.display(), e);
            exit(EXIT_IMAGE);
        }
    };

    let image = match cool::assemble(&source) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("runcool: {}: {}", source_path.display(), e);
            exit(EXIT_ASSEMBLY);
        }
    };

    if let Err(e) = cool::save_image(&out_path, &image) {
        eprintln!("runcool: cannot write image: {}", e);
        exit(EXIT_IMAGE);
    }

    println!("{} words -> {}", image.len(), out_path.display());
}

fn disassemble_file(path: &Path) {
    let image = load_or_exit(path);
    print!("{}", cool::disassemble(&image));
}
