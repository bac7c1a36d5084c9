//! kiln - interactive AArch64 Forth JIT
//!
//! Every definition is compiled to native code as it is typed; top-level
//! words run immediately on a host value stack.
//!
//! Usage:
//!   kiln                          # Interactive session
//!   kiln lib.fs                   # Load files, then the prompt
//!   kiln --batch prog.fs          # Load files and exit
//!   kiln --convention stack       # Use the software data stack
//!   kiln --dump                   # List the code of each definition
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

mod fault;
mod interp;
mod reader;

use clap::{Parser as ClapParser, ValueEnum};
use interp::Interpreter;
use kilnc::{Convention, Jit, JitConfig};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConventionArg {
    Register,
    Stack,
}

impl From<ConventionArg> for Convention {
    fn from(arg: ConventionArg) -> Self {
        match arg {
            ConventionArg::Register => Convention::Register,
            ConventionArg::Stack => Convention::Stack,
        }
    }
}

#[derive(ClapParser)]
#[command(name = "kiln")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interactive AArch64 Forth JIT", long_about = None)]
struct Args {
    /// Source files to load before the prompt
    files: Vec<PathBuf>,

    /// JIT configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Calling convention between words (overrides the config file)
    #[arg(long, value_enum)]
    convention: Option<ConventionArg>,

    /// Never inline calls automatically
    #[arg(long)]
    no_inline: bool,

    /// Print a listing after each definition
    #[arg(long)]
    dump: bool,

    /// Exit after loading the files instead of starting the prompt
    #[arg(long)]
    batch: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kiln=info".parse().expect("static directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let jit = match Jit::new(config) {
        Ok(jit) => jit,
        Err(e) => {
            eprintln!("Error starting JIT: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let heap = jit.heap();
    fault::set_code_range(heap.address_of(0), heap.address_of(heap.capacity()));
    if let Err(e) = fault::install() {
        tracing::warn!("fault handlers not installed: {}", e);
    }

    let mut interp = Interpreter::new(jit).with_dump(args.dump);
    for path in &args.files {
        if !load_file(&mut interp, path) && args.batch {
            return ExitCode::FAILURE;
        }
    }
    if args.batch {
        return ExitCode::SUCCESS;
    }
    repl_loop(&mut interp)
}

fn load_config(args: &Args) -> Result<JitConfig, kilnc::CompileError> {
    let mut config = match &args.config {
        Some(path) => JitConfig::load(path)?,
        None => JitConfig::default(),
    };
    if let Some(convention) = args.convention {
        config = config.with_convention(convention.into());
    }
    if args.no_inline {
        config = config.with_auto_inline(false);
    }
    Ok(config)
}

/// Interpret a whole file; returns false if it failed.
fn load_file(interp: &mut Interpreter, path: &Path) -> bool {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            return false;
        }
    };
    match interp.run(&source, 1) {
        Ok(()) if interp.is_continuing() => {
            eprintln!("{}: unterminated definition at end of file", path.display());
            false
        }
        Ok(()) => true,
        Err(e) => {
            eprintln!("{}:{}", path.display(), e);
            false
        }
    }
}

fn repl_loop(interp: &mut Interpreter) -> ExitCode {
    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error initializing readline: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let history_file = dirs_history_file();
    if let Some(ref path) = history_file {
        let _ = rl.load_history(path);
    }

    println!(
        "kiln {} ({} convention). Ctrl-D to exit.",
        env!("CARGO_PKG_VERSION"),
        interp.jit().config().convention.name()
    );

    let mut line_number = 0;
    loop {
        let prompt = if interp.is_continuing() { "...   " } else { "kiln> " };
        match rl.readline(prompt) {
            Ok(line) => {
                line_number += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                match interp.run(&line, line_number) {
                    Ok(()) if interp.is_continuing() => {}
                    Ok(()) => println!(" ok"),
                    Err(e) => eprintln!("Error at {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(ref path) = history_file {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }
    ExitCode::SUCCESS
}

fn dirs_history_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("kiln_history"))
}
