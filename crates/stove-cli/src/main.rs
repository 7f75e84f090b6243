//! Command-line runner and REPL for Stove.
//!
//! Zero positional arguments drop into an interactive line loop reading
//! stdin until `quit`; one argument runs that file as a script, with its
//! containing directory as the root for relative `import` resolution.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use stove::{embed, ExecOutcome, ModuleLoader, StoveError};
use tracing::debug;

#[derive(Parser)]
#[command(name = "stove", about = "Run a Stove script, or start the REPL with no arguments")]
struct Args {
    /// Script file to run. Omit to start the interactive REPL.
    script: Option<PathBuf>,

    /// Disable ANSI color in diagnostics.
    #[arg(long)]
    no_color: bool,
}

/// Resolves `import "name"` against the root script's directory, per
/// the CLI surface's "root directory derived from the path for
/// relative imports" rule.
struct FileLoader {
    root: PathBuf,
}

impl ModuleLoader for FileLoader {
    fn load(&mut self, name: &str) -> io::Result<String> {
        let mut path = self.root.join(name);
        if path.extension().is_none() {
            path.set_extension("stove");
        }
        debug!(module = name, path = %path.display(), "resolving import");
        fs::read_to_string(&path)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match args.script {
        Some(path) => run_file(&path, args.no_color),
        None => run_repl(args.no_color),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stove_cli=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn run_file(path: &Path, no_color: bool) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            report(&StoveError::Io(e), no_color);
            return ExitCode::FAILURE;
        }
    };
    let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let module_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("main").to_string();

    let mut vm = embed::Vm::new(Box::new(FileLoader { root }));
    match vm.execute_module(&module_name, &source) {
        ExecOutcome::Success(_) => ExitCode::SUCCESS,
        ExecOutcome::Error(e) => {
            report(&e, no_color);
            ExitCode::FAILURE
        }
    }
}

fn run_repl(no_color: bool) -> ExitCode {
    let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut vm = embed::Vm::new(Box::new(FileLoader { root }));
    let mut rl = rustyline::DefaultEditor::new().expect("failed to initialize line editor");
    let mut line_no = 0u32;

    loop {
        let prompt = if line_no == 0 { "> " } else { "  " };
        let readline = rl.readline(prompt);
        match readline {
            Ok(line) => {
                if line.trim() == "quit" {
                    break;
                }
                let _ = rl.add_history_entry(line.as_str());
                line_no += 1;
                match vm.execute_module("repl", &line) {
                    ExecOutcome::Success(value) => {
                        if !matches!(value, stove::Value::Null) {
                            println!("{value}");
                        }
                    }
                    ExecOutcome::Error(e) => report(&e, no_color),
                }
            }
            Err(rustyline::error::ReadlineError::Eof) | Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
    ExitCode::SUCCESS
}

fn report(err: &StoveError, no_color: bool) {
    let mut stderr = io::stderr();
    if no_color {
        let _ = writeln!(stderr, "error: {err}");
    } else {
        let _ = writeln!(stderr, "\x1b[31merror:\x1b[0m {err}");
    }
}
