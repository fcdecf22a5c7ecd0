// File: src/main.rs
//
// Entry point for the ruff bytecode compiler and VM. Dispatches to
// run/repl/disasm/test subcommands; there is no async runtime and no
// tree-walking fallback — the VM is the only execution path.

mod ast;
mod bytecode;
mod compiler;
mod disassembler;
mod environment;
mod errors;
mod lexer;
mod natives;
mod parser;
mod repl;
mod value;
mod vm;

use clap::{Parser as ClapParser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(ClapParser)]
#[command(
    name = "ruff",
    about = "ruff: a small bytecode compiler and stack-based VM",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Compile and run a .ruff script
    Run {
        /// Path to the .ruff file
        file: PathBuf,
    },

    /// Launch the interactive REPL
    Repl,

    /// Compile a .ruff script and print its disassembly instead of running it
    Disasm {
        /// Path to the .ruff file
        file: PathBuf,
    },

    /// Run the golden-file scripts under tests/scripts
    Test {
        /// Regenerate all .out files from actual output
        #[arg(long)]
        update: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file } => run_file(&file),
        Commands::Repl => match repl::Repl::new() {
            Ok(mut repl) => {
                if let Err(e) = repl.run() {
                    eprintln!("REPL error: {}", e);
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Failed to start REPL: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Disasm { file } => disasm_file(&file),
        Commands::Test { update } => {
            let code = run_golden_tests(Path::new("tests/scripts"), update);
            std::process::exit(code);
        }
    }
}

fn read_and_parse(file: &Path) -> (String, ast::Block) {
    let code = fs::read_to_string(file).unwrap_or_else(|e| {
        eprintln!("failed to read {}: {}", file.display(), e);
        std::process::exit(1);
    });

    let tokens = lexer::tokenize(&code);
    let program = parser::parse(tokens).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });

    if std::env::var("DEBUG_AST").is_ok() {
        eprintln!("DEBUG AST: {:#?}", program);
    }

    (code, program)
}

fn run_file(file: &Path) {
    let (_code, program) = read_and_parse(file);

    let chunk = compiler::compile(&program).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });

    let mut machine = vm::Vm::new();
    if let Err(e) = machine.run(&chunk) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn disasm_file(file: &Path) {
    let (_code, program) = read_and_parse(file);

    let chunk = compiler::compile(&program).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });

    print!("{}", disassembler::disassemble_chunk(&chunk));
}

/// Runs every `tests/scripts/*.ruff` file, comparing captured stdout against
/// the matching `.out` file. With `update`, overwrites `.out` instead of
/// comparing. Returns the process exit code (0 on all-pass).
fn run_golden_tests(dir: &Path, update: bool) -> i32 {
    if !dir.exists() {
        eprintln!("no golden scripts directory at {}", dir.display());
        return 1;
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .expect("failed to read tests/scripts")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("ruff"))
        .collect();
    entries.sort();

    let mut failures = 0;
    for script in &entries {
        let name = script.file_stem().and_then(|s| s.to_str()).unwrap_or("?");
        let actual = capture_run(script);
        let out_path = script.with_extension("out");

        if update {
            fs::write(&out_path, &actual).expect("failed to write .out file");
            println!("updated {}", name);
            continue;
        }

        match fs::read_to_string(&out_path) {
            Ok(expected) if expected == actual => println!("ok   {}", name),
            Ok(expected) => {
                println!("FAIL {}", name);
                println!("  expected: {:?}", expected);
                println!("  actual:   {:?}", actual);
                failures += 1;
            }
            Err(_) => {
                println!("FAIL {} (no .out file; run with --update)", name);
                failures += 1;
            }
        }
    }

    println!("\n{} script(s), {} failure(s)", entries.len(), failures);
    if failures == 0 {
        0
    } else {
        1
    }
}

/// Runs `script` through a fresh `ruff run` subprocess and captures its
/// combined stdout/stderr. Shelling out (rather than redirecting an
/// in-process writer) keeps this test runner honest about exactly what a
/// user invoking the binary would see, including the `echo` native's direct
/// `println!` output and the process exit code on error.
fn capture_run(script: &Path) -> String {
    let exe = std::env::current_exe().expect("failed to locate own executable");
    let output = std::process::Command::new(exe)
        .arg("run")
        .arg(script)
        .output()
        .expect("failed to spawn ruff subprocess");

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    strip_color(&combined)
}

fn strip_color(s: &str) -> String {
    // `colored` only emits ANSI escapes when stdout/stderr is a tty; when
    // captured into a string it already renders plain, but `NO_COLOR`-style
    // environments can still leave escapes in, so strip them defensively.
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            while let Some(&next) = chars.peek() {
                chars.next();
                if next == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
