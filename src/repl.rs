// Interactive REPL for the ruff compiler/VM. A persistent `Vm` is kept
// across lines; each line is compiled with `compiler::compile_fragment`
// rather than `compiler::compile` so the top-level `ENTER_SCOPE`/`EXIT_SCOPE`
// wrapper and native prelude (already run once, at startup) don't shadow
// bindings made on a previous line.

use crate::compiler;
use crate::lexer;
use crate::parser;
use crate::vm::Vm;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        let mut vm = Vm::new();
        prime_natives(&mut vm);
        Ok(Repl { vm, editor })
    }

    fn show_banner(&self) {
        println!("{}", "ruff REPL".bright_cyan().bold());
        println!(
            "  {} Use {}{}{}{}",
            "Welcome!".bright_green(),
            ":".bright_blue(),
            "help".bright_yellow(),
            " for commands or ".bright_blue(),
            ":quit".bright_yellow()
        );
        println!();
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();

        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() {
                "ruff> ".bright_green().to_string()
            } else {
                "....> ".bright_blue().to_string()
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim().starts_with(':') {
                        if self.handle_command(line.trim()) {
                            continue;
                        } else {
                            break;
                        }
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_input_complete(&buffer) {
                        self.eval_input(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C (Ctrl+C to interrupt, :quit to exit)".bright_yellow());
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "\nGoodbye!".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "Error:".bright_red(), err);
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_command(&mut self, cmd: &str) -> bool {
        match cmd {
            ":help" | ":h" => {
                self.show_help();
                true
            }
            ":quit" | ":q" | ":exit" => {
                println!("{}", "Goodbye!".bright_cyan());
                false
            }
            ":reset" | ":r" => {
                self.vm = Vm::new();
                prime_natives(&mut self.vm);
                println!("{}", "environment reset".bright_green());
                true
            }
            _ => {
                println!(
                    "{} unknown command: {}. Type {}{}{}",
                    "Error:".bright_red(),
                    cmd.bright_yellow(),
                    ":".bright_blue(),
                    "help".bright_yellow(),
                    " for available commands.".bright_blue()
                );
                true
            }
        }
    }

    fn show_help(&self) {
        println!();
        println!("{}", "REPL Commands:".bright_cyan().bold());
        println!("  {}{}  Display this help message", ":help".bright_yellow(), " or :h     ".dimmed());
        println!("  {}{}  Exit the REPL", ":quit".bright_yellow(), " or :q     ".dimmed());
        println!("  {}{}  Reset the environment", ":reset".bright_yellow(), " or :r    ".dimmed());
        println!();
        println!("Bindings from one line persist into the next — `let`, `const`, and `fn` stick around.");
        println!();
    }

    fn eval_input(&mut self, input: &str) {
        if input.trim().is_empty() {
            return;
        }

        let tokens = lexer::tokenize(input);
        let program = match parser::parse(tokens) {
            Ok(p) => p,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };

        let chunk = match compiler::compile_fragment(&program) {
            Ok(c) => c,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };

        match self.vm.run(&chunk) {
            Ok(value) => println!("{} {}", "=>".bright_blue(), value.to_string().bright_white()),
            Err(e) => println!("{}", e),
        }
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new().expect("failed to create REPL")
    }
}

/// Runs `compile` on an empty program once, against the persistent REPL
/// `Vm`, purely to get its native prelude registered as globals. The
/// `ENTER_SCOPE`/`EXIT_SCOPE` wrapper this also emits is a no-op here: it
/// pushes and pops an empty scope frame, leaving the `Vm`'s scope stack back
/// at zero before the first fragment-mode line runs.
fn prime_natives(vm: &mut Vm) {
    let chunk = compiler::compile(&crate::ast::Block::default()).expect("empty program always compiles");
    vm.run(&chunk).expect("native prelude cannot fail");
}

/// Checks bracket/brace/paren balance (ignoring string contents and
/// comments) to decide whether the REPL should keep reading more lines.
fn is_input_complete(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return true;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;
    let mut in_line_comment = false;

    for ch in trimmed.chars() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '/' if !in_string => {}
            '{' | '[' | '(' if !in_string => depth += 1,
            '}' | ']' | ')' if !in_string => depth -= 1,
            _ => {}
        }
    }

    !in_string && depth <= 0
}
