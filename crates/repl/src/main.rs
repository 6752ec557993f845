//! rasp - interactive REPL
//!
//! Reads s-expressions with line editing and persistent history, evaluates
//! them through the evaluator machine, and prints one result per top-level
//! form. Multi-line input continues with a `...` prompt while parentheses
//! are unbalanced.
//!
//! Commands:
//!   quit, exit, q           # leave
//!   clear, clr, clrscr      # clear the screen
//!   trace N                 # machine trace level (0/1/2)
//!   reset                   # rebuild the global environment, reload files
//!   load PATH               # evaluate .scm files under PATH
//!   anything else           # parse and evaluate

use clap::Parser as ClapParser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use rasp_compiler::evaluator::Evaluator;
use rasp_compiler::parser::is_balanced;
use rasp_core::pool::Pool;
use rasp_core::value::Value;

#[derive(ClapParser)]
#[command(name = "rasp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "rasp - a Scheme-flavored register-machine REPL", long_about = None)]
struct Args {
    /// Path to the evaluator machine program
    #[arg(long, default_value = "lib/machines/evaluator.scm")]
    evaluator: PathBuf,

    /// Library directory loaded at startup (alphabetical order)
    #[arg(long, default_value = "lib/library")]
    library: PathBuf,

    /// Self-test directory loaded after the library
    #[arg(long, default_value = "lib/tests")]
    tests: PathBuf,

    /// History file (defaults to ~/.rasp_history)
    #[arg(long)]
    history: Option<PathBuf>,

    /// Initial machine trace level (0/1/2)
    #[arg(long, default_value_t = 0)]
    trace: u8,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RASP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), String> {
    let mut session = Session::new(&args)?;

    println!("rasp version {}", env!("CARGO_PKG_VERSION"));
    println!("type in \"q\" to quit");
    println!();

    session.load_startup_files(&args.library, &args.tests);
    session.repl_loop()?;

    println!();
    println!("bye!");
    Ok(())
}

struct Session {
    evaluator: Evaluator,
    editor: DefaultEditor,
    history_path: PathBuf,
    last_input: String,
    library: PathBuf,
    tests: PathBuf,
}

impl Session {
    fn new(args: &Args) -> Result<Session, String> {
        let mut evaluator = Evaluator::from_file(&args.evaluator)?;
        evaluator.set_trace(args.trace);
        evaluator.set_interrupt(interrupt_flag()?);

        let mut editor =
            DefaultEditor::new().map_err(|e| format!("failed to start the line editor: {e}"))?;
        let history_path = args.history.clone().unwrap_or_else(default_history_path);
        let _ = editor.load_history(&history_path);

        Ok(Session {
            evaluator,
            editor,
            history_path,
            last_input: String::new(),
            library: args.library.clone(),
            tests: args.tests.clone(),
        })
    }

    fn repl_loop(&mut self) -> Result<(), String> {
        loop {
            let input = match self.read_input() {
                Ok(Some(input)) => input,
                Ok(None) => break, // end of input
                Err(e) => return Err(e),
            };
            if input.trim().is_empty() {
                continue;
            }
            self.remember(&input);

            let words: Vec<&str> = input.split_whitespace().collect();
            match words.as_slice() {
                ["quit" | "exit" | "q"] => break,
                ["clear" | "clr" | "clrscr"] => print!("\x1b[1;1H\x1b[2J"),
                ["trace", level] => match level.parse::<u8>() {
                    Ok(level @ 0..=2) => {
                        self.evaluator.set_trace(level);
                        println!("trace level set to {level}");
                    }
                    _ => println!("{}", red("trace level must be 0, 1, or 2")),
                },
                ["reset"] => {
                    self.evaluator.reset();
                    let library = self.library.clone();
                    let tests = self.tests.clone();
                    self.load_startup_files(&library, &tests);
                    println!("environment was reset");
                }
                ["load", path] => {
                    let path = PathBuf::from(path);
                    self.load_path(&path);
                }
                _ => self.evaluate_and_print(&input),
            }
        }
        Ok(())
    }

    /// One logical input: keeps prompting while parens are unbalanced.
    fn read_input(&mut self) -> Result<Option<String>, String> {
        let mut input = match self.editor.readline(">>> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => return Ok(Some(String::new())),
            Err(ReadlineError::Eof) => return Ok(None),
            Err(e) => return Err(format!("input error: {e}")),
        };
        while !is_balanced(&input) {
            match self.editor.readline("... ") {
                Ok(line) => {
                    input.push('\n');
                    input.push_str(&line);
                }
                Err(ReadlineError::Interrupted) => return Ok(Some(String::new())),
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(format!("input error: {e}")),
            }
        }
        Ok(Some(input))
    }

    /// Add to history unless it repeats the previous entry.
    fn remember(&mut self, input: &str) {
        if input == self.last_input {
            return;
        }
        self.last_input = input.to_string();
        let _ = self.editor.add_history_entry(input);
        let _ = self.editor.save_history(&self.history_path);
    }

    fn evaluate_and_print(&mut self, input: &str) {
        let mut out = Pool::new();
        match self.evaluator.evaluate_source(input, &mut out) {
            Ok(results) => {
                for result in results {
                    println!("{}", render(&out, result));
                }
            }
            Err(message) => println!("{}", red(&message)),
        }
    }

    fn load_startup_files(&mut self, library: &Path, tests: &Path) {
        self.load_path(library);
        self.load_path(tests);
    }

    /// Evaluate every .scm file under `path` (recursively, alphabetical).
    /// Errors are reported per file and do not abort.
    fn load_path(&mut self, path: &Path) {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = match std::fs::read_dir(path) {
                Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
                Err(e) => {
                    println!("{}", red(&format!("can't read {}: {e}", path.display())));
                    return;
                }
            };
            entries.sort();
            for entry in entries {
                if entry.is_dir() || entry.extension().is_some_and(|ext| ext == "scm") {
                    self.load_path(&entry);
                }
            }
            return;
        }

        tracing::debug!(path = %path.display(), "loading file");
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                println!("{}", red(&format!("can't read {}: {e}", path.display())));
                return;
            }
        };

        let mut out = Pool::new();
        match self.evaluator.evaluate_source(&source, &mut out) {
            Ok(results) => {
                // only failures are worth the noise during loading
                for result in results {
                    if out.is_error(result) {
                        println!("{}: {}", path.display(), red(&out.display(result)));
                    }
                }
            }
            Err(message) => println!("{}: {}", path.display(), red(&message)),
        }
    }
}

/// Render a result for the terminal: errors in red, infos in green.
fn render(pool: &Pool, v: rasp_core::value::ValueRef) -> String {
    match pool.get(v) {
        Value::Error(_) => red(&pool.display(v)),
        Value::Info(_) => green(&pool.display(v)),
        _ => pool.display(v),
    }
}

fn red(text: &str) -> String {
    format!("\x1b[31m{text}\x1b[0m")
}

fn green(text: &str) -> String {
    format!("\x1b[32m{text}\x1b[0m")
}

fn default_history_path() -> PathBuf {
    match home::home_dir() {
        Some(home) => home.join(".rasp_history"),
        None => PathBuf::from(".rasp_history"),
    }
}

#[cfg(unix)]
fn interrupt_flag() -> Result<Arc<AtomicBool>, String> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag.clone())
        .map_err(|e| format!("failed to install the interrupt handler: {e}"))?;
    Ok(flag)
}

#[cfg(not(unix))]
fn interrupt_flag() -> Result<Arc<AtomicBool>, String> {
    Ok(Arc::new(AtomicBool::new(false)))
}
