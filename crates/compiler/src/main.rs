//! rasp compiler CLI
//!
//! Command-line interface for inspecting compiled register code and for
//! running programs through the evaluator machine without the REPL.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use rasp_compiler::compile::{Compiler, Linkage};
use rasp_compiler::evaluator::Evaluator;
use rasp_compiler::parser;
use rasp_core::pool::Pool;

#[derive(ClapParser)]
#[command(name = "raspc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "rasp compiler - compile expressions to register-machine code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file and print the register code
    Code {
        /// Input .scm source file
        input: PathBuf,

        /// Target register for each form's result
        #[arg(long, default_value = "val")]
        target: String,

        /// Linkage: "next", "return", or a label name
        #[arg(long, default_value = "next")]
        linkage: String,
    },

    /// Evaluate a source file through the evaluator machine
    Run {
        /// Input .scm source file
        input: PathBuf,

        /// Path to the evaluator program
        #[arg(long, default_value = "lib/machines/evaluator.scm")]
        evaluator: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Code {
            input,
            target,
            linkage,
        } => run_code(&input, &target, &linkage),
        Commands::Run { input, evaluator } => run_file(&input, &evaluator),
        Commands::Completions { shell } => {
            run_completions(shell);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "raspc", &mut io::stdout());
}

fn run_code(input: &Path, target: &str, linkage: &str) -> Result<(), String> {
    let linkage = match linkage {
        "next" => Linkage::Next,
        "return" => Linkage::Return,
        label => Linkage::Jump(label.to_string()),
    };

    let mut pool = Pool::new();
    let forms = parser::parse_file(&mut pool, input)?;
    let mut compiler = Compiler::new();

    for form in pool.list_items(forms) {
        let code = compiler.compile(&mut pool, form, target, &linkage)?;
        println!("; {}", pool.display(form));
        for line in &code {
            println!("{}", line.render(&pool));
        }
        println!();
    }
    Ok(())
}

fn run_file(input: &Path, evaluator_path: &Path) -> Result<(), String> {
    let mut evaluator = Evaluator::from_file(evaluator_path)?;

    let mut scratch = Pool::new();
    let forms = parser::parse_file(&mut scratch, input)?;
    for form in scratch.list_items(forms) {
        let mut out = Pool::new();
        let result = evaluator.evaluate(&scratch, form, &mut out);
        println!("{}", out.display(result));
    }
    Ok(())
}
