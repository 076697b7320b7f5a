use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use scopeline::{Grammar, Registry, TokenizeOptions};

#[derive(Parser)]
#[command(name = "scopeline")]
#[command(about = "Load TextMate grammars and tokenize text with them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load grammars and print every diagnostic found while loading and linking them.
    /// Exits with 1 if there is any.
    Check {
        /// Grammar files (JSON)
        #[arg(required = true)]
        grammars: Vec<PathBuf>,
    },
    /// Print the scope names a grammar can produce
    Scopes {
        /// Grammar file (JSON)
        grammar: PathBuf,
    },
    /// Tokenize a file, printing one line per token
    Tokenize {
        /// Grammar files (JSON). Every one is registered so they can include each other.
        #[arg(short, long, required = true)]
        grammar: Vec<PathBuf>,

        /// Registry path of the grammar to start with. Defaults to the one handling the
        /// input file extension, or the first grammar given.
        #[arg(short, long)]
        scope: Option<String>,

        /// File to tokenize, stdin if missing
        input: Option<PathBuf>,

        /// Print the tokens of each line as JSON
        #[arg(long)]
        json: bool,

        #[arg(long, default_value_t = 256)]
        max_stack_depth: usize,
    },
}

fn load_registry(paths: &[PathBuf]) -> Result<(Registry, Vec<String>), Box<dyn std::error::Error>> {
    let mut registry = Registry::new();
    let mut registered = Vec::with_capacity(paths.len());
    for path in paths {
        let scope = registry
            .add_grammar_from_path(path)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        registered.push(scope);
    }
    Ok((registry, registered))
}

fn check(paths: &[PathBuf]) -> Result<bool, Box<dyn std::error::Error>> {
    let (registry, registered) = load_registry(paths)?;
    let mut clean = true;
    for (path, scope) in paths.iter().zip(&registered) {
        let Some(grammar) = registry.find(scope) else {
            continue;
        };
        let diagnostics: Vec<_> = grammar.diagnostics().collect();
        println!(
            "{} ({scope}): {} rules, {} diagnostics",
            path.display(),
            grammar.rules().len(),
            diagnostics.len()
        );
        for diagnostic in diagnostics {
            clean = false;
            println!("  {diagnostic}");
        }
    }
    Ok(clean)
}

fn scopes(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let grammar = Grammar::load_from_file(path)?;
    for scope in grammar.scope_names() {
        println!("{scope}");
    }
    Ok(())
}

fn tokenize(
    grammars: &[PathBuf],
    scope: Option<String>,
    input: Option<PathBuf>,
    json: bool,
    max_stack_depth: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let (registry, registered) = load_registry(grammars)?;

    let from_extension = input
        .as_deref()
        .and_then(|p| p.extension())
        .and_then(|ext| ext.to_str())
        .and_then(|ext| registry.find_by_file_type(ext))
        .map(|(path, _)| path);
    let Some(scope) = scope
        .or(from_extension)
        .or_else(|| registered.first().cloned())
    else {
        return Err("no grammar to tokenize with".into());
    };

    let text = match &input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    let options = TokenizeOptions::default().max_stack_depth(max_stack_depth);
    let mut tokenizer = registry.tokenizer_with_options(&scope, options)?;
    let mut stack = tokenizer.initial_stack();
    for (i, line) in text.lines().enumerate() {
        let res = tokenizer.tokenize_line(line, stack);
        if json {
            println!("{}", serde_json::to_string(&res.tokens)?);
        } else {
            println!("{}: {line:?}", i + 1);
            for token in &res.tokens {
                let scopes: Vec<_> = token.scopes.iter().map(|s| s.to_string()).collect();
                println!(
                    "  [{}..{}] {:?} {}",
                    token.span.start,
                    token.span.end,
                    &line[token.span.clone()],
                    scopes.join(" ")
                );
            }
        }
        stack = res.stack;
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let res = match cli.command {
        Commands::Check { grammars } => check(&grammars).map(|clean| {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }),
        Commands::Scopes { grammar } => scopes(&grammar).map(|_| ExitCode::SUCCESS),
        Commands::Tokenize {
            grammar,
            scope,
            input,
            json,
            max_stack_depth,
        } => tokenize(&grammar, scope, input, json, max_stack_depth).map(|_| ExitCode::SUCCESS),
    };

    match res {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
