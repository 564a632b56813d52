use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

use kiln::bytecode::Bytecode;
use kiln::bytecode::compile::Compiler;
use kiln::bytecode::disasm::{disassemble, print_bc, print_bc_stats};
use kiln::frontend::lexer::Lexer;
use kiln::frontend::parse_source;
use kiln::frontend::token_dumper::TokenDumper;
use kiln::runtime::{Interpreter, Vm, VmConfig};
use kiln::session::Session;

const SOURCE_EXTENSION: &str = "kl";
const IMAGE_EXTENSION: &str = "klc";

#[derive(Parser)]
#[command(name = "kiln", version, about = "Kiln language toolchain")]
struct Cli {
    /// Program to run (.kl source, or .klc image with --load). Starts a REPL when omitted.
    file: Option<PathBuf>,

    /// Dump the token stream and exit
    #[arg(long)]
    tokens: bool,

    /// Plain token dump without ANSI colors
    #[arg(long)]
    no_color: bool,

    /// Show lexemes next to tokens
    #[arg(long)]
    pretty: bool,

    /// Print the syntax tree and exit
    #[arg(long)]
    ast: bool,

    /// Print the syntax tree as JSON and exit
    #[arg(long)]
    ast_json: bool,

    /// Print the annotated disassembly before running
    #[arg(long, alias = "bytecode")]
    bc: bool,

    /// Print opcode statistics before running
    #[arg(long)]
    stats: bool,

    /// Write the instruction hex dump to PATH
    #[arg(long, value_name = "PATH")]
    hex_out: Option<PathBuf>,

    /// Write the plain disassembly to PATH
    #[arg(long, value_name = "PATH")]
    disasm_out: Option<PathBuf>,

    /// Write a compiled image to PATH instead of running
    #[arg(long, value_name = "PATH")]
    emit: Option<PathBuf>,

    /// Treat FILE as a compiled image
    #[arg(long)]
    load: bool,

    /// Run with the tree-walking interpreter instead of the VM
    #[arg(long)]
    interp: bool,

    /// Abort after N instructions
    #[arg(long, value_name = "N")]
    max_steps: Option<usize>,

    /// Maximum operand stack depth
    #[arg(long, value_name = "N", default_value_t = 10_000)]
    max_stack: usize,
}

impl Cli {
    fn vm_config(&self) -> VmConfig {
        VmConfig {
            max_steps: self.max_steps,
            max_stack_size: self.max_stack,
            ..VmConfig::default()
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    match &cli.file {
        Some(path) if cli.load => run_image(&cli, path),
        Some(path) => run_file(&cli, path),
        None => repl(cli.vm_config()),
    }
}

fn ensure_extension(path: &Path, expected: &str) -> Result<()> {
    if path.extension().and_then(|e| e.to_str()) != Some(expected) {
        bail!("expected a .{} file, got {}", expected, path.display());
    }
    Ok(())
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) -> Result<()> {
    let tokens = Lexer::new(source).tokenize()?;

    let mut dumper = TokenDumper::new();
    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }

    dumper.dump(&tokens);
    Ok(())
}

fn run_file(cli: &Cli, path: &Path) -> Result<()> {
    ensure_extension(path, SOURCE_EXTENSION)?;
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;

    if cli.tokens {
        return dump_tokens(&source, cli.no_color, cli.pretty);
    }

    let program = parse_source(&source)?;

    // AST printing modes (do not depend on engine)
    if cli.ast {
        println!("{:#?}", program);
        return Ok(());
    }
    if cli.ast_json {
        println!("{}", serde_json::to_string_pretty(&program)?);
        return Ok(());
    }

    if cli.interp {
        Interpreter::new().run(&program)?;
        return Ok(());
    }

    let bytecode = Compiler::new().compile_program(&program)?;

    if let Some(out) = &cli.hex_out {
        bytecode.write_hex(out)?;
        info!(path = %out.display(), "wrote hex dump");
    }
    if let Some(out) = &cli.disasm_out {
        fs::write(out, disassemble(&bytecode)?)?;
        info!(path = %out.display(), "wrote disassembly");
    }
    if let Some(out) = &cli.emit {
        ensure_extension(out, IMAGE_EXTENSION)?;
        fs::write(out, bytecode.to_bytes()?)?;
        info!(path = %out.display(), "wrote compiled image");
        return Ok(());
    }

    execute(cli, &bytecode)
}

fn run_image(cli: &Cli, path: &Path) -> Result<()> {
    ensure_extension(path, IMAGE_EXTENSION)?;
    let bytes = fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    let bytecode = Bytecode::from_bytes(&bytes)?;
    execute(cli, &bytecode)
}

fn execute(cli: &Cli, bytecode: &Bytecode) -> Result<()> {
    if cli.bc {
        print_bc(bytecode)?;
    }
    if cli.stats {
        print_bc_stats(bytecode)?;
    }

    let mut vm = Vm::with_config(cli.vm_config());
    vm.run(bytecode)?;
    Ok(())
}

fn repl(config: VmConfig) -> Result<()> {
    println!("kiln {} (.exit to quit, .bc to show bytecode)", env!("CARGO_PKG_VERSION"));

    let mut session = Session::with_config(config);
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("kiln> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }

        let input = line.trim();
        match input {
            "" => continue,
            ".exit" | ".quit" => break,
            ".bc" => {
                if let Err(e) = print_bc(session.bytecode()) {
                    eprintln!("{}", e);
                }
                continue;
            }
            _ => {}
        }

        match session.eval(input) {
            Ok(evaluation) => {
                if !evaluation.errors.is_empty() {
                    eprintln!("{}", evaluation.errors);
                }
                if let Some(value) = evaluation.value {
                    println!("{}", value.repr());
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}
