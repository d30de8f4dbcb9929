// File: src/main.rs
//
// Command-line driver for Rho. `compile` lowers a source file into a
// `.rhoc` image; `run` executes either a `.rhoc` image or a source file
// compiled in memory.

use clap::{Parser as ClapParser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use rho::bytecode::{MAGIC, RHOC_EXT};
use rho::compiler;
use rho::vm::Vm;

#[derive(ClapParser)]
#[command(
    name = "rho",
    about = "Rho: a dynamically-typed scripting language with actors",
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
    /// Compile a .rho source file into a .rhoc image
    Compile {
        /// Path to the source file
        file: PathBuf,

        /// Output path (defaults to the input with a .rhoc extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a .rhoc image, or compile and run a source file
    Run {
        /// Path to the .rhoc or source file
        file: PathBuf,
    },
}

fn compile_file(file: &Path) -> Vec<u8> {
    let src = match fs::read_to_string(file) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("cannot read '{}': {}", file.display(), e);
            process::exit(1);
        }
    };
    match compiler::compile_source(&src) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { file, output } => {
            let image = compile_file(&file);
            let out_path = output.unwrap_or_else(|| file.with_extension(&RHOC_EXT[1..]));
            if let Err(e) = fs::write(&out_path, image) {
                eprintln!("cannot write '{}': {}", out_path.display(), e);
                process::exit(1);
            }
        }

        Commands::Run { file } => {
            let is_image = file.extension().map(|e| e == &RHOC_EXT[1..]).unwrap_or(false)
                || fs::read(&file)
                    .map(|bytes| bytes.starts_with(&MAGIC))
                    .unwrap_or(false);

            let image = if is_image {
                match fs::read(&file) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        eprintln!("cannot read '{}': {}", file.display(), e);
                        process::exit(1);
                    }
                }
            } else {
                compile_file(&file)
            };

            let mut vm = Vm::new();
            let status = vm.exec_image(&image, &file.to_string_lossy());
            process::exit(status);
        }
    }
}
