//! Mica compiler CLI
//!
//! Compiles a .mica program and writes the session stream to a file or a
//! live VM connection.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use micac::CompileOptions;
use std::io;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "micac")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mica compiler - compile .mica programs to a VM session stream", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .mica file
    Build {
        /// Input .mica source file
        input: PathBuf,

        /// Output session-stream path (defaults to input with .mbc)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Root directory of the system libraries
        #[arg(long)]
        library_root: Option<PathBuf>,

        /// Root directory for package: imports
        #[arg(long)]
        package_root: Option<PathBuf>,

        /// Stream to a running VM instead of a file (host:port)
        #[arg(long, conflicts_with = "output")]
        connect: Option<String>,

        /// Ask the VM to spawn and run main after the commit
        #[arg(long, requires = "connect")]
        run: bool,

        /// Interleave symbolic name frames for bridge sessions
        #[arg(long)]
        emit_names: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            input,
            output,
            library_root,
            package_root,
            connect,
            run,
            emit_names,
        } => {
            let mut options = CompileOptions::new().with_emit_names(emit_names);
            if let Some(library_root) = library_root {
                options = options.with_library_root(library_root);
            }
            if let Some(package_root) = package_root {
                options = options.with_package_root(package_root);
            }

            if let Some(address) = connect {
                let stream = match TcpStream::connect(&address) {
                    Ok(stream) => stream,
                    Err(error) => {
                        eprintln!("micac: cannot connect to {address}: {error}");
                        process::exit(1);
                    }
                };
                match micac::compile_uri(&input, options, stream) {
                    Ok(stream) => {
                        if run {
                            let mut session = micac::Session::new(stream, false);
                            if session
                                .spawn_process_for_main()
                                .and_then(|()| session.run_process())
                                .and_then(|()| session.flush())
                                .is_err()
                            {
                                eprintln!("micac: failed to start program");
                                process::exit(1);
                            }
                        }
                    }
                    Err(diagnostic) => {
                        eprintln!("{diagnostic}");
                        process::exit(1);
                    }
                }
            } else {
                let output = output.unwrap_or_else(|| input.with_extension("mbc"));
                match micac::compile_uri(&input, options, Vec::new()) {
                    Ok(bytes) => {
                        if let Err(error) = std::fs::write(&output, bytes) {
                            eprintln!("micac: cannot write {}: {error}", output.display());
                            process::exit(1);
                        }
                    }
                    Err(diagnostic) => {
                        eprintln!("{diagnostic}");
                        process::exit(1);
                    }
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            generate(shell, &mut command, name, &mut io::stdout());
        }
    }
}
