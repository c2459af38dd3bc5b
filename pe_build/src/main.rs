use log::warn;
use pe_build::cli::{self, Cli};

const BOLD_RED: &str = "\x1b[1;31m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn main() {
    let (cli, ignored) = match Cli::try_parse_lenient(std::env::args()) {
        Ok(parsed) => parsed,
        Err(error) => {
            // Help and version output are reported through clap errors too.
            let _ = error.print();
            std::process::exit(cli::exit_code(&error));
        }
    };

    let default_filter = if cli.debug() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    for arg in &ignored {
        warn!("ignoring unknown argument {arg:?}");
    }

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}\n");
            eprintln!("{}", Cli::usage());
            std::process::exit(1);
        }
    };

    for warning in config.warnings() {
        warn!("{warning}");
    }

    if let Err(error) = cli::run(&config) {
        eprintln!("{BOLD_RED}error{RESET}{BOLD}:{RESET} {error}");
        std::process::exit(1);
    }
}
