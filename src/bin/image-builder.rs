use std::process::ExitCode;

use clap::Parser;
use image_builder::RunStatus;

mod workflows;

use workflows::Cli;

const EXIT_CONFIG: u8 = 1;
const EXIT_FAILED: u8 = 2;
const EXIT_DEGRADED: u8 = 3;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let usage_error = err.use_stderr();
            let _ = err.print();
            return if usage_error {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    workflows::init_logging(cli.verbose, cli.quiet);

    if cli.list_stages {
        return match workflows::list_stages() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("Error: {err:#}");
                ExitCode::from(EXIT_CONFIG)
            }
        };
    }

    match workflows::run_build(&cli) {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::Degraded) => ExitCode::from(EXIT_DEGRADED),
        Ok(RunStatus::Failed) => ExitCode::from(EXIT_FAILED),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}
