use std::process::ExitCode;

use loomc_driver::Loomc;

fn main() -> ExitCode {
    env_logger::init();

    // Frontends are registered by host builds; the stock binary ships
    // without one and reports inputs it cannot ingest.
    match Loomc::run(std::env::args_os(), &[]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("loomc: {report:#}");
            ExitCode::FAILURE
        }
    }
}
