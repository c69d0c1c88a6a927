use std::process::ExitCode;

fn main() -> ExitCode {
    leadrelay_cli::run()
}
