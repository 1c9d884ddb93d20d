use std::process::ExitCode;

fn main() -> ExitCode {
    consulta_cli::run()
}
