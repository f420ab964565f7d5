use std::process::ExitCode;

fn main() -> ExitCode {
    ticket_merge_cli::run()
}
