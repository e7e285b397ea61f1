use std::process::ExitCode;

fn main() -> ExitCode {
    kvmark::cmdline()
}
