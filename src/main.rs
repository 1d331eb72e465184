// main.rs - tzst binary entry point
//
// Installs the Ctrl-C handler before dispatching, so an interruption during
// a long operation unwinds cooperatively (handles close, staged temp files
// are removed) and exits with code 130. Delegates to the CLI module so the
// whole surface stays testable as a library. RUST_LOG controls diagnostic
// logging.

fn main() {
    env_logger::init();
    if let Err(error) = tzst::interrupt::install_handler() {
        log::warn!("{error}; Ctrl-C will terminate without cleanup");
    }
    std::process::exit(tzst::cli::run());
}
