use std::process::ExitCode;

use evdev_probe::{cli, logging};

fn main() -> ExitCode {
    logging::init();
    cli::run(cli::Tool::TouchpadEdges)
}
