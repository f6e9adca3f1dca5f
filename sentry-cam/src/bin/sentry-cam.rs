use clap::Parser;

use sentry_cam::{run_app, CliArgs};

fn main() {
    let args = CliArgs::parse();
    std::process::exit(run_app(args));
}
