use clap::Parser;

fn main() {
    cli::init_logging();
    let args = cli::CopyArgs::parse();
    std::process::exit(cli::run_copy(&args));
}
