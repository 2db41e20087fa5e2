use clap::Parser;

fn main() {
    cli::init_logging();
    let args = cli::IndexArgs::parse();
    std::process::exit(cli::run_index(&args));
}
