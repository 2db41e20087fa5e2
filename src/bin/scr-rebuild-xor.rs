use clap::Parser;

fn main() {
    cli::init_logging();
    let args = cli::RebuildXorArgs::parse();
    std::process::exit(cli::run_rebuild_xor(&args));
}
