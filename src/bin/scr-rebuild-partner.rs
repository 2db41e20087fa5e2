use clap::Parser;

fn main() {
    cli::init_logging();
    let args = cli::RebuildPartnerArgs::parse();
    std::process::exit(cli::run_rebuild_partner(&args));
}
