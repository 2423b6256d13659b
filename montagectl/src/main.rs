use clap::Parser;

fn main() {
    let cli = montagectl::Cli::parse();
    if let Err(err) = montagectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
