//! Binary entry point for the distill-pack CLI.

use distill_pack::cmd::App;

fn main() {
    if let Err(e) = App::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
