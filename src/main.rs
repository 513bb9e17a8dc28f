//! Binary entry point for `atomic-build`.

use std::process;

fn main() {
    if let Err(e) = atomic_build::run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
