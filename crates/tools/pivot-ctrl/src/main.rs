pub mod cli;
pub mod system;

pub fn main() {
    if let Err(report) = cli::main() {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}
