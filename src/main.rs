fn main() {
    if let Err(err) = kestrel::cli::main() {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
