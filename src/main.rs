fn main() {
    if let Err(e) = careloom::run() {
        eprintln!("careloom: {e}");
        std::process::exit(1);
    }
}
