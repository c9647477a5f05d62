fn main() {
    if let Err(err) = entrainer_lib::run() {
        log::error!("entrainer failed: {err:#}");
        eprintln!("entrainer failed: {err:#}");
        std::process::exit(1);
    }
}
