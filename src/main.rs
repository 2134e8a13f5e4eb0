mod cli;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            cat_cache::logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
