use gemini_proxy::cli::run_gemini_proxy;

fn main() {
    if let Err(err) = run_gemini_proxy() {
        tracing::error!(error = %err, "gemini-proxy failed");
        eprintln!("{err}");
        std::process::exit(1);
    }
}
