use env_logger::Env;

/// Diagnostics go to stderr; stdout carries the progress line and summary.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .try_init();
}
