pub const LOG_FORMAT_ENV: &str = "CAREERS_LOG_FORMAT";

pub fn logs_are_json() -> bool {
    matches!(std::env::var(LOG_FORMAT_ENV).as_deref(), Ok("json"))
}

/// Set up logging from `RUST_LOG` (default `info`) and `CAREERS_LOG_FORMAT`.
/// Progress lines go to stdout; `CAREERS_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);
    let builder = tracing_subscriber::registry().with(filter);

    if logs_are_json() {
        let _ = builder.with(fmt_layer.json().flatten_event(true)).try_init();
    } else {
        let _ = builder.with(fmt_layer.compact()).try_init();
    }
}
