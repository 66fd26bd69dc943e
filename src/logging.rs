use std::io::IsTerminal as _;

use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
};

/// Whether the terminal advertises 24-bit color through `COLORTERM` or `TERM`.
fn supports_truecolor(colorterm: Option<&str>, term: Option<&str>) -> bool {
    matches!(colorterm, Some("truecolor" | "24bit"))
        || matches!(term, Some("direct" | "truecolor"))
}

/// Installs the global subscriber for the binaries.
///
/// Filters at `INFO` unless `RUST_LOG` says otherwise. Output is pretty and colored only when
/// stdout is a truecolor terminal.
pub fn setup_logging() {
    let color = std::io::stdout().is_terminal()
        && supports_truecolor(
            std::env::var("COLORTERM").ok().as_deref(),
            std::env::var("TERM").ok().as_deref(),
        );

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt = fmt().with_env_filter(env_filter);

    if color {
        fmt.event_format(fmt::format().pretty())
            .with_ansi(true)
            .init();
    } else {
        fmt.with_ansi(false).init();
    }
}
