//! Status lines printed to stderr, outside the log stream.

use console::style;

pub fn success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold().for_stderr(), message);
}

pub fn info(message: &str) {
    eprintln!("{} {}", style("ℹ").blue().bold().for_stderr(), message);
}

pub fn warning(message: &str) {
    eprintln!(
        "{} {}",
        style("⚠").yellow().bold().for_stderr(),
        style(message).yellow().for_stderr()
    );
}

/// The banner shown once the server listens.
pub fn server_ready(url: &str, elapsed_ms: u128) {
    eprintln!();
    eprintln!(
        "  {} {}",
        style("dpack").green().bold().for_stderr(),
        style(format!("ready in {elapsed_ms} ms")).dim().for_stderr()
    );
    eprintln!();
    print_url(url);
    eprintln!();
}

pub fn print_url(url: &str) {
    eprintln!(
        "  {}  {}   {}",
        style("➜").green().for_stderr(),
        style("Local:").bold().for_stderr(),
        style(url).cyan().for_stderr()
    );
}

/// A dimmed line under the banner.
pub fn hint(message: &str) {
    eprintln!("  {}", style(message).dim().for_stderr());
}

/// Apply `--no-color` and `NO_COLOR`/`FORCE_COLOR` to everything printed here.
pub fn init_colors(no_color: bool) {
    console::set_colors_enabled_stderr(!no_color && crate::logger::should_use_colors());
}
