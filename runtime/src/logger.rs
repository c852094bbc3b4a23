use std::time::SystemTime;

use log::{Level, LevelFilter};
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

/// Terminal logger. The cache runs its expiry sweeper on its own thread
/// next to the host's workers, so every line carries the thread name to
/// tell eviction traffic apart from query traffic.
pub struct Logger;

static LOGGER: Logger = Logger;

/// Install the logger process-wide. Later calls are no-ops, so tests may
/// call this freely.
pub fn init(level: LevelFilter) {
	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}

fn color(level: Level) -> Color {
	match level {
		Level::Trace => Color::Purple,
		Level::Debug => Color::Blue,
		Level::Info => Color::Green,
		Level::Warn => Color::Yellow,
		Level::Error => Color::Red,
	}
}

impl log::Log for Logger {
	fn enabled(&self, metadata: &log::Metadata) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &log::Record) {
		if !self.enabled(record.metadata()) {
			return;
		}

		// Cache times are whole seconds; sub-second timestamps would
		// suggest precision the entries themselves do not have.
		let time = humantime::format_rfc3339_seconds(SystemTime::now());

		let thread = std::thread::current();

		let dim = Style::new().dimmed().prefix();
		let bold = Style::new().bold().prefix();

		eprintln!(
			"{dim}{time}{RESET} {}{:5}{RESET} {dim}[{}]{RESET} {bold}{}{RESET}{dim}:{RESET} {}",
			color(record.level()).bold().prefix(),
			record.level(),
			thread.name().unwrap_or("?"),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}
