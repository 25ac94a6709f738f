//! Leveled stderr logging with `info!`, `warn!` and `error!` macros.
//!
//! Lines look like `2026-10-19 12:00:00.000 [WARN ] message`. The minimum
//! level comes from `CELLVM_LOG` (`info`, `warn`, `error` or `off`) once
//! [`init_from_env`] has run; the default is `info`. Setting
//! `CELLVM_LOG_TIMESTAMPS=0` drops the timestamp prefix. Macros compile to
//! nothing observable under `cfg(test)`.

use std::fmt::Display;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

/// Level value meaning "log nothing".
const OFF: u8 = u8::MAX;

static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static SHOW_TIMESTAMP: AtomicBool = AtomicBool::new(true);

/// Sets the minimum level that is written; `None` silences everything.
pub fn set_level(level: Option<Level>) {
    MIN_LEVEL.store(level.map_or(OFF, |l| l as u8), Ordering::Relaxed);
}

/// Turns the timestamp prefix on or off.
pub fn set_timestamps(show: bool) {
    SHOW_TIMESTAMP.store(show, Ordering::Relaxed);
}

/// Parses an on/off switch as accepted by `CELLVM_LOG_TIMESTAMPS`.
pub fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Parses a level name as accepted by `CELLVM_LOG`.
pub fn parse_level(name: &str) -> Option<Option<Level>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "info" => Some(Some(Level::Info)),
        "warn" | "warning" => Some(Some(Level::Warn)),
        "error" => Some(Some(Level::Error)),
        "off" | "none" => Some(None),
        _ => None,
    }
}

/// Applies `CELLVM_LOG` and `CELLVM_LOG_TIMESTAMPS` when set to recognized values.
pub fn init_from_env() {
    if let Some(level) = std::env::var("CELLVM_LOG").ok().as_deref().and_then(parse_level) {
        set_level(level);
    }
    if let Some(show) = std::env::var("CELLVM_LOG_TIMESTAMPS")
        .ok()
        .as_deref()
        .and_then(parse_switch)
    {
        set_timestamps(show);
    }
}

/// Converts days since the Unix epoch to (year, month, day).
fn days_to_date(days: u64) -> (u32, u32, u32) {
    // Howard Hinnant's civil_from_days
    let z = days as i64 + 719468;
    let era = z.div_euclid(146097);
    let doe = z.rem_euclid(146097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as u32, m, d)
}

/// Internal logging function. Use the `info!`, `warn!`, or `error!` macros instead.
#[doc(hidden)]
pub fn log(level: Level, message: &str) {
    if (level as u8) < MIN_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let mut spec = ColorSpec::new();
    match level {
        Level::Warn => {
            spec.set_fg(Some(Color::Yellow)).set_bold(true);
        }
        Level::Error => {
            spec.set_fg(Some(Color::Red)).set_bold(true);
        }
        Level::Info => {}
    }
    let _ = stderr.set_color(&spec);

    if SHOW_TIMESTAMP.load(Ordering::Relaxed) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs();
        let (year, month, day) = days_to_date(secs / 86400);
        let _ = write!(
            stderr,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03} ",
            year,
            month,
            day,
            (secs / 3600) % 24,
            (secs / 60) % 60,
            secs % 60,
            now.subsec_millis()
        );
    }
    let _ = writeln!(stderr, "[{:5}] {}", level, message);
    let _ = stderr.reset();
}

/// Logs an info-level message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Info, &format!($($arg)*));
        }
    }};
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Warn, &format!($($arg)*));
        }
    }};
}

/// Logs an error-level message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Error, &format!($($arg)*));
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn level_display() {
        assert_eq!(Level::Info.to_string(), "INFO");
        assert_eq!(Level::Error.to_string(), "ERROR");
    }

    #[test]
    fn parse_level_names() {
        assert_eq!(parse_level("WARN"), Some(Some(Level::Warn)));
        assert_eq!(parse_level(" off "), Some(None));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn parse_timestamp_switch() {
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch(" OFF"), Some(false));
        assert_eq!(parse_switch("yes"), Some(true));
        assert_eq!(parse_switch("maybe"), None);
    }

    #[test]
    fn set_timestamps_toggles_the_prefix() {
        set_timestamps(false);
        assert!(!SHOW_TIMESTAMP.load(Ordering::Relaxed));
        set_timestamps(true);
        assert!(SHOW_TIMESTAMP.load(Ordering::Relaxed));
    }

    #[test]
    fn days_to_date_epoch() {
        assert_eq!(days_to_date(0), (1970, 1, 1));
    }

    #[test]
    fn days_to_date_leap_day() {
        // 2024-02-29 is 19782 days after the epoch
        assert_eq!(days_to_date(19782), (2024, 2, 29));
    }
}
