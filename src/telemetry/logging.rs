use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing::{error, info, Level};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogCategory {
    Towns,
    Protection,
    Datasource,
    Error,
}

impl LogCategory {
    pub const ALL: [LogCategory; 4] = [
        LogCategory::Towns,
        LogCategory::Protection,
        LogCategory::Datasource,
        LogCategory::Error,
    ];

    /// The `tracing` target routed to this category's file.
    pub fn target(self) -> &'static str {
        match self {
            LogCategory::Towns => "towns",
            LogCategory::Protection => "protection",
            LogCategory::Datasource => "datasource",
            LogCategory::Error => "error",
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            LogCategory::Towns => "towns.log",
            LogCategory::Protection => "protection.log",
            LogCategory::Datasource => "datasource.log",
            LogCategory::Error => "error.log",
        }
    }

    fn has_header(self) -> bool {
        !matches!(self, LogCategory::Error)
    }
}

static INITIALIZED: OnceLock<()> = OnceLock::new();

const HEADER_LINE: &str = "-------------------------------------------------------------------------------";
const HEADER_TITLE: &str = "Towns - land claims and protection";

const WEEKDAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Installs the global subscriber. Each category gets its own file under
/// `<root>/log/`; `error.log` collects every error regardless of target, and
/// warnings also go to stderr. `TOWNS_LOG` sets the level of the category
/// files (default `info`).
pub fn init(root: &Path) -> Result<(), String> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }
    let level = match std::env::var("TOWNS_LOG") {
        Ok(value) => LevelFilter::from_str(value.trim())
            .map_err(|_| format!("invalid TOWNS_LOG level '{}'", value))?,
        Err(_) => LevelFilter::INFO,
    };
    let log_dir = root.join("log");
    std::fs::create_dir_all(&log_dir)
        .map_err(|err| format!("log directory create failed: {}", err))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    for category in LogCategory::ALL {
        let file = open_log(&log_dir, category)?;
        let filter = match category {
            LogCategory::Error => Targets::new().with_default(Level::ERROR),
            other => Targets::new().with_target(other.target(), level),
        };
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_timer(LogTime)
                .with_filter(filter)
                .boxed(),
        );
    }
    layers.push(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(LogTime)
            .with_filter(LevelFilter::WARN)
            .boxed(),
    );

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|err| format!("log system init failed: {}", err))?;
    let _ = INITIALIZED.set(());
    Ok(())
}

pub fn log_towns(message: &str) {
    info!(target: "towns", "{message}");
}

pub fn log_protection(message: &str) {
    info!(target: "protection", "{message}");
}

pub fn log_datasource(message: &str) {
    info!(target: "datasource", "{message}");
}

pub fn log_error(message: &str) {
    error!(target: "error", "{message}");
}

fn open_log(log_dir: &Path, category: LogCategory) -> Result<File, String> {
    let name = category.file_name();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(name))
        .map_err(|err| format!("open log {} failed: {}", name, err))?;
    if category.has_header() && file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
        write_header(&mut file, name)?;
    }
    Ok(file)
}

fn write_header(file: &mut File, name: &str) -> Result<(), String> {
    let timestamp = format_header_timestamp(unix_timestamp());
    writeln!(file, "{HEADER_LINE}").map_err(|err| format!("header write failed: {}", err))?;
    writeln!(file, "{HEADER_TITLE}").map_err(|err| format!("header write failed: {}", err))?;
    writeln!(file, "{name} - started {timestamp}")
        .map_err(|err| format!("header write failed: {}", err))?;
    Ok(())
}

/// `dd.mm.yyyy hh:mm:ss` in UTC.
struct LogTime;

impl FormatTime for LogTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        w.write_str(&format_timestamp(unix_timestamp()))
    }
}

fn format_header_timestamp(ts: i64) -> String {
    let datetime = breakdown_timestamp(ts);
    let weekday = WEEKDAYS[(datetime.weekday as usize).min(6)];
    let month = MONTHS[(datetime.month as usize).saturating_sub(1).min(11)];
    format!(
        "{weekday} {month} {:>2} {:02}:{:02}:{:02} {}",
        datetime.day, datetime.hour, datetime.minute, datetime.second, datetime.year
    )
}

fn format_timestamp(ts: i64) -> String {
    let datetime = breakdown_timestamp(ts);
    format!(
        "{:02}.{:02}.{} {:02}:{:02}:{:02}",
        datetime.day, datetime.month, datetime.year, datetime.hour, datetime.minute, datetime.second
    )
}

fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct DateTimeParts {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    weekday: u32,
}

fn breakdown_timestamp(ts: i64) -> DateTimeParts {
    let secs = ts.max(0);
    let days = secs / 86_400;
    let seconds_of_day = (secs % 86_400) as u32;
    let (year, month, day) = civil_from_days(days);
    DateTimeParts {
        year,
        month,
        day,
        hour: seconds_of_day / 3_600,
        minute: (seconds_of_day % 3_600) / 60,
        second: seconds_of_day % 60,
        weekday: (days % 7) as u32,
    }
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = (yoe + era * 400 + i64::from(month <= 2)) as i32;
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_utc_calendar_dates() {
        assert_eq!(format_timestamp(0), "01.01.1970 00:00:00");
        assert_eq!(format_timestamp(951_782_400 + 3_661), "29.02.2000 01:01:01");
        assert_eq!(format_header_timestamp(0), "Thu Jan  1 00:00:00 1970");
    }

    #[test]
    fn headers_are_written_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        drop(open_log(dir.path(), LogCategory::Towns).expect("open"));
        drop(open_log(dir.path(), LogCategory::Towns).expect("reopen"));
        let contents = std::fs::read_to_string(dir.path().join("towns.log")).expect("read");
        assert_eq!(contents.matches(HEADER_TITLE).count(), 1);
        assert!(contents.contains("towns.log - started"));

        drop(open_log(dir.path(), LogCategory::Error).expect("open error log"));
        let errors = std::fs::read_to_string(dir.path().join("error.log")).expect("read");
        assert!(errors.is_empty());
    }
}
