//! Log output for the `praxis` binary.
//!
//! The chat and auth services share `<runtime>/logs` but never a file: each
//! writes `praxis-<service>-YYYY-MM-DD-HH.log`, one file per UTC hour.
//! Interactive commands log to stderr so their stdout stays clean.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, NaiveDateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_RETENTION_DAYS: i64 = 30;
const NAME_PREFIX: &str = "praxis-";
const NAME_SUFFIX: &str = ".log";
const HOUR_STAMP: &str = "%Y-%m-%d-%H";

/// Long-running process that owns a set of log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Service {
    Chat,
    Auth,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::Chat, Service::Auth];

    pub fn label(self) -> &'static str {
        match self {
            Service::Chat => "chat",
            Service::Auth => "auth",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}

/// Identity of one hourly file: which service wrote it and for which hour.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogName {
    pub hour: DateTime<Utc>,
    pub service: Service,
}

impl LogName {
    pub fn at(service: Service, now: DateTime<Utc>) -> Self {
        Self {
            hour: now.duration_trunc(Duration::hours(1)).unwrap_or(now),
            service,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{NAME_PREFIX}{}-{}{NAME_SUFFIX}",
            self.service.label(),
            self.hour.format(HOUR_STAMP)
        )
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let body = file_name
            .strip_prefix(NAME_PREFIX)?
            .strip_suffix(NAME_SUFFIX)?;
        let (label, stamp) = body.split_once('-')?;
        let service = Service::from_label(label)?;
        let hour = NaiveDateTime::parse_from_str(&format!("{stamp}:00"), "%Y-%m-%d-%H:%M")
            .ok()?
            .and_utc();
        Some(Self { hour, service })
    }
}

pub fn log_dir_for(runtime_data_dir: &str) -> PathBuf {
    PathBuf::from(runtime_data_dir).join("logs")
}

fn default_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Route this process's tracing output to the hourly files of `service`.
pub fn init_logging(runtime_data_dir: &str, service: Service) -> Result<()> {
    let dir = log_dir_for(runtime_data_dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_ansi(false)
        .with_writer(ServiceLog::new(dir.clone(), service, LOG_RETENTION_DAYS))
        .init();
    tracing::info!("{} service logging to {}", service.label(), dir.display());
    Ok(())
}

pub fn init_console_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(io::stderr)
        .init();
}

/// Append-only writer for one service. The file for the current hour is
/// opened on first write, and expired files are pruned whenever a new one
/// is opened.
#[derive(Debug)]
struct ServiceLog {
    dir: PathBuf,
    service: Service,
    retention_days: i64,
    open: Mutex<Option<(LogName, File)>>,
}

impl ServiceLog {
    fn new(dir: PathBuf, service: Service, retention_days: i64) -> Self {
        Self {
            dir,
            service,
            retention_days,
            open: Mutex::new(None),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Option<(LogName, File)>>> {
        self.open
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))
    }

    fn write_at(&self, now: DateTime<Utc>, buf: &[u8]) -> io::Result<usize> {
        let wanted = LogName::at(self.service, now);
        let mut open = self.lock()?;
        let (name, mut file) = match open.take() {
            Some((name, file)) if name == wanted => (name, file),
            previous => {
                if let Some((_, mut old)) = previous {
                    old.flush()?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.dir.join(wanted.file_name()))?;
                let _ = prune_expired(&self.dir, now, self.retention_days);
                (wanted, file)
            }
        };
        let written = file.write(buf);
        *open = Some((name, file));
        written
    }
}

impl Write for &ServiceLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(Utc::now(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock()?.as_mut() {
            Some((_, file)) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for ServiceLog {
    type Writer = &'a ServiceLog;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Every recognised log file in `dir`, ordered by hour then service.
pub fn log_files(dir: &Path) -> Result<Vec<(LogName, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(LogName::parse);
        if let (Some(name), true) = (name, path.is_file()) {
            files.push((name, path));
        }
    }
    files.sort();
    Ok(files)
}

/// Delete files of any service older than the retention window. Returns
/// how many were removed.
pub fn prune_expired(dir: &Path, now: DateTime<Utc>, retention_days: i64) -> Result<usize> {
    let cutoff = now - Duration::days(retention_days);
    let mut removed = 0;
    for (name, path) in log_files(dir)? {
        if name.hour < cutoff && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Last `max_lines` lines written by `service` (or by anyone when `None`),
/// oldest first. Reads files newest first and stops once enough are found.
pub fn tail_logs(dir: &Path, service: Option<Service>, max_lines: usize) -> Result<Vec<String>> {
    let mut newest_first = Vec::with_capacity(max_lines);
    for (name, path) in log_files(dir)?.into_iter().rev() {
        if newest_first.len() >= max_lines {
            break;
        }
        if service.is_some_and(|s| s != name.service) {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let wanted = max_lines - newest_first.len();
        newest_first.extend(content.lines().rev().take(wanted).map(str::to_string));
    }
    newest_first.reverse();
    Ok(newest_first)
}
