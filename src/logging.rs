use std::{
    cmp::Reverse,
    ffi::OsStr,
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::SystemTime,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use parking_lot::Mutex;
use tracing::warn;
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_DIR_ENV: &str = "LEADBOT_LOG_DIR";
const LOG_PREFIX: &str = "leadbot";
const ACTIVE_FILE_NAME: &str = "leadbot.log";
const MAX_RETAINED_LOGS: usize = 14;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Appends to `leadbot.log` and renames it to a dated file when the local
/// day changes.
#[derive(Clone)]
struct DailyLogWriter {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    state: Mutex<WriterState>,
    log_dir: PathBuf,
}

struct WriterState {
    file: Option<BufWriter<fs::File>>,
    current_day: NaiveDate,
}

pub fn init() -> Result<()> {
    if FILE_GUARD.get().is_some() {
        return Ok(());
    }

    let log_dir = resolve_log_dir()?;
    let writer = DailyLogWriter::new(log_dir)?;
    let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
        .lossy(false)
        .finish(writer);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries command output, so log lines go to stderr.
    let console_layer = fmt::layer().with_writer(io::stderr).with_target(false);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    match subscriber.try_init() {
        Ok(_) => {
            let _ = FILE_GUARD.set(guard);
            install_panic_hook();
        }
        Err(_) => drop(guard),
    }

    Ok(())
}

impl DailyLogWriter {
    fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

        let active_path = log_dir.join(ACTIVE_FILE_NAME);
        let today = Local::now().date_naive();
        rotate_stale_file(&log_dir, &active_path, today)?;

        let state = WriterState {
            file: Some(open_writer(&active_path)?),
            current_day: today,
        };
        Ok(Self {
            inner: Arc::new(WriterInner {
                state: Mutex::new(state),
                log_dir,
            }),
        })
    }

    fn active_path(&self) -> PathBuf {
        self.inner.log_dir.join(ACTIVE_FILE_NAME)
    }

    fn rotate(&self, state: &mut WriterState, today: NaiveDate) -> Result<()> {
        if let Some(mut writer) = state.file.take() {
            if let Err(err) = writer.flush() {
                eprintln!("failed to flush log file before rotation: {err}");
            }
        }

        let active_path = self.active_path();
        if active_path.exists() {
            let rotated = unique_rotated_path(&self.inner.log_dir, state.current_day);
            fs::rename(&active_path, &rotated).with_context(|| {
                format!(
                    "failed to rotate log {} -> {}",
                    active_path.display(),
                    rotated.display()
                )
            })?;
            enforce_retention_logged(&self.inner.log_dir);
        }

        state.file = Some(open_writer(&active_path)?);
        state.current_day = today;
        Ok(())
    }
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let today = Local::now().date_naive();
        let mut state = self.inner.state.lock();

        if today != state.current_day {
            if let Err(err) = self.rotate(&mut state, today) {
                eprintln!("failed to rotate logs: {err:?}");
            }
        }

        if state.file.is_none() {
            state.file = Some(open_writer(&self.active_path()).map_err(io::Error::other)?);
            state.current_day = today;
        }

        let Some(writer) = state.file.as_mut() else {
            return Err(io::Error::other("log writer unavailable after rotation"));
        };
        writer.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.inner.state.lock();
        match state.file.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

fn open_writer(path: &Path) -> Result<BufWriter<fs::File>> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn rotate_stale_file(log_dir: &Path, active_path: &Path, today: NaiveDate) -> Result<()> {
    let metadata = match fs::metadata(active_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("unable to inspect existing log file {}", active_path.display())
            });
        }
    };

    let written_on = metadata
        .modified()
        .ok()
        .map(|modified| DateTime::<Local>::from(modified).date_naive())
        .unwrap_or(today);
    if written_on == today {
        return Ok(());
    }

    let rotated = unique_rotated_path(log_dir, written_on);
    fs::rename(active_path, &rotated).with_context(|| {
        format!(
            "failed to rotate stale log {} -> {}",
            active_path.display(),
            rotated.display()
        )
    })?;
    enforce_retention_logged(log_dir);
    Ok(())
}

fn unique_rotated_path(dir: &Path, day: NaiveDate) -> PathBuf {
    let base = format!("{}_{}", LOG_PREFIX, day.format("%Y-%m-%d"));
    let mut candidate = dir.join(format!("{base}.log"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{base}-{counter}.log"));
        counter += 1;
    }
    candidate
}

fn enforce_retention_logged(log_dir: &Path) {
    if let Err(err) = enforce_retention(log_dir) {
        warn!(
            "failed to enforce log retention in {}: {}",
            log_dir.display(),
            err
        );
    }
}

fn enforce_retention(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(log_dir)
        .with_context(|| format!("failed to inspect log directory {}", log_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        if file_name == ACTIVE_FILE_NAME || !file_name.starts_with(LOG_PREFIX) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, path));
    }

    entries.sort_by_key(|(modified, _)| Reverse(*modified));
    for (_, path) in entries.into_iter().skip(MAX_RETAINED_LOGS) {
        if let Err(err) = fs::remove_file(&path) {
            warn!("failed to remove expired log {}: {}", path.display(), err);
        }
    }
    Ok(())
}

fn resolve_log_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(LOG_DIR_ENV) {
        let path = PathBuf::from(dir);
        if path.is_absolute() {
            return Ok(path);
        }
        let base =
            std::env::current_dir().context("failed to resolve current working directory")?;
        return Ok(base.join(path));
    }

    let home = dirs::home_dir().context("unable to locate user home directory")?;
    Ok(home.join(".leadbot").join("logs"))
}

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                tracing::error!(
                    target: "panic",
                    file = location.file(),
                    line = location.line(),
                    message = %info
                );
            } else {
                tracing::error!(target: "panic", message = %info);
            }
            default_hook(info);
        }));
    });
}
