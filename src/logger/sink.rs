//! Log outputs: rotating files and a lock-per-output fan-out.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tracing_appender::rolling::{self, InitError, RollingFileAppender};

const MEGABYTE: u64 = 1024 * 1024;
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// How the log file rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// One fixed file name, see [`RotatingFile`].
    #[default]
    Size,
    /// `<dir>/YYYY-MM-DD.<ext>`, see [`daily_file`].
    Daily,
}

/// Opens a file that switches to `<dir>/YYYY-MM-DD.<ext>` every day.
///
/// The directory and extension come from `path`; its stem is ignored. Dates
/// are UTC. At most `max_files` dated files are kept, zero keeps them all.
pub fn daily_file(path: &Path, max_files: usize) -> Result<RollingFileAppender, InitError> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let mut builder = RollingFileAppender::builder().rotation(rolling::Rotation::DAILY);
    if let Some(ext) = path.extension() {
        builder = builder.filename_suffix(ext.to_string_lossy());
    }
    if max_files > 0 {
        builder = builder.max_log_files(max_files);
    }
    builder.build(dir)
}

/// A file writer that rotates on size and prunes old backups.
///
/// When a write would push the active file past `max_size`, the file is
/// renamed to `<stem>-<timestamp>.<ext>` (gzipped when `compress` is set) and
/// a fresh file is started. Backups beyond `max_backups` or older than
/// `max_age` are removed; zero disables either limit.
///
/// The file is opened on first write, so building one never touches disk.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    max_backups: usize,
    max_age: Option<Duration>,
    compress: bool,
    file: Option<File>,
    size: u64,
}

impl RotatingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size: 100 * MEGABYTE,
            max_backups: 0,
            max_age: None,
            compress: false,
            file: None,
            size: 0,
        }
    }

    pub fn max_size_mb(self, megabytes: u64) -> Self {
        self.max_size_bytes(megabytes.saturating_mul(MEGABYTE))
    }

    /// Zero falls back to 100 MB.
    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size = if bytes == 0 { 100 * MEGABYTE } else { bytes };
        self
    }

    pub fn max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }

    pub fn max_age_days(mut self, days: u64) -> Self {
        self.max_age = (days > 0).then(|| Duration::from_secs(days * 24 * 60 * 60));
        self
    }

    pub fn compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self, now: DateTime<Local>) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        let backup = self.backup_name(now);
        fs::rename(&self.path, &backup)?;
        if self.compress {
            compress_file(&backup)?;
        }
        self.prune(now)?;
        self.open()
    }

    fn stem_and_ext(&self) -> (String, String) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    fn backup_name(&self, now: DateTime<Local>) -> PathBuf {
        let dir = self.path.parent().unwrap_or(Path::new(""));
        let (stem, ext) = self.stem_and_ext();
        let mut stamp = now;
        loop {
            let name = format!("{}-{}{}", stem, stamp.format(BACKUP_TIME_FORMAT), ext);
            let path = dir.join(&name);
            if !path.exists() && !dir.join(format!("{name}.gz")).exists() {
                return path;
            }
            stamp += chrono::Duration::milliseconds(1);
        }
    }

    fn prune(&self, now: DateTime<Local>) -> io::Result<()> {
        if self.max_backups == 0 && self.max_age.is_none() {
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let (stem, ext) = self.stem_and_ext();

        let mut backups: Vec<(DateTime<Local>, PathBuf)> = fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                backup_time(&name, &stem, &ext).map(|t| (t, entry.path()))
            })
            .collect();
        backups.sort_by(|a, b| b.0.cmp(&a.0));

        for (index, (time, path)) in backups.iter().enumerate() {
            let too_many = self.max_backups > 0 && index >= self.max_backups;
            let too_old = self.max_age.is_some_and(|age| {
                now.signed_duration_since(*time)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed > age)
            });
            if too_many || too_old {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], now: DateTime<Local>) -> io::Result<usize> {
        if self.file.is_none() {
            self.open()?;
        }

        if self.size > 0 && self.size + buf.len() as u64 > self.max_size {
            self.rotate(now)?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file is not open"))?;
        let written = file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, Local::now())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Parses the timestamp out of `<stem>-<timestamp><ext>[.gz]`.
fn backup_time(name: &str, stem: &str, ext: &str) -> Option<DateTime<Local>> {
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let stamp = name
        .strip_prefix(stem)?
        .strip_prefix('-')?
        .strip_suffix(ext)?;
    let naive = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn compress_file(path: &Path) -> io::Result<()> {
    let mut gz_name = path.as_os_str().to_os_string();
    gz_name.push(".gz");

    let mut input = File::open(path)?;
    let output = File::create(PathBuf::from(gz_name))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(path)
}

/// Fans records out to several writers, each behind its own lock.
#[derive(Default)]
pub struct Sink {
    outputs: Vec<Mutex<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.outputs.push(Mutex::new(Box::new(output)));
        self
    }

    /// Writes one encoded record to every output.
    ///
    /// Failures are reported on stderr and never returned.
    pub fn write(&self, bytes: &[u8]) {
        for output in &self.outputs {
            let mut output = output.lock();
            if let Err(e) = output.write_all(bytes).and_then(|()| output.flush()) {
                eprintln!("log sink write failed: {e}");
            }
        }
    }
}
