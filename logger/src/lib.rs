//! Default logging setup for parameter store binaries.
//!
//! Every log line is prefixed with the elapsed time and the resident memory of the process, as
//! the size of the weight storage is usually what one is watching when running a model.
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(missing_docs)]

use std::{
    fmt,
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Instant,
};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "PSTORE_LOG";
/// Environment variable controlling colored output.
pub const LOG_STYLE_ENV: &str = "PSTORE_LOG_STYLE";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Bytes(usize);

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // switch units before the number needs a fourth integer digit
        let (shift, unit) = match self.0 {
            n if n < 1000 => return write!(f, "{n:5}B"),
            n if n < 1000 << 10 => (10, 'K'),
            n if n < 1000 << 20 => (20, 'M'),
            _ => (30, 'G'),
        };
        write!(f, "{:5.1}{unit}", self.0 as f64 / (1u64 << shift) as f64)
    }
}

#[derive(Debug, Clone, Copy)]
struct Rss {
    current: Bytes,
    peak: Bytes,
}

#[cfg(all(target_os = "linux", not(miri)))]
mod platform {
    use std::{
        cell::RefCell,
        fs::File,
        io::{Read, Seek, SeekFrom},
    };

    struct Statm {
        file: File,
        buf: String,
        page_size: usize,
    }

    thread_local! {
        static STATM: RefCell<Option<Statm>> = const { RefCell::new(None) };
    }

    fn max_rss_bytes() -> usize {
        // SAFETY: rusage is plain old data so all zeros is valid
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        // SAFETY: getrusage only writes to the passed pointer, which is valid
        if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } < 0 {
            return 0;
        }
        // linux reports kilobytes
        usage.ru_maxrss as usize * 1024
    }

    fn current_rss_bytes() -> usize {
        STATM.with_borrow_mut(|statm| {
            if statm.is_none() {
                let Ok(file) = File::open("/proc/self/statm") else {
                    return 0;
                };
                // SAFETY: sysconf has no preconditions
                let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
                *statm = Some(Statm {
                    file,
                    buf: String::new(),
                    page_size,
                });
            }
            let Some(statm) = statm.as_mut() else {
                return 0;
            };
            statm.buf.clear();
            if statm.file.seek(SeekFrom::Start(0)).is_err()
                || statm.file.read_to_string(&mut statm.buf).is_err()
            {
                return 0;
            }
            // second column is the resident set in pages
            statm
                .buf
                .split_ascii_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<usize>().ok())
                .map_or(0, |pages| pages * statm.page_size)
        })
    }

    pub(super) fn rss() -> (usize, usize) {
        (current_rss_bytes(), max_rss_bytes())
    }
}

#[cfg(all(target_os = "macos", not(miri)))]
mod platform {
    pub(super) fn rss() -> (usize, usize) {
        // SAFETY: rusage is plain old data so all zeros is valid
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        // SAFETY: getrusage only writes to the passed pointer, which is valid
        if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } < 0 {
            return (0, 0);
        }

        // SAFETY: proc_taskallinfo is plain old data so all zeros is valid
        let mut info: libc::proc_taskallinfo = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::proc_taskallinfo>() as i32;
        // SAFETY: proc_pidinfo writes at most `size` bytes to the passed pointer, which points
        // to a value of exactly that size
        let written = unsafe {
            libc::proc_pidinfo(
                libc::getpid(),
                libc::PROC_PIDTASKALLINFO,
                0,
                ((&mut info) as *mut libc::proc_taskallinfo).cast::<libc::c_void>(),
                size,
            )
        };
        let current = if written < size {
            0
        } else {
            info.ptinfo.pti_resident_size as usize
        };
        // macos reports bytes
        (current, usage.ru_maxrss as usize)
    }
}

#[cfg(any(miri, not(any(target_os = "linux", target_os = "macos"))))]
mod platform {
    pub(super) fn rss() -> (usize, usize) {
        (0, 0)
    }
}

impl Rss {
    fn now() -> Self {
        let (current, peak) = platform::rss();
        Self {
            current: Bytes(current),
            peak: Bytes(peak),
        }
    }
}

const TIMESTAMP_STYLE: anstyle::Style =
    anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::BrightBlack)));
const CURRENT_STYLE: anstyle::Style =
    anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Blue)));
const PEAK_STYLE: anstyle::Style =
    anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::BrightBlack)));
const NEW_PEAK_STYLE: anstyle::Style =
    anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));
const TARGET_STYLE: anstyle::Style =
    anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Magenta)));

/// Prefix shared by the target header and the message lines.
struct Prefix {
    elapsed: std::time::Duration,
    rss: Rss,
    new_peak: bool,
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peak_style = if self.new_peak {
            NEW_PEAK_STYLE
        } else {
            PEAK_STYLE
        };
        write!(
            f,
            "{ts}{elapsed:>9.2?}{ts:#} {cur}{current}{cur:#} {pk}{peak}{pk:#}",
            ts = TIMESTAMP_STYLE,
            elapsed = self.elapsed,
            cur = CURRENT_STYLE,
            current = self.rss.current,
            pk = peak_style,
            peak = self.rss.peak,
        )
    }
}

/// Installs the default logger, using `default_filter` when [`LOG_ENV`] is unset.
///
/// Panics when a logger was already installed.
pub fn setup_with_default(default_filter: &str) {
    let start = Instant::now();
    let peak = AtomicUsize::new(Rss::now().peak.0);
    let last_target = Mutex::new(String::new());

    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or(LOG_ENV, default_filter)
            .write_style(LOG_STYLE_ENV),
    )
    .format(move |buf, record| {
        let rss = Rss::now();
        let prefix = Prefix {
            elapsed: start.elapsed(),
            rss,
            new_peak: peak.fetch_max(rss.peak.0, Ordering::Relaxed) < rss.peak.0,
        };

        let target = record.target();
        {
            let mut last_target = last_target.lock().unwrap_or_else(|err| err.into_inner());
            if *last_target != target {
                last_target.clear();
                last_target.push_str(target);
                writeln!(buf, "{prefix} {TARGET_STYLE}{target}{TARGET_STYLE:#}")?;
            }
        }

        let level_style = buf.default_level_style(record.level());
        writeln!(
            buf,
            "{prefix} {level_style}{level}{level_style:#} {args}",
            level = record.level(),
            args = record.args(),
        )
    })
    .init();
}

/// Performs the default logging setup, logging at `info` unless [`LOG_ENV`] says otherwise.
pub fn setup() {
    setup_with_default("info")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_amounts_format_with_units() {
        assert_eq!(Bytes(12).to_string(), "   12B");
        assert_eq!(Bytes(2048).to_string(), "  2.0K");
        assert_eq!(Bytes(3 << 20).to_string(), "  3.0M");
        assert_eq!(Bytes(5 << 30).to_string(), "  5.0G");
    }
}
