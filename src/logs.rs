//! Journal management: the append-only backup log stream.
use chrono::Local;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::Path,
    sync::Mutex,
};
use tracing::warn;

/// Append-only log stream shared by the cycle, the outer loop and the signal
/// thread. The handle is opened once and kept open for the process lifetime.
pub struct Journal {
    file: Mutex<File>,
}

impl Journal {
    /// Opens (creating if necessary) the journal file in append mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Writes one timestamped journal line per line of `message`.
    pub fn log(&self, message: &str) {
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for line in message.split('\n') {
            let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
            if let Err(err) = writeln!(file, "{ts} | {line}") {
                warn!("Failed to write journal line: {err}");
                return;
            }
        }

        if let Err(err) = file.flush() {
            warn!("Failed to flush journal: {err}");
        }
    }
}

/// Reads and prints the last `lines` lines of the journal.
///
/// # Arguments
/// * `path` - Path of the journal file.
/// * `lines` - The number of log lines to display.
pub fn tail_journal(path: &Path, lines: usize) -> io::Result<()> {
    if !path.exists() {
        eprintln!("Error: journal file {} not found.", path.display());
        return Ok(());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    for line in &all_lines[start..] {
        println!("{}", line);
    }

    Ok(())
}
