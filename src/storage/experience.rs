//! Experience log - rotating JSONL buffer of cycle outcomes
//!
//! One line per cycle. Appends write a whole record in a single call so a
//! torn write can only ever damage the final line, and readers skip lines
//! that fail to parse. Rotation rewrites the surviving window through a
//! temp file and a rename.
//!
//! Single writer only. Sharing the file between processes would need
//! file locking around `append`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default number of experiences kept in the window
pub const MAX_EXPERIENCES: usize = 100;

/// Maximum characters of work output kept per experience
pub const MAX_SUMMARY_CHARS: usize = 300;

/// One cycle's raw, unverified outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    /// Truncated work output, only used for keyword attribution
    #[serde(default)]
    pub output_summary: String,
    #[serde(default)]
    pub was_exploration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model that executed the cycle, if the executor reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// What the work executor hands back after running a cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkOutcome {
    pub success: bool,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// For exploration cycles: what the experiment set out to test
    #[serde(default)]
    pub hypothesis: Option<String>,
}

impl Experience {
    /// Build the experience for `cycle` from an executor outcome.
    ///
    /// Negative or non-finite costs are recorded as zero.
    pub fn from_outcome(cycle: u64, was_exploration: bool, outcome: &WorkOutcome) -> Self {
        let cost = if outcome.cost.is_finite() && outcome.cost > 0.0 {
            outcome.cost
        } else {
            0.0
        };

        Self {
            cycle,
            timestamp: Utc::now(),
            success: outcome.success,
            cost,
            duration_ms: outcome.duration_ms,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
            output_summary: truncate_chars(&outcome.output, MAX_SUMMARY_CHARS),
            was_exploration,
            error: outcome.error.clone(),
            model: outcome.model.clone(),
        }
    }
}

/// Truncate on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Append-only rotating experience buffer backed by a JSONL file
#[derive(Debug, Clone)]
pub struct ExperienceLog {
    path: PathBuf,
    capacity: usize,
}

impl ExperienceLog {
    /// Open (lazily) the log at `path`, keeping at most `capacity` records
    pub fn open(path: &Path, capacity: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one experience, rotating the window if it overflowed
    pub fn append(&self, experience: &Experience) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line = String::new();
        if self.ends_mid_line()? {
            // A previous write was torn; start the record on a fresh line
            warn!("Experience log {:?} ends mid-record, starting a new line", self.path);
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(experience)?);
        line.push('\n');

        {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("opening experience log {:?}", self.path))?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }

        debug!("Appended experience for cycle {}", experience.cycle);

        let records = self.read_all()?;
        if records.len() > self.capacity {
            let keep = &records[records.len() - self.capacity..];
            self.rewrite(keep)?;
            debug!(
                "Rotated experience log: dropped {} oldest records",
                records.len() - self.capacity
            );
        }

        Ok(())
    }

    /// Last `n` experiences, oldest first
    pub fn recent(&self, n: usize) -> Result<Vec<Experience>> {
        let mut records = self.read_all()?;
        if records.len() > n {
            records.drain(..records.len() - n);
        }
        Ok(records)
    }

    /// Every experience in the window, oldest first
    pub fn all(&self) -> Result<Vec<Experience>> {
        self.read_all()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn ends_mid_line(&self) -> Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }

    fn read_all(&self) -> Result<Vec<Experience>> {
        // Bytes, not a String: a torn write may end mid-character
        let content = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading experience log {:?}", self.path))
            }
        };

        let mut records = Vec::new();
        for (lineno, line) in content.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Experience>(line) {
                Ok(exp) => records.push(exp),
                Err(e) => warn!(
                    "Skipping unreadable experience at {:?}:{}: {}",
                    self.path,
                    lineno + 1,
                    e
                ),
            }
        }

        Ok(records)
    }

    fn rewrite(&self, records: &[Experience]) -> Result<()> {
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
