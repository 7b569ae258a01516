use chrono::Local;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;
use tracing::info;

use crate::Result;
use crate::config::RotationPolicy;
use crate::config::RotationTrigger;
use crate::error::RingcapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Open,
    /// The current file met its threshold, the next block goes to a new file.
    Rotating,
    Closed,
}

/// Counters of the file being written.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub packets: u64,
    opened: Instant,
}

/// Owns the current output file and the ring of files written so far.
#[derive(Debug)]
pub struct OutputController {
    template: PathBuf,
    policy: RotationPolicy,
    state: OutputState,
    fs: Option<BufWriter<File>>,
    current: Option<OutputFile>,
    sequence: u64,
    /// Files on disk, oldest first.
    ring: VecDeque<PathBuf>,
}

impl OutputController {
    pub fn new<P: AsRef<Path>>(template: P, policy: RotationPolicy) -> OutputController {
        OutputController {
            template: template.as_ref().to_path_buf(),
            policy,
            state: OutputState::Closed,
            fs: None,
            current: None,
            sequence: 0,
            ring: VecDeque::new(),
        }
    }
    /// `dir/name.ext` becomes `dir/name_NNNNN_YYYYMMDDHHMMSS.ext` when rotating.
    fn gen_filename(&self) -> PathBuf {
        if !self.policy.is_enabled() {
            return self.template.clone();
        }
        let stem = self
            .template
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let now = Local::now().format("%Y%m%d%H%M%S");
        let name = match self.template.extension() {
            Some(ext) => format!(
                "{}_{:05}_{}.{}",
                stem,
                self.sequence,
                now,
                ext.to_string_lossy()
            ),
            None => format!("{}_{:05}_{}", stem, self.sequence, now),
        };
        self.template.with_file_name(name)
    }
    fn next_path(&mut self) -> PathBuf {
        self.sequence += 1;
        match self.policy.ring_files {
            Some(cap) if self.policy.is_enabled() && cap > 0 && self.ring.len() >= cap => {
                // ring buffer full, the oldest path is overwritten
                match self.ring.pop_front() {
                    Some(path) => path,
                    None => self.gen_filename(),
                }
            }
            _ => self.gen_filename(),
        }
    }
    /// Seals the current file, if any, and opens the next one starting with `seed`.
    pub fn open_next(&mut self, seed: &[u8]) -> Result<()> {
        self.close()?;
        let path = self.next_path();
        let fs = File::create(&path).map_err(|e| RingcapError::RotationFailure {
            path: path.display().to_string(),
            e,
        })?;
        info!("output file {} opened", path.display());
        self.ring.retain(|p| p != &path);
        self.ring.push_back(path.clone());
        self.fs = Some(BufWriter::new(fs));
        self.current = Some(OutputFile {
            path,
            bytes: 0,
            packets: 0,
            opened: Instant::now(),
        });
        self.state = OutputState::Open;
        if !seed.is_empty() {
            self.write(seed, false)?;
        }
        Ok(())
    }
    /// Writes one whole block; true when this write made the file reach its rotation threshold.
    pub fn write(&mut self, data: &[u8], packet: bool) -> Result<bool> {
        let (fs, current) = match (self.fs.as_mut(), self.current.as_mut()) {
            (Some(fs), Some(current)) => (fs, current),
            _ => {
                return Err(RingcapError::OutputWrite {
                    path: self.template.display().to_string(),
                    e: std::io::Error::other("no output file open"),
                });
            }
        };
        fs.write_all(data).map_err(|e| RingcapError::OutputWrite {
            path: current.path.display().to_string(),
            e,
        })?;
        current.bytes += data.len() as u64;
        if packet {
            current.packets += 1;
            return Ok(self.check_rotation());
        }
        Ok(false)
    }
    /// Moves to `Rotating` when a trigger is met, true on that transition.
    pub fn check_rotation(&mut self) -> bool {
        if self.state != OutputState::Open {
            return false;
        }
        let current = match &self.current {
            Some(current) => current,
            None => return false,
        };
        let reached = self.policy.triggers.iter().any(|t| match *t {
            RotationTrigger::Packets(n) => current.packets >= n,
            RotationTrigger::Bytes(n) => current.bytes >= n,
            RotationTrigger::Duration(d) => current.opened.elapsed() >= d,
        });
        if reached {
            debug!(
                "output file {} full with {} packets, {} bytes",
                current.path.display(),
                current.packets,
                current.bytes
            );
            self.state = OutputState::Rotating;
        }
        reached
    }
    pub fn state(&self) -> OutputState {
        self.state
    }
    pub fn current(&self) -> Option<&OutputFile> {
        self.current.as_ref()
    }
    /// Flushes and seals the current file.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut fs) = self.fs.take() {
            let path = self
                .current
                .as_ref()
                .map(|c| c.path.display().to_string())
                .unwrap_or_default();
            fs.flush().map_err(|e| RingcapError::OutputWrite {
                path: path.clone(),
                e,
            })?;
            debug!("output file {} closed", path);
        }
        self.state = OutputState::Closed;
        Ok(())
    }
    /// Files left on disk, oldest first.
    pub fn files(&self) -> Vec<PathBuf> {
        self.ring.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn single_file_uses_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pcapng");
        let mut output = OutputController::new(&path, RotationPolicy::new());
        output.open_next(b"seed").unwrap();
        for _ in 0..100 {
            assert!(!output.write(b"pkt!", true).unwrap());
        }
        output.close().unwrap();
        assert_eq!(output.files(), vec![path.clone()]);
        assert_eq!(fs::read(&path).unwrap().len(), 404);
    }
    #[test]
    fn rotation_names_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RotationPolicy::new().condition("packets:2").unwrap();
        let mut output = OutputController::new(dir.path().join("ring.pcapng"), policy);
        output.open_next(&[]).unwrap();
        assert!(!output.write(b"aaaa", true).unwrap());
        assert!(output.write(b"bbbb", true).unwrap());
        assert_eq!(output.state(), OutputState::Rotating);
        output.open_next(b"ss").unwrap();
        assert_eq!(output.state(), OutputState::Open);
        output.close().unwrap();

        let files = output.files();
        assert_eq!(files.len(), 2);
        let name = files[1].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("ring_00002_"), "{}", name);
        assert!(name.ends_with(".pcapng"));
        assert_eq!(name.len(), "ring_00002_".len() + 14 + ".pcapng".len());
        assert_eq!(fs::read(&files[0]).unwrap(), b"aaaabbbb");
        assert_eq!(fs::read(&files[1]).unwrap(), b"ss");
    }
    #[test]
    fn ring_reuses_oldest_path() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RotationPolicy::new()
            .condition("packets:1")
            .unwrap()
            .condition("files:2")
            .unwrap();
        let mut output = OutputController::new(dir.path().join("ring.pcapng"), policy);
        let mut first = None;
        for i in 0..5u8 {
            output.open_next(&[]).unwrap();
            if first.is_none() {
                first = output.current().map(|c| c.path.clone());
            }
            output.write(&[i], true).unwrap();
        }
        output.close().unwrap();
        let files = output.files();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
        // the fifth file went to the path of the first
        assert_eq!(files[1], first.unwrap());
        assert_eq!(fs::read(&files[1]).unwrap(), vec![4]);
    }
    #[test]
    fn unwritable_output_is_rotation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.pcapng");
        let mut output = OutputController::new(path, RotationPolicy::new());
        assert!(matches!(
            output.open_next(&[]),
            Err(RingcapError::RotationFailure { .. })
        ));
    }
}
