use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::Result;
use crate::error::RingcapError;
use crate::source::SourceSpec;

static DEFAULT_SNAPLEN: usize = 65535;
static DEFAULT_TIMEOUT: f32 = 1.0;
static DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Splits a `key:value` condition, the value must be a positive number.
fn split_condition(c: &str) -> Result<(&str, f64)> {
    let invalid = || RingcapError::InvalidCondition { c: c.to_string() };
    let (key, value) = c.split_once(':').ok_or_else(invalid)?;
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid());
    }
    Ok((key.trim(), value))
}

/// `packets` and `files` take whole numbers of at least one.
fn count(c: &str, value: f64) -> Result<u64> {
    if value < 1.0 || value.fract() != 0.0 {
        return Err(RingcapError::InvalidCondition { c: c.to_string() });
    }
    Ok(value as u64)
}

/// `filesize` is in kilobytes of 1000 bytes and must come to at least one byte.
fn kilobytes(c: &str, value: f64) -> Result<u64> {
    match (value * 1000.0) as u64 {
        0 => Err(RingcapError::InvalidCondition { c: c.to_string() }),
        bytes => Ok(bytes),
    }
}

/// When the current output file is closed and the next one opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationTrigger {
    Packets(u64),
    /// In bytes, `filesize:` conditions are given in kilobytes of 1000 bytes.
    Bytes(u64),
    Duration(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    pub triggers: Vec<RotationTrigger>,
    /// Ring buffer cap on the number of files kept.
    pub ring_files: Option<usize>,
}

impl RotationPolicy {
    /// No rotation, a single output file.
    pub fn new() -> RotationPolicy {
        RotationPolicy::default()
    }
    /// Adds a ring buffer condition: `packets:N`, `filesize:KB`, `duration:S` or `files:N`.
    /// ```rust
    /// use ringcap::config::RotationPolicy;
    ///
    /// let policy = RotationPolicy::new()
    ///     .condition("packets:47")
    ///     .unwrap()
    ///     .condition("files:2")
    ///     .unwrap();
    /// assert!(policy.is_enabled());
    /// assert_eq!(policy.ring_files, Some(2));
    /// ```
    pub fn condition(mut self, c: &str) -> Result<RotationPolicy> {
        let (key, value) = split_condition(c)?;
        match key {
            "packets" => self
                .triggers
                .push(RotationTrigger::Packets(count(c, value)?)),
            "filesize" => self
                .triggers
                .push(RotationTrigger::Bytes(kilobytes(c, value)?)),
            "duration" => self
                .triggers
                .push(RotationTrigger::Duration(Duration::from_secs_f64(value))),
            "files" => self.ring_files = Some(count(c, value)? as usize),
            _ => return Err(RingcapError::InvalidCondition { c: c.to_string() }),
        }
        Ok(self)
    }
    /// Rotation only happens with at least one trigger; a bare `files:N` does nothing.
    pub fn is_enabled(&self) -> bool {
        !self.triggers.is_empty()
    }
}

/// What ends the whole capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutostopCondition {
    Packets(u64),
    Bytes(u64),
    Duration(Duration),
    /// Number of output files completed.
    Files(u64),
}

impl FromStr for AutostopCondition {
    type Err = RingcapError;

    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = split_condition(s)?;
        let condition = match key {
            "packets" => AutostopCondition::Packets(count(s, value)?),
            "filesize" => AutostopCondition::Bytes(kilobytes(s, value)?),
            "duration" => AutostopCondition::Duration(Duration::from_secs_f64(value)),
            "files" => AutostopCondition::Files(count(s, value)?),
            _ => return Err(RingcapError::InvalidCondition { c: s.to_string() }),
        };
        Ok(condition)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autostop {
    pub conditions: Vec<AutostopCondition>,
}

impl Autostop {
    pub fn new() -> Autostop {
        Autostop::default()
    }
    pub fn condition(mut self, c: &str) -> Result<Autostop> {
        self.conditions.push(c.parse()?);
        Ok(self)
    }
    pub fn add(&mut self, condition: AutostopCondition) {
        self.conditions.push(condition);
    }
}

/// Everything a capture run needs.
#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub sources: Vec<SourceSpec>,
    pub rotation: RotationPolicy,
    pub autostop: Autostop,
    /// The output file, with rotation a template for the file names.
    pub output: PathBuf,
    snaplen: usize,
    /// Read timeout of live sources and writer poll interval, in seconds.
    timeout: f32,
    channel_capacity: usize,
}

impl CaptureConfig {
    pub fn new<P: AsRef<Path>>(output: P) -> CaptureConfig {
        CaptureConfig {
            sources: Vec::new(),
            rotation: RotationPolicy::new(),
            autostop: Autostop::new(),
            output: output.as_ref().to_path_buf(),
            snaplen: DEFAULT_SNAPLEN,
            timeout: DEFAULT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
    pub fn source(&mut self, spec: SourceSpec) {
        self.sources.push(spec);
    }
    pub fn rotation(&mut self, rotation: RotationPolicy) {
        self.rotation = rotation;
    }
    pub fn autostop(&mut self, autostop: Autostop) {
        self.autostop = autostop;
    }
    pub fn snaplen(&mut self, snaplen: usize) {
        self.snaplen = snaplen;
    }
    /// timeout as sec
    pub fn timeout(&mut self, timeout: f32) {
        self.timeout = timeout;
    }
    /// Blocks buffered between the sources and the writer.
    pub fn channel_capacity(&mut self, capacity: usize) {
        self.channel_capacity = capacity.max(1);
    }
    pub fn get_snaplen(&self) -> usize {
        self.snaplen
    }
    pub fn get_timeout(&self) -> Duration {
        if self.timeout.is_finite() && self.timeout > 0.0 {
            Duration::from_secs_f32(self.timeout)
        } else {
            Duration::from_secs_f32(DEFAULT_TIMEOUT)
        }
    }
    pub fn get_channel_capacity(&self) -> usize {
        self.channel_capacity
    }
    /// Saves the configuration, `Reader` sources can not be saved.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = bincode::config::standard();
        let data = bincode::serde::encode_to_vec(self, config)?;
        fs::write(path, data)?;
        Ok(())
    }
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CaptureConfig> {
        let data = fs::read(path)?;
        let config = bincode::config::standard();
        let (capture_config, _) = bincode::serde::decode_from_slice(&data, config)?;
        Ok(capture_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autostop_conditions() {
        assert_eq!(
            "packets:97".parse::<AutostopCondition>().unwrap(),
            AutostopCondition::Packets(97)
        );
        assert_eq!(
            "filesize:50".parse::<AutostopCondition>().unwrap(),
            AutostopCondition::Bytes(50_000)
        );
        assert_eq!(
            "duration:1.5".parse::<AutostopCondition>().unwrap(),
            AutostopCondition::Duration(Duration::from_millis(1500))
        );
        assert_eq!(
            "files:2".parse::<AutostopCondition>().unwrap(),
            AutostopCondition::Files(2)
        );
        for bad in [
            "packets",
            "packets:",
            "packets:-1",
            "packets:0",
            "packets:0.5",
            "packets:2.5",
            "files:0.9",
            "filesize:0.0001",
            "bogus:3",
        ] {
            assert!(matches!(
                bad.parse::<AutostopCondition>(),
                Err(RingcapError::InvalidCondition { .. })
            ));
        }
    }
    #[test]
    fn rotation_policy() {
        let policy = RotationPolicy::new()
            .condition("filesize:1")
            .unwrap()
            .condition("files:3")
            .unwrap();
        assert_eq!(policy.triggers, vec![RotationTrigger::Bytes(1000)]);
        assert_eq!(policy.ring_files, Some(3));
        assert!(!RotationPolicy::new().condition("files:3").unwrap().is_enabled());
        for bad in ["packets:0.5", "files:0.5", "files:1.5", "filesize:0.0002"] {
            assert!(matches!(
                RotationPolicy::new().condition(bad),
                Err(RingcapError::InvalidCondition { .. })
            ));
        }
    }
    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.conf");
        let mut config = CaptureConfig::new(dir.path().join("out.pcapng"));
        config.source(SourceSpec::Fifo(PathBuf::from("/tmp/ringcap.fifo")));
        config.source(SourceSpec::Stdin);
        config.rotation(RotationPolicy::new().condition("packets:10").unwrap());
        config.autostop(Autostop::new().condition("files:2").unwrap());
        config.snaplen(1500);
        config.save(&path).unwrap();

        let loaded = CaptureConfig::load(&path).unwrap();
        assert_eq!(loaded.sources.len(), 2);
        assert!(matches!(loaded.sources[1], SourceSpec::Stdin));
        assert_eq!(loaded.rotation, config.rotation);
        assert_eq!(loaded.autostop, config.autostop);
        assert_eq!(loaded.output, config.output);
        assert_eq!(loaded.get_snaplen(), 1500);
    }
    #[test]
    fn reader_sources_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CaptureConfig::new(dir.path().join("out.pcapng"));
        config.source(SourceSpec::Reader(Box::new(std::io::empty())));
        assert!(config.save(dir.path().join("capture.conf")).is_err());
    }
}
