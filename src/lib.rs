use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use serde::Deserialize;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::result;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub mod autostop;
pub mod config;
pub mod error;
pub mod fs;
pub mod merge;
pub mod output;
pub mod reader;
pub mod source;

use autostop::AutostopEvaluator;
use config::Autostop;
use config::AutostopCondition;
use config::CaptureConfig;
use config::RotationPolicy;
use error::RingcapError;
use merge::MergeMode;
use merge::Merger;
use output::OutputController;
use output::OutputState;
use reader::Block;
use source::SourceEvent;
use source::SourceSpec;

pub type Result<T, E = error::RingcapError> = result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcapByteOrder {
    BigEndian,
    LittleEndian,
    WiresharkDefault, // LittleEndian
}

/// What a finished capture produced.
#[derive(Debug, Clone, Default)]
pub struct CaptureResult {
    /// Output files left on disk, oldest first.
    pub files_written: Vec<PathBuf>,
    pub packets_written: u64,
    /// Every byte written, section headers and interfaces included.
    pub bytes_written: u64,
    /// Sources that failed, by index, with their error.
    pub source_errors: Vec<(usize, String)>,
    /// The output error that ended the capture early, if any.
    pub output_error: Option<String>,
    pub stopped_by: Option<AutostopCondition>,
}

pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    writer: JoinHandle<CaptureResult>,
}

impl CaptureHandle {
    /// Asks the capture to finish, sources are treated as exhausted.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
    pub fn is_finished(&self) -> bool {
        self.writer.is_finished()
    }
    /// Waits for the capture to finish; output errors are reported in the result.
    pub fn wait(self) -> Result<CaptureResult> {
        self.writer.join().map_err(|_| RingcapError::WriterPanicked)
    }
}

/// Starts a capture of `sources` into `output`.
/// ```rust,no_run
/// use ringcap::config::Autostop;
/// use ringcap::config::RotationPolicy;
/// use ringcap::source::SourceSpec;
///
/// fn main() {
///     let sources = vec![SourceSpec::Fifo("/tmp/capture.fifo".into()), SourceSpec::Stdin];
///     let rotation = RotationPolicy::new().condition("packets:47").unwrap();
///     let autostop = Autostop::new().condition("files:2").unwrap();
///     let handle = ringcap::start(sources, rotation, autostop, "/tmp/out.pcapng").unwrap();
///     let result = handle.wait().unwrap();
///     for path in result.files_written {
///         println!("{}", path.display());
///     }
/// }
/// ```
pub fn start<P: AsRef<Path>>(
    sources: Vec<SourceSpec>,
    rotation: RotationPolicy,
    autostop: Autostop,
    output: P,
) -> Result<CaptureHandle> {
    let mut config = CaptureConfig::new(output);
    config.sources = sources;
    config.rotation(rotation);
    config.autostop(autostop);
    start_with(config)
}

pub fn stop(handle: &CaptureHandle) {
    handle.stop();
}

/// Starts a capture from a full configuration.
///
/// The first output file is created before this returns, so an unwritable
/// output path fails here. Every source is opened on its own thread.
pub fn start_with(config: CaptureConfig) -> Result<CaptureHandle> {
    if config.sources.is_empty() {
        return Err(RingcapError::NoSources);
    }
    let snaplen = config.get_snaplen();
    let timeout = config.get_timeout();
    let (tx, rx) = crossbeam_channel::bounded(config.get_channel_capacity());
    let stop = Arc::new(AtomicBool::new(false));

    let source_count = config.sources.len();
    let merger = Merger::new(source_count)?;
    let mut output = OutputController::new(&config.output, config.rotation.clone());
    let mut autostop = AutostopEvaluator::new(&config.autostop);
    let seed = merger.seed(None)?;
    output.open_next(&seed)?;
    autostop.bytes_written(seed.len() as u64);
    info!(
        "capture of {} sources into {} started, {:?}",
        source_count,
        config.output.display(),
        merger.mode()
    );

    for (id, spec) in config.sources.into_iter().enumerate() {
        if let Err(e) = source::spawn(id, spec, snaplen, timeout, tx.clone(), stop.clone()) {
            stop.store(true, Ordering::Relaxed);
            return Err(e);
        }
    }
    // only the sources hold senders now
    drop(tx);

    let preamble = match merger.mode() {
        MergeMode::Synthesized => Some(Preamble::new(source_count)),
        MergeMode::Passthrough => None,
    };
    let writer = Writer {
        merger,
        output,
        autostop,
        rx,
        stop: stop.clone(),
        poll: timeout,
        live: vec![true; source_count],
        preamble,
        result: CaptureResult {
            bytes_written: seed.len() as u64,
            ..Default::default()
        },
    };
    let writer = match thread::Builder::new()
        .name("ringcap-writer".to_string())
        .spawn(move || writer.run())
    {
        Ok(writer) => writer,
        Err(e) => {
            stop.store(true, Ordering::Relaxed);
            return Err(e.into());
        }
    };
    Ok(CaptureHandle { stop, writer })
}

/// Blocks held back until every source has shown its interfaces.
///
/// Interfaces are then numbered source by source, whatever order the source
/// threads happened to deliver them in. A source is ready at its first packet,
/// at its end, or once it has been quiet for a poll interval: since its first
/// block, or since the preamble began when it has sent nothing at all.
struct Preamble {
    blocks: Vec<VecDeque<Block>>,
    ready: Vec<bool>,
    first_seen: Vec<Option<Instant>>,
    began: Instant,
}

impl Preamble {
    fn new(sources: usize) -> Preamble {
        Preamble {
            blocks: vec![VecDeque::new(); sources],
            ready: vec![false; sources],
            first_seen: vec![None; sources],
            began: Instant::now(),
        }
    }
    fn push(&mut self, source: usize, block: Block) {
        if block.is_packet() {
            self.ready[source] = true;
        }
        if self.first_seen[source].is_none() {
            self.first_seen[source] = Some(Instant::now());
        }
        self.blocks[source].push_back(block);
    }
    fn all_ready(&self) -> bool {
        self.ready.iter().all(|&r| r)
    }
    /// Marks sources that waited `wait` without a packet as ready.
    fn expire(&mut self, wait: Duration) -> bool {
        for (source, ready) in self.ready.iter_mut().enumerate() {
            let since = self.first_seen[source].unwrap_or(self.began);
            if !*ready && since.elapsed() >= wait {
                debug!("source {} sent no packet within {:?}", source, wait);
                *ready = true;
            }
        }
        self.all_ready()
    }
    /// Everything before the first packet of each source, then the rest, source by source.
    fn into_order(self) -> Vec<(usize, Block)> {
        let mut heads = Vec::new();
        let mut tails = Vec::new();
        for (source, mut blocks) in self.blocks.into_iter().enumerate() {
            let first_packet = blocks
                .iter()
                .position(|b| b.is_packet())
                .unwrap_or(blocks.len());
            let rest = blocks.split_off(first_packet);
            heads.extend(blocks.into_iter().map(|b| (source, b)));
            tails.extend(rest.into_iter().map(|b| (source, b)));
        }
        heads.extend(tails);
        heads
    }
}

struct Writer {
    merger: Merger,
    output: OutputController,
    autostop: AutostopEvaluator,
    rx: Receiver<SourceEvent>,
    stop: Arc<AtomicBool>,
    poll: Duration,
    live: Vec<bool>,
    preamble: Option<Preamble>,
    result: CaptureResult,
}

impl Writer {
    fn finished(&self) -> bool {
        self.result.output_error.is_some()
            || self.autostop.fired().is_some()
            || (self.preamble.is_none() && self.live.iter().all(|&l| !l))
    }
    fn run(mut self) -> CaptureResult {
        while !self.finished() {
            if self.stop.load(Ordering::Relaxed) {
                info!("capture stop requested");
                break;
            }
            match self.rx.recv_timeout(self.poll) {
                Ok(event) => {
                    self.event(event);
                    self.expire_preamble();
                }
                Err(RecvTimeoutError::Timeout) => self.idle(),
                Err(RecvTimeoutError::Disconnected) => {
                    self.live.iter_mut().for_each(|l| *l = false);
                    self.flush_preamble();
                }
            }
        }
        self.flush_preamble();
        self.finish()
    }
    fn event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Block { source, block } => match self.preamble.as_mut() {
                Some(preamble) => {
                    preamble.push(source, block);
                    if preamble.all_ready() {
                        self.flush_preamble();
                    }
                }
                None => self.handle(source, block),
            },
            SourceEvent::End { source } => {
                info!("source {} finished", source);
                self.source_done(source);
            }
            SourceEvent::Failed { source, error } => {
                warn!("source {} failed: {}", source, error);
                self.result.source_errors.push((source, error));
                self.source_done(source);
            }
        }
    }
    fn source_done(&mut self, source: usize) {
        if let Some(live) = self.live.get_mut(source) {
            *live = false;
        }
        if let Some(preamble) = self.preamble.as_mut() {
            preamble.ready[source] = true;
            if preamble.all_ready() {
                self.flush_preamble();
            }
        }
    }
    fn flush_preamble(&mut self) {
        if let Some(preamble) = self.preamble.take() {
            debug!("interfaces of all sources known, merging");
            for (source, block) in preamble.into_order() {
                self.handle(source, block);
            }
        }
    }
    /// A busy source must not wait on a quiet one for longer than a poll interval.
    fn expire_preamble(&mut self) {
        let poll = self.poll;
        if self.preamble.as_mut().is_some_and(|p| p.expire(poll)) {
            self.flush_preamble();
        }
    }
    fn idle(&mut self) {
        // sources quiet for a whole poll interval will not announce more interfaces soon
        self.flush_preamble();
        if self.output.check_rotation() {
            self.autostop.file_completed();
        }
        self.autostop.check();
    }
    fn handle(&mut self, source: usize, block: Block) {
        if self.finished_writing() {
            return;
        }
        let is_packet = block.is_packet();
        let seed = if self.output.state() == OutputState::Rotating {
            match self.merger.seed(Some(&block)) {
                Ok(seed) => Some(seed),
                Err(e) => {
                    self.result.output_error = Some(e.to_string());
                    return;
                }
            }
        } else {
            None
        };
        let data = match self.merger.process(source, block) {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                warn!("source {} block not merged: {}", source, e);
                self.result.source_errors.push((source, e.to_string()));
                return;
            }
        };
        if let Some(seed) = seed {
            if let Err(e) = self.output.open_next(&seed) {
                warn!("{}", e);
                self.result.output_error = Some(e.to_string());
                return;
            }
            debug!(
                "new file seeded with {} interfaces",
                self.merger.interface_count()
            );
            self.autostop.bytes_written(seed.len() as u64);
            self.result.bytes_written += seed.len() as u64;
        }
        match self.output.write(&data, is_packet) {
            Ok(full) => {
                let len = data.len() as u64;
                self.result.bytes_written += len;
                if is_packet {
                    self.result.packets_written += 1;
                    self.autostop.packet_written(len);
                } else {
                    self.autostop.bytes_written(len);
                }
                if full {
                    self.autostop.file_completed();
                }
                self.autostop.check();
            }
            Err(e) => {
                warn!("{}", e);
                self.result.output_error = Some(e.to_string());
            }
        }
    }
    fn finished_writing(&self) -> bool {
        self.result.output_error.is_some() || self.autostop.fired().is_some()
    }
    fn finish(mut self) -> CaptureResult {
        // let the sources go
        self.stop.store(true, Ordering::Relaxed);
        if let Err(e) = self.output.close() {
            warn!("{}", e);
            if self.result.output_error.is_none() {
                self.result.output_error = Some(e.to_string());
            }
        }
        self.result.files_written = self.output.files();
        self.result.stopped_by = self.autostop.fired();
        info!(
            "capture finished: {} packets, {} bytes, {} files, {:?}",
            self.result.packets_written,
            self.result.bytes_written,
            self.result.files_written.len(),
            self.autostop.elapsed()
        );
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::pcapng::EnhancedPacketBlock;
    use crate::fs::pcapng::InterfaceDescriptionBlock;
    use crate::fs::pcapng::Options;
    use crate::fs::pcapng::SectionHeaderBlock;
    use crate::reader::parse_block;

    fn block(raw: Vec<u8>, pbo: PcapByteOrder) -> Block {
        parse_block(&raw, Some(pbo)).unwrap()
    }

    #[test]
    fn preamble_orders_interfaces_by_source() {
        let pbo = PcapByteOrder::LittleEndian;
        let shb = SectionHeaderBlock::new(Options::default()).to_vec(pbo).unwrap();
        let idb = InterfaceDescriptionBlock::new(1, 0, Options::default())
            .to_vec(pbo)
            .unwrap();
        let epb = EnhancedPacketBlock {
            interface_id: 0,
            ts_high: 0,
            ts_low: 0,
            captured_packet_length: 0,
            original_packet_length: 0,
            packet_data: Vec::new(),
            options: Options::default(),
        }
        .to_vec(pbo)
        .unwrap();

        let mut preamble = Preamble::new(2);
        preamble.push(1, block(shb.clone(), pbo));
        preamble.push(1, block(idb.clone(), pbo));
        preamble.push(1, block(epb.clone(), pbo));
        assert!(!preamble.all_ready());
        preamble.push(0, block(shb, pbo));
        preamble.push(0, block(idb, pbo));
        preamble.push(0, block(epb, pbo));
        assert!(preamble.all_ready());

        let order: Vec<(usize, bool)> = preamble
            .into_order()
            .into_iter()
            .map(|(s, b)| (s, b.is_packet()))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, false),
                (0, false),
                (1, false),
                (1, false),
                (0, true),
                (1, true)
            ]
        );
    }
    #[test]
    fn quiet_source_does_not_hold_the_preamble() {
        let pbo = PcapByteOrder::LittleEndian;
        let shb = SectionHeaderBlock::new(Options::default()).to_vec(pbo).unwrap();
        let epb = EnhancedPacketBlock {
            interface_id: 0,
            ts_high: 0,
            ts_low: 0,
            captured_packet_length: 4,
            original_packet_length: 4,
            packet_data: vec![1, 2, 3, 4],
            options: Options::default(),
        }
        .to_vec(pbo)
        .unwrap();

        let mut preamble = Preamble::new(2);
        preamble.push(0, block(shb.clone(), pbo));
        preamble.push(0, block(epb.clone(), pbo));
        preamble.push(1, block(shb, pbo));
        assert!(!preamble.expire(Duration::from_secs(60)));
        assert!(preamble.expire(Duration::ZERO));

        // a source that sent nothing at all
        let mut preamble = Preamble::new(3);
        preamble.push(0, block(epb, pbo));
        assert!(!preamble.expire(Duration::from_secs(60)));
        assert!(preamble.expire(Duration::ZERO));
        assert_eq!(preamble.into_order().len(), 1);
    }
    #[test]
    fn no_sources() {
        let dir = std::env::temp_dir().join("ringcap-no-sources.pcapng");
        assert!(matches!(
            start(Vec::new(), RotationPolicy::new(), Autostop::new(), dir),
            Err(RingcapError::NoSources)
        ));
    }
}
