use crossbeam_channel::Sender;
#[cfg(feature = "libpnet")]
use pnet::datalink;
#[cfg(feature = "libpnet")]
use pnet::datalink::Channel::Ethernet;
#[cfg(feature = "libpnet")]
use pnet::datalink::ChannelType;
#[cfg(feature = "libpnet")]
use pnet::datalink::Config;
#[cfg(feature = "libpnet")]
use pnet::datalink::DataLinkReceiver;
use serde::Deserialize;
use serde::Serialize;
#[cfg(feature = "libpnet")]
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::ErrorKind;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;
use tracing::warn;

use crate::PcapByteOrder;
use crate::Result;
use crate::error::RingcapError;
use crate::fs::pcap::FILE_HEADER_SIZE;
use crate::fs::pcap::RECORD_HEADER_SIZE;
use crate::fs::pcap::detect_magic;
use crate::fs::pcapng::BlockType;
#[cfg(feature = "libpnet")]
use crate::fs::pcapng::EnhancedPacketBlock;
#[cfg(feature = "libpnet")]
use crate::fs::pcapng::InterfaceDescriptionBlock;
#[cfg(feature = "libpnet")]
use crate::fs::pcapng::SectionHeaderBlock;
use crate::reader::Block;
use crate::reader::MIN_BLOCK_SIZE;
use crate::reader::block_header;
use crate::reader::parse_block;
use crate::reader::parse_pcap_header;
use crate::reader::parse_record;
use crate::reader::record_length;

/// Where the packets of one source come from.
#[derive(Serialize, Deserialize)]
pub enum SourceSpec {
    /// A named pipe, opened for reading when the capture starts.
    Fifo(PathBuf),
    /// A regular file, read once like a pipe.
    File(PathBuf),
    Stdin,
    /// A live network interface, by name.
    Interface(String),
    /// Any reader, it can not be saved with a configuration.
    #[serde(skip)]
    Reader(Box<dyn Read + Send>),
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Fifo(path) => f.debug_tuple("Fifo").field(path).finish(),
            SourceSpec::File(path) => f.debug_tuple("File").field(path).finish(),
            SourceSpec::Stdin => write!(f, "Stdin"),
            SourceSpec::Interface(name) => f.debug_tuple("Interface").field(name).finish(),
            SourceSpec::Reader(_) => write!(f, "Reader(..)"),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Fifo(path) | SourceSpec::File(path) => write!(f, "{}", path.display()),
            SourceSpec::Stdin => write!(f, "-"),
            SourceSpec::Interface(name) => write!(f, "{}", name),
            SourceSpec::Reader(_) => write!(f, "reader"),
        }
    }
}

impl SourceSpec {
    /// Duplicates the spec, a `Reader` can not be duplicated.
    pub fn try_clone(&self) -> Option<SourceSpec> {
        match self {
            SourceSpec::Fifo(path) => Some(SourceSpec::Fifo(path.clone())),
            SourceSpec::File(path) => Some(SourceSpec::File(path.clone())),
            SourceSpec::Stdin => Some(SourceSpec::Stdin),
            SourceSpec::Interface(name) => Some(SourceSpec::Interface(name.clone())),
            SourceSpec::Reader(_) => None,
        }
    }
}

/// What one poll of a source produced.
#[derive(Debug)]
pub enum Polled {
    Block(Block),
    /// Nothing arrived before the read timeout, only live interfaces go idle.
    Idle,
    End,
}

#[derive(Debug, Clone, Copy)]
enum StreamFormat {
    PcapNg,
    Pcap {
        pbo: PcapByteOrder,
        nanosecond: bool,
    },
}

/// Cuts a byte stream into blocks, pcapng or classic pcap.
///
/// The byte order of the current section lives here and is replaced by each
/// section header read.
pub struct BlockStream<R> {
    rdr: R,
    format: Option<StreamFormat>,
    section: Option<PcapByteOrder>,
    finished: bool,
}

impl<R: Read> BlockStream<R> {
    pub fn new(rdr: R) -> BlockStream<R> {
        BlockStream {
            rdr,
            format: None,
            section: None,
            finished: false,
        }
    }
    /// Fills `buf` as far as the stream allows and returns how many bytes were read.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.rdr.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
    /// Appends exactly `n` bytes to `buf`, anything less is a truncated block.
    fn extend(&mut self, buf: &mut Vec<u8>, n: usize) -> Result<()> {
        let start = buf.len();
        buf.resize(start + n, 0);
        let got = self.fill(&mut buf[start..])?;
        if got < n {
            return Err(RingcapError::TruncatedBlock {
                needed: start + n,
                available: start + got,
            });
        }
        Ok(())
    }
    /// Reads the first `n` bytes of a block, `None` on a clean end of stream.
    fn head(&mut self, n: usize) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; n];
        let got = self.fill(&mut buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < n {
            return Err(RingcapError::TruncatedBlock {
                needed: n,
                available: got,
            });
        }
        Ok(Some(buf))
    }
    fn detect(&mut self) -> Result<Option<(StreamFormat, Vec<u8>)>> {
        let magic = match self.head(4)? {
            Some(magic) => magic,
            None => return Ok(None),
        };
        let magic4 = [magic[0], magic[1], magic[2], magic[3]];
        if let Some((pbo, nanosecond)) = detect_magic(magic4) {
            return Ok(Some((StreamFormat::Pcap { pbo, nanosecond }, magic)));
        }
        if u32::from_le_bytes(magic4) == BlockType::SectionHeaderBlock.to_u32() {
            return Ok(Some((StreamFormat::PcapNg, magic)));
        }
        Err(RingcapError::UnknownMagic {
            magic: u32::from_le_bytes(magic4),
        })
    }
    fn next_pcapng(&mut self, mut buf: Vec<u8>) -> Result<Block> {
        if buf.len() < MIN_BLOCK_SIZE {
            let missing = MIN_BLOCK_SIZE - buf.len();
            self.extend(&mut buf, missing)?;
        }
        let (_, length) = block_header(&buf, self.section)?;
        let missing = length - buf.len();
        self.extend(&mut buf, missing)?;
        let block = parse_block(&buf, self.section)?;
        if let Block::SectionHeader { pbo, .. } = block {
            self.section = Some(pbo);
        }
        Ok(block)
    }
    fn next_record(&mut self, pbo: PcapByteOrder, nanosecond: bool) -> Result<Option<Block>> {
        let mut buf = match self.head(RECORD_HEADER_SIZE)? {
            Some(buf) => buf,
            None => return Ok(None),
        };
        let length = record_length(&buf, pbo)?;
        self.extend(&mut buf, length - RECORD_HEADER_SIZE)?;
        Ok(Some(parse_record(&buf, pbo, nanosecond)?))
    }
    fn read_next(&mut self) -> Result<Option<Block>> {
        match self.format {
            None => {
                let (format, mut buf) = match self.detect()? {
                    Some(detected) => detected,
                    None => return Ok(None),
                };
                self.format = Some(format);
                match format {
                    StreamFormat::PcapNg => Ok(Some(self.next_pcapng(buf)?)),
                    StreamFormat::Pcap { pbo, .. } => {
                        self.extend(&mut buf, FILE_HEADER_SIZE - 4)?;
                        let block = parse_pcap_header(&buf)?;
                        self.section = Some(pbo);
                        Ok(Some(block))
                    }
                }
            }
            Some(StreamFormat::PcapNg) => match self.head(MIN_BLOCK_SIZE)? {
                Some(buf) => Ok(Some(self.next_pcapng(buf)?)),
                None => Ok(None),
            },
            Some(StreamFormat::Pcap { pbo, nanosecond }) => self.next_record(pbo, nanosecond),
        }
    }
    /// The next block, `None` once the stream ended; after an error the stream stays closed.
    ///
    /// Once the stream format is known, a truncated or unrecognized block is
    /// reported as `StreamCorrupt`.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        let mid_stream = self.format.is_some();
        let ret = match self.read_next() {
            Err(
                e @ (RingcapError::TruncatedBlock { .. } | RingcapError::UnknownMagic { .. }),
            ) if mid_stream => Err(RingcapError::corrupt(e)),
            ret => ret,
        };
        if !matches!(ret, Ok(Some(_))) {
            self.finished = true;
        }
        ret
    }
}

#[cfg(feature = "libpnet")]
struct InterfaceCapture {
    rx: Box<dyn DataLinkReceiver>,
    pending: VecDeque<Block>,
    snaplen: usize,
}

#[cfg(feature = "libpnet")]
impl InterfaceCapture {
    fn open(name: &str, snaplen: usize, timeout: Duration, user_appl: &str) -> Result<Self> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| RingcapError::UnableFoundInterface { i: name.to_string() })?;
        let config = Config {
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            channel_type: ChannelType::Layer2,
            promiscuous: true,
            ..Default::default()
        };
        let rx = match datalink::channel(&interface, config) {
            Ok(Ethernet(_tx, rx)) => rx,
            Ok(_) => return Err(RingcapError::UnhandledChannelType),
            Err(e) => return Err(RingcapError::UnableCreateChannel { e: e.to_string() }),
        };
        // the section and its only interface are announced before any frame
        let pbo = PcapByteOrder::WiresharkDefault;
        let shb = SectionHeaderBlock::synthesized(user_appl).to_vec(pbo)?;
        let idb = InterfaceDescriptionBlock::new_raw(
            &interface.name,
            &interface.description,
            &interface.ips,
            interface.mac,
            snaplen as u32,
        )
        .to_vec(pbo)?;
        let mut pending = VecDeque::new();
        pending.push_back(parse_block(&shb, None)?);
        pending.push_back(parse_block(&idb, Some(pbo))?);
        Ok(InterfaceCapture {
            rx,
            pending,
            snaplen,
        })
    }
    fn poll(&mut self) -> Result<Polled> {
        if let Some(block) = self.pending.pop_front() {
            return Ok(Polled::Block(block));
        }
        match self.rx.next() {
            Ok(data) if !data.is_empty() => {
                let pbo = PcapByteOrder::WiresharkDefault;
                let epb = EnhancedPacketBlock::new(0, data, self.snaplen)?.to_vec(pbo)?;
                Ok(Polled::Block(parse_block(&epb, Some(pbo))?))
            }
            Ok(_) => Ok(Polled::Idle),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock
                ) =>
            {
                // no data captured try next loop
                Ok(Polled::Idle)
            }
            Err(e) => Err(e.into()),
        }
    }
}

enum Input {
    Stream(BlockStream<Box<dyn Read + Send>>),
    #[cfg(feature = "libpnet")]
    Interface(InterfaceCapture),
}

/// One opened input.
pub struct SourceReader {
    input: Input,
}

impl SourceReader {
    /// Opens the input, a fifo blocks here until its writer shows up.
    pub fn open(spec: SourceSpec, snaplen: usize, timeout: Duration) -> Result<SourceReader> {
        let describe = spec.to_string();
        let open_err = |e: io::Error| RingcapError::UnableOpenSource {
            s: describe.clone(),
            e,
        };
        let input = match spec {
            SourceSpec::Fifo(path) | SourceSpec::File(path) => {
                let fs = File::open(&path).map_err(open_err)?;
                Input::Stream(BlockStream::new(Box::new(fs)))
            }
            SourceSpec::Stdin => Input::Stream(BlockStream::new(Box::new(io::stdin()))),
            SourceSpec::Reader(rdr) => Input::Stream(BlockStream::new(rdr)),
            #[cfg(feature = "libpnet")]
            SourceSpec::Interface(name) => Input::Interface(InterfaceCapture::open(
                &name,
                snaplen,
                timeout,
                crate::merge::TOOL_USER_APPL,
            )?),
            #[cfg(not(feature = "libpnet"))]
            SourceSpec::Interface(name) => {
                let _ = (snaplen, timeout);
                return Err(RingcapError::UnableFoundInterface { i: name });
            }
        };
        Ok(SourceReader { input })
    }
    pub fn from_reader<R: Read + Send + 'static>(rdr: R) -> SourceReader {
        SourceReader {
            input: Input::Stream(BlockStream::new(Box::new(rdr))),
        }
    }
    pub fn poll_block(&mut self) -> Result<Polled> {
        match &mut self.input {
            Input::Stream(stream) => match stream.next_block()? {
                Some(block) => Ok(Polled::Block(block)),
                None => Ok(Polled::End),
            },
            #[cfg(feature = "libpnet")]
            Input::Interface(capture) => capture.poll(),
        }
    }
    /// Blocks until the next block, `None` at end of stream.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        loop {
            match self.poll_block()? {
                Polled::Block(block) => return Ok(Some(block)),
                Polled::Idle => continue,
                Polled::End => return Ok(None),
            }
        }
    }
}

/// Messages from source threads to the writer.
#[derive(Debug)]
pub enum SourceEvent {
    Block { source: usize, block: Block },
    End { source: usize },
    Failed { source: usize, error: String },
}

/// Runs one source on its own thread until it ends, fails or `stop` is raised.
///
/// The thread is never joined: a read that blocks forever only keeps its own
/// thread alive.
pub fn spawn(
    source: usize,
    spec: SourceSpec,
    snaplen: usize,
    timeout: Duration,
    tx: Sender<SourceEvent>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(format!("ringcap-source-{}", source))
        .spawn(move || {
            let describe = spec.to_string();
            let event = match run(source, spec, snaplen, timeout, &tx, &stop) {
                Ok(()) => {
                    debug!("source {} ({}) ended", source, describe);
                    SourceEvent::End { source }
                }
                Err(e) => {
                    warn!("source {} ({}) failed: {}", source, describe, e);
                    SourceEvent::Failed {
                        source,
                        error: e.to_string(),
                    }
                }
            };
            // the writer may already be gone
            let _ = tx.send(event);
        })?;
    Ok(handle)
}

fn run(
    source: usize,
    spec: SourceSpec,
    snaplen: usize,
    timeout: Duration,
    tx: &Sender<SourceEvent>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut reader = SourceReader::open(spec, snaplen, timeout)?;
    while !stop.load(Ordering::Relaxed) {
        match reader.poll_block()? {
            Polled::Block(block) => {
                if tx.send(SourceEvent::Block { source, block }).is_err() {
                    break;
                }
            }
            Polled::Idle => (),
            Polled::End => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::pcap::FileHeader;
    use crate::fs::pcap::PacketRecord;
    use crate::fs::pcapng::EnhancedPacketBlock;
    use crate::fs::pcapng::InterfaceDescriptionBlock;
    use crate::fs::pcapng::Options;
    use crate::fs::pcapng::SectionHeaderBlock;
    use std::io::Cursor;

    fn section(pbo: PcapByteOrder, packets: usize) -> Vec<u8> {
        let mut data = SectionHeaderBlock::new(Options::default()).to_vec(pbo).unwrap();
        data.extend(
            InterfaceDescriptionBlock::new(1, 0, Options::default())
                .to_vec(pbo)
                .unwrap(),
        );
        for i in 0..packets {
            let epb = EnhancedPacketBlock {
                interface_id: 0,
                ts_high: 0,
                ts_low: i as u32,
                captured_packet_length: 3,
                original_packet_length: 3,
                packet_data: vec![1, 2, 3],
                options: Options::default(),
            };
            data.extend(epb.to_vec(pbo).unwrap());
        }
        data
    }

    fn drain(data: Vec<u8>) -> Vec<Block> {
        let mut reader = SourceReader::from_reader(Cursor::new(data));
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block().unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn sections_of_both_orders() {
        let mut data = section(PcapByteOrder::BigEndian, 2);
        data.extend(section(PcapByteOrder::LittleEndian, 3));
        let blocks = drain(data.clone());
        assert_eq!(blocks.len(), 9);
        assert_eq!(blocks.iter().filter(|b| b.is_packet()).count(), 5);
        assert_eq!(blocks[3].byte_order(), PcapByteOrder::BigEndian);
        assert_eq!(blocks[8].byte_order(), PcapByteOrder::LittleEndian);
        let joined: Vec<u8> = blocks.iter().flat_map(|b| b.raw().to_vec()).collect();
        assert_eq!(joined, data);
    }
    #[test]
    fn classic_pcap_stream() {
        let mut data = FileHeader::new(false, 65535, 1)
            .to_vec(PcapByteOrder::LittleEndian)
            .unwrap();
        for i in 0..4 {
            data.extend(
                PacketRecord::new(i, 0, &[0u8; 42])
                    .to_vec(PcapByteOrder::LittleEndian)
                    .unwrap(),
            );
        }
        let blocks = drain(data);
        assert_eq!(blocks.len(), 5);
        assert!(matches!(blocks[0], Block::PcapHeader { .. }));
        assert!(blocks[1..].iter().all(|b| b.is_packet()));
    }
    #[test]
    fn empty_stream_ends() {
        assert!(drain(Vec::new()).is_empty());
    }
    #[test]
    fn truncated_stream_fails_then_stays_closed() {
        let mut data = section(PcapByteOrder::LittleEndian, 1);
        data.truncate(data.len() - 6);
        let mut reader = SourceReader::from_reader(Cursor::new(data));
        assert!(reader.next_block().unwrap().is_some());
        assert!(reader.next_block().unwrap().is_some());
        assert!(matches!(
            reader.next_block(),
            Err(RingcapError::StreamCorrupt { .. })
        ));
        assert!(reader.next_block().unwrap().is_none());
    }
    #[test]
    fn truncated_first_block_stays_truncated() {
        let mut data = section(PcapByteOrder::LittleEndian, 0);
        data.truncate(10);
        let mut reader = SourceReader::from_reader(Cursor::new(data));
        assert!(matches!(
            reader.next_block(),
            Err(RingcapError::TruncatedBlock { .. })
        ));
    }
    #[test]
    fn garbage_is_unknown_magic() {
        let mut reader = SourceReader::from_reader(Cursor::new(b"hello world!".to_vec()));
        assert!(matches!(
            reader.next_block(),
            Err(RingcapError::UnknownMagic { .. })
        ));
    }
    #[test]
    fn missing_file_fails_to_open() {
        let spec = SourceSpec::File(PathBuf::from("/nonexistent/ringcap/input.pcapng"));
        assert!(matches!(
            SourceReader::open(spec, 65535, Duration::from_secs(1)),
            Err(RingcapError::UnableOpenSource { .. })
        ));
    }
}
