//! Deciding, block by block, what reaches the output files.
//!
//! With one source the blocks are passed through untouched. With several,
//! every file starts with a section header of our own, followed by the
//! interfaces of all sources renumbered into one table, and every block is
//! rewritten little endian.
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::PcapByteOrder;
use crate::Result;
use crate::fs::pcapng::BlockType;
use crate::fs::pcapng::InterfaceDescriptionBlock;
use crate::fs::pcapng::InterfaceStatisticsBlock;
use crate::fs::pcapng::OptionLayout;
use crate::fs::pcapng::SectionHeaderBlock;
use crate::reader::Block;
use crate::reader::PacketFormat;

/// The User Application option written into synthesized section headers.
pub const TOOL_USER_APPL: &str = concat!("Ringcap (pcapture) ", env!("CARGO_PKG_VERSION"));

const OUTPUT_ORDER: PcapByteOrder = PcapByteOrder::WiresharkDefault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Passthrough,
    Synthesized,
}

/// The section currently open on the single source.
#[derive(Debug, Default)]
struct Passthrough {
    /// Raw section header, or pcap file header.
    section: Option<Vec<u8>>,
    /// A pcap file header also stands for the only interface.
    legacy: bool,
    interfaces: Vec<Vec<u8>>,
}

#[derive(Debug, Default, Clone)]
struct SourceSection {
    /// Section interface index to combined index.
    interfaces: Vec<u32>,
}

#[derive(Debug)]
struct Synthesized {
    shb: Vec<u8>,
    interfaces: Vec<InterfaceDescriptionBlock>,
    sources: Vec<SourceSection>,
}

impl Synthesized {
    fn source(&mut self, source: usize) -> &mut SourceSection {
        if self.sources.len() <= source {
            self.sources.resize(source + 1, SourceSection::default());
        }
        &mut self.sources[source]
    }
    fn register(&mut self, source: usize, idb: InterfaceDescriptionBlock) -> Result<Vec<u8>> {
        let id = self.interfaces.len() as u32;
        let data = idb.to_vec(OUTPUT_ORDER)?;
        debug!(
            "source {} interface {} is output interface {}",
            source,
            self.source(source).interfaces.len(),
            id
        );
        self.interfaces.push(idb);
        self.source(source).interfaces.push(id);
        Ok(data)
    }
    fn translate(&mut self, source: usize, local: u32) -> Option<u32> {
        self.source(source).interfaces.get(local as usize).copied()
    }
    fn process(&mut self, source: usize, block: Block) -> Result<Option<Vec<u8>>> {
        match block {
            Block::SectionHeader { pbo, shb, .. } => {
                debug!(
                    "source {} section {:?} applications {:?} consumed",
                    source,
                    pbo,
                    shb.user_applications()
                );
                self.source(source).interfaces.clear();
                Ok(None)
            }
            Block::PcapHeader { header, .. } => {
                self.source(source).interfaces.clear();
                Ok(Some(self.register(source, header.to_interface())?))
            }
            Block::InterfaceDescription { pbo, mut idb, .. } => {
                if pbo == PcapByteOrder::BigEndian {
                    idb.options.swap_numeric(OptionLayout::interface_description);
                }
                Ok(Some(self.register(source, idb)?))
            }
            Block::Packet {
                pbo,
                format,
                mut epb,
                ..
            } => {
                let id = match self.translate(source, epb.interface_id) {
                    Some(id) => id,
                    None => {
                        warn!(
                            "source {} packet on unknown interface {} dropped",
                            source, epb.interface_id
                        );
                        return Ok(None);
                    }
                };
                epb.interface_id = id;
                if pbo == PcapByteOrder::BigEndian
                    && matches!(format, PacketFormat::Enhanced | PacketFormat::Obsolete)
                {
                    epb.options.swap_numeric(OptionLayout::enhanced_packet);
                }
                Ok(Some(epb.to_vec(OUTPUT_ORDER)?))
            }
            Block::Other {
                pbo,
                block_type,
                raw,
            } if block_type == BlockType::InterfaceStatisticsBlock.to_u32() => {
                let mut isb = InterfaceStatisticsBlock::parse(&raw, pbo)?;
                match self.translate(source, isb.interface_id) {
                    Some(id) => {
                        isb.interface_id = id;
                        if pbo == PcapByteOrder::BigEndian {
                            isb.options.swap_numeric(OptionLayout::interface_statistics);
                        }
                        Ok(Some(isb.to_vec(OUTPUT_ORDER)?))
                    }
                    None => Ok(None),
                }
            }
            Block::Other { block_type, .. } => {
                debug!(
                    "source {} block type {:#x} can not be merged, dropped",
                    source, block_type
                );
                Ok(None)
            }
        }
    }
    fn seed(&self) -> Result<Vec<u8>> {
        let mut data = self.shb.clone();
        for idb in &self.interfaces {
            data.extend(idb.to_vec(OUTPUT_ORDER)?);
        }
        Ok(data)
    }
}

#[derive(Debug)]
enum State {
    Passthrough(Passthrough),
    Synthesized(Synthesized),
}

#[derive(Debug)]
pub struct Merger {
    state: State,
}

impl Merger {
    /// Passthrough for a single source, synthesized sections otherwise.
    pub fn new(source_count: usize) -> Result<Merger> {
        let state = if source_count > 1 {
            let shb = SectionHeaderBlock::synthesized(TOOL_USER_APPL).to_vec(OUTPUT_ORDER)?;
            State::Synthesized(Synthesized {
                shb,
                interfaces: Vec::new(),
                sources: vec![SourceSection::default(); source_count],
            })
        } else {
            State::Passthrough(Passthrough::default())
        };
        Ok(Merger { state })
    }
    pub fn mode(&self) -> MergeMode {
        match self.state {
            State::Passthrough(_) => MergeMode::Passthrough,
            State::Synthesized(_) => MergeMode::Synthesized,
        }
    }
    /// Number of interfaces a freshly seeded file describes.
    pub fn interface_count(&self) -> usize {
        match &self.state {
            State::Passthrough(p) => p.interfaces.len() + usize::from(p.legacy),
            State::Synthesized(s) => s.interfaces.len(),
        }
    }
    /// The bytes to write for `block`, `None` when it is suppressed.
    pub fn process(&mut self, source: usize, block: Block) -> Result<Option<Vec<u8>>> {
        trace!("source {} block {} bytes", source, block.raw().len());
        match &mut self.state {
            State::Passthrough(p) => {
                match &block {
                    Block::SectionHeader { raw, .. } => {
                        p.section = Some(raw.clone());
                        p.legacy = false;
                        p.interfaces.clear();
                    }
                    Block::PcapHeader { raw, .. } => {
                        p.section = Some(raw.clone());
                        p.legacy = true;
                        p.interfaces.clear();
                    }
                    Block::InterfaceDescription { raw, .. } => p.interfaces.push(raw.clone()),
                    _ => (),
                }
                let raw = match block {
                    Block::SectionHeader { raw, .. }
                    | Block::InterfaceDescription { raw, .. }
                    | Block::Packet { raw, .. }
                    | Block::Other { raw, .. }
                    | Block::PcapHeader { raw, .. } => raw,
                };
                Ok(Some(raw))
            }
            State::Synthesized(s) => s.process(source, block),
        }
    }
    /// What a new output file starts with, given the block about to be written into it.
    pub fn seed(&self, next: Option<&Block>) -> Result<Vec<u8>> {
        match &self.state {
            State::Passthrough(p) => {
                // a new section describes itself
                if next.is_some_and(|b| b.starts_section()) {
                    return Ok(Vec::new());
                }
                let mut data = p.section.clone().unwrap_or_default();
                for idb in &p.interfaces {
                    data.extend_from_slice(idb);
                }
                Ok(data)
            }
            State::Synthesized(s) => s.seed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::pcapng::EnhancedPacketBlock;
    use crate::fs::pcapng::GeneralOption;
    use crate::fs::pcapng::Options;
    use crate::fs::pcapng::SHB_USERAPPL;
    use crate::reader::parse_block;

    fn shb(pbo: PcapByteOrder) -> Block {
        let raw = SectionHeaderBlock::new(Options::new(vec![GeneralOption::new(
            SHB_USERAPPL,
            b"source writer",
        )]))
        .to_vec(pbo)
        .unwrap();
        parse_block(&raw, None).unwrap()
    }
    fn idb(pbo: PcapByteOrder, name: &str) -> Block {
        let raw = InterfaceDescriptionBlock::new(
            1,
            65535,
            Options::new(vec![
                GeneralOption::new(2, name.as_bytes()),
                // if_speed
                GeneralOption::new(8, &1000u64.to_be_bytes()),
            ]),
        )
        .to_vec(pbo)
        .unwrap();
        parse_block(&raw, Some(pbo)).unwrap()
    }
    fn epb(pbo: PcapByteOrder, interface_id: u32) -> Block {
        let raw = EnhancedPacketBlock {
            interface_id,
            ts_high: 0,
            ts_low: 7,
            captured_packet_length: 4,
            original_packet_length: 4,
            packet_data: vec![9, 9, 9, 9],
            options: Options::default(),
        }
        .to_vec(pbo)
        .unwrap();
        parse_block(&raw, Some(pbo)).unwrap()
    }

    #[test]
    fn passthrough_reseeds_current_section() {
        let mut merger = Merger::new(1).unwrap();
        assert_eq!(merger.mode(), MergeMode::Passthrough);
        let pbo = PcapByteOrder::BigEndian;
        let blocks = [shb(pbo), idb(pbo, "eth0"), epb(pbo, 0)];
        let expected = [blocks[0].raw(), blocks[1].raw()].concat();
        for block in blocks.iter().cloned() {
            let raw = block.raw().to_vec();
            let out = merger.process(0, block).unwrap().unwrap();
            assert_eq!(out, raw);
        }
        let seed = merger.seed(Some(&blocks[2])).unwrap();
        assert_eq!(seed, expected);
        assert_eq!(merger.interface_count(), 1);
        assert!(merger.seed(Some(&shb(pbo))).unwrap().is_empty());
    }
    #[test]
    fn synthesized_renumbers_and_converts() {
        let mut merger = Merger::new(2).unwrap();
        assert_eq!(merger.mode(), MergeMode::Synthesized);
        let be = PcapByteOrder::BigEndian;
        let le = PcapByteOrder::LittleEndian;
        assert!(merger.process(0, shb(le)).unwrap().is_none());
        assert!(merger.process(1, shb(be)).unwrap().is_none());
        merger.process(0, idb(le, "a0")).unwrap().unwrap();
        let out = merger.process(1, idb(be, "b0")).unwrap().unwrap();
        let converted = parse_block(&out, Some(le)).unwrap();
        match converted {
            Block::InterfaceDescription { idb, .. } => {
                assert_eq!(idb.name().unwrap(), "b0");
                assert_eq!(idb.linktype, 1);
                assert_eq!(idb.options.find(8).unwrap().option_value, 1000u64.to_le_bytes());
            }
            other => panic!("unexpected block {:?}", other),
        }
        let out = merger.process(1, epb(be, 0)).unwrap().unwrap();
        match parse_block(&out, Some(le)).unwrap() {
            Block::Packet { epb, .. } => {
                assert_eq!(epb.interface_id, 1);
                assert_eq!(epb.ts_low, 7);
                assert_eq!(epb.packet_data, vec![9, 9, 9, 9]);
            }
            other => panic!("unexpected block {:?}", other),
        }
        // unknown interface
        assert!(merger.process(0, epb(le, 5)).unwrap().is_none());

        let seed = merger.seed(None).unwrap();
        let first = parse_block(&seed, None).unwrap();
        match &first {
            Block::SectionHeader { pbo, shb, .. } => {
                assert_eq!(*pbo, le);
                assert_eq!(shb.user_applications(), vec![TOOL_USER_APPL.to_string()]);
            }
            other => panic!("unexpected block {:?}", other),
        }
        assert_eq!(merger.interface_count(), 2);
    }
    #[test]
    fn synthesized_new_section_resets_interface_map() {
        let mut merger = Merger::new(2).unwrap();
        let le = PcapByteOrder::LittleEndian;
        merger.process(0, shb(le)).unwrap();
        merger.process(0, idb(le, "a0")).unwrap();
        merger.process(0, shb(le)).unwrap();
        merger.process(0, idb(le, "a1")).unwrap();
        let out = merger.process(0, epb(le, 0)).unwrap().unwrap();
        match parse_block(&out, Some(le)).unwrap() {
            Block::Packet { epb, .. } => assert_eq!(epb.interface_id, 1),
            other => panic!("unexpected block {:?}", other),
        }
        assert_eq!(merger.interface_count(), 2);
    }
}
