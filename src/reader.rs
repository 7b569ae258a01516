//! Byte-order aware parsing of whole pcapng blocks and classic pcap records.
//!
//! The functions here are pure: the caller owns the cursor and hands over the
//! bytes of exactly one block, along with the byte order of the enclosing
//! section (unknown until a section header has been seen).
use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::PcapByteOrder;
use crate::Result;
use crate::error::RingcapError;
use crate::fs::pcap::FILE_HEADER_SIZE;
use crate::fs::pcap::FileHeader;
use crate::fs::pcap::PacketRecord;
use crate::fs::pcap::RECORD_HEADER_SIZE;
use crate::fs::pcap::detect_magic;
use crate::fs::pcapng::BYTE_ORDER_MAGIC;
use crate::fs::pcapng::BlockType;
use crate::fs::pcapng::EnhancedPacketBlock;
use crate::fs::pcapng::InterfaceDescriptionBlock;
use crate::fs::pcapng::SectionHeaderBlock;

/// Every block header carries at least the type and both lengths.
pub const MIN_BLOCK_SIZE: usize = 12;
/// Larger blocks are treated as corruption rather than allocated.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

// General Block Structure:
// from https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html
//                        1                   2                   3
//    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 0 |                          Block Type                           |
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 4 |                      Block Total Length                       |
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 8 /                          Block Body                           /
//   /              variable length, padded to 32 bits               /
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//   |                      Block Total Length                       |
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

/// Which framing a packet arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    Enhanced,
    Simple,
    /// The obsolete Packet Block (type 2).
    Obsolete,
    /// A classic pcap record.
    Record { nanosecond: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    SectionHeader {
        pbo: PcapByteOrder,
        raw: Vec<u8>,
        shb: SectionHeaderBlock,
    },
    InterfaceDescription {
        pbo: PcapByteOrder,
        raw: Vec<u8>,
        idb: InterfaceDescriptionBlock,
    },
    /// Any block carrying a packet, `epb` holds its fields in the enhanced form.
    Packet {
        pbo: PcapByteOrder,
        raw: Vec<u8>,
        format: PacketFormat,
        epb: EnhancedPacketBlock,
    },
    Other {
        pbo: PcapByteOrder,
        block_type: u32,
        raw: Vec<u8>,
    },
    /// The file header of a classic pcap stream, both section and single interface.
    PcapHeader {
        pbo: PcapByteOrder,
        raw: Vec<u8>,
        header: FileHeader,
    },
}

impl Block {
    /// The bytes exactly as they were read.
    pub fn raw(&self) -> &[u8] {
        match self {
            Block::SectionHeader { raw, .. }
            | Block::InterfaceDescription { raw, .. }
            | Block::Packet { raw, .. }
            | Block::Other { raw, .. }
            | Block::PcapHeader { raw, .. } => raw,
        }
    }
    pub fn byte_order(&self) -> PcapByteOrder {
        match self {
            Block::SectionHeader { pbo, .. }
            | Block::InterfaceDescription { pbo, .. }
            | Block::Packet { pbo, .. }
            | Block::Other { pbo, .. }
            | Block::PcapHeader { pbo, .. } => *pbo,
        }
    }
    pub fn is_packet(&self) -> bool {
        matches!(self, Block::Packet { .. })
    }
    pub fn starts_section(&self) -> bool {
        matches!(self, Block::SectionHeader { .. } | Block::PcapHeader { .. })
    }
}

fn read_u32(data: &[u8], pbo: PcapByteOrder) -> u32 {
    match pbo {
        PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
            LittleEndian::read_u32(data)
        }
        PcapByteOrder::BigEndian => BigEndian::read_u32(data),
    }
}

/// Decodes the byte order and total length from the first 12 bytes of a block.
pub fn block_header(head: &[u8], section: Option<PcapByteOrder>) -> Result<(PcapByteOrder, usize)> {
    if head.len() < MIN_BLOCK_SIZE {
        return Err(RingcapError::TruncatedBlock {
            needed: MIN_BLOCK_SIZE,
            available: head.len(),
        });
    }
    // the section header type reads the same in both orders
    let pbo = if LittleEndian::read_u32(&head[0..4]) == BlockType::SectionHeaderBlock.to_u32() {
        if LittleEndian::read_u32(&head[8..12]) == BYTE_ORDER_MAGIC {
            PcapByteOrder::LittleEndian
        } else if BigEndian::read_u32(&head[8..12]) == BYTE_ORDER_MAGIC {
            PcapByteOrder::BigEndian
        } else {
            return Err(RingcapError::UnknownMagic {
                magic: LittleEndian::read_u32(&head[8..12]),
            });
        }
    } else {
        match section {
            Some(pbo) => pbo,
            None => return Err(RingcapError::corrupt("block found before any section header")),
        }
    };
    let length = read_u32(&head[4..8], pbo) as usize;
    if length < MIN_BLOCK_SIZE || length % 4 != 0 || length > MAX_BLOCK_SIZE {
        return Err(RingcapError::corrupt(format!("invalid block length {}", length)));
    }
    Ok((pbo, length))
}

/// Parses the block at the start of `buf`.
///
/// `section` is the byte order of the enclosing section, `None` before the
/// first section header. A section header selects its own order from its
/// magic, and that order applies to the blocks following it.
pub fn parse_block(buf: &[u8], section: Option<PcapByteOrder>) -> Result<Block> {
    let (pbo, length) = block_header(buf, section)?;
    if buf.len() < length {
        return Err(RingcapError::TruncatedBlock {
            needed: length,
            available: buf.len(),
        });
    }
    let trailing = read_u32(&buf[length - 4..length], pbo) as usize;
    if trailing != length {
        return Err(RingcapError::corrupt(format!(
            "trailing block length {} differs from {}",
            trailing, length
        )));
    }
    let raw = buf[..length].to_vec();
    let block_type = read_u32(&raw[0..4], pbo);
    let block = match BlockType::from_u32(block_type) {
        Some(BlockType::SectionHeaderBlock) => {
            let shb = SectionHeaderBlock::parse(&raw, pbo)?;
            Block::SectionHeader { pbo, raw, shb }
        }
        Some(BlockType::InterfaceDescriptionBlock) => {
            let idb = InterfaceDescriptionBlock::parse(&raw, pbo)?;
            Block::InterfaceDescription { pbo, raw, idb }
        }
        Some(t @ BlockType::EnhancedPacketBlock)
        | Some(t @ BlockType::SimplePacketBlock)
        | Some(t @ BlockType::PacketBlock) => {
            let epb = EnhancedPacketBlock::parse(&raw, t, pbo)?;
            let format = match t {
                BlockType::SimplePacketBlock => PacketFormat::Simple,
                BlockType::PacketBlock => PacketFormat::Obsolete,
                _ => PacketFormat::Enhanced,
            };
            Block::Packet {
                pbo,
                raw,
                format,
                epb,
            }
        }
        _ => Block::Other {
            pbo,
            block_type,
            raw,
        },
    };
    Ok(block)
}

/// Parses a classic pcap file header, detecting its byte order from the magic.
pub fn parse_pcap_header(buf: &[u8]) -> Result<Block> {
    if buf.len() < FILE_HEADER_SIZE {
        return Err(RingcapError::TruncatedBlock {
            needed: FILE_HEADER_SIZE,
            available: buf.len(),
        });
    }
    let magic = [buf[0], buf[1], buf[2], buf[3]];
    let (pbo, _) = detect_magic(magic).ok_or(RingcapError::UnknownMagic {
        magic: u32::from_le_bytes(magic),
    })?;
    let raw = buf[..FILE_HEADER_SIZE].to_vec();
    let header = FileHeader::parse(&raw, pbo)?;
    Ok(Block::PcapHeader { pbo, raw, header })
}

/// Total size of the pcap record whose 16 bytes header starts `head`.
pub fn record_length(head: &[u8], pbo: PcapByteOrder) -> Result<usize> {
    if head.len() < RECORD_HEADER_SIZE {
        return Err(RingcapError::TruncatedBlock {
            needed: RECORD_HEADER_SIZE,
            available: head.len(),
        });
    }
    let captured = PacketRecord::captured_length(head, pbo) as usize;
    if captured > MAX_BLOCK_SIZE {
        return Err(RingcapError::corrupt(format!("invalid record length {}", captured)));
    }
    Ok(RECORD_HEADER_SIZE + captured)
}

/// Parses the classic pcap record at the start of `buf`.
pub fn parse_record(buf: &[u8], pbo: PcapByteOrder, nanosecond: bool) -> Result<Block> {
    let length = record_length(buf, pbo)?;
    if buf.len() < length {
        return Err(RingcapError::TruncatedBlock {
            needed: length,
            available: buf.len(),
        });
    }
    let raw = buf[..length].to_vec();
    let record = PacketRecord::parse(&raw, pbo)?;
    Ok(Block::Packet {
        pbo,
        raw,
        format: PacketFormat::Record { nanosecond },
        epb: record.to_enhanced(0, nanosecond),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::pcapng::GeneralOption;
    use crate::fs::pcapng::Options;
    use crate::fs::pcapng::SHB_USERAPPL;

    fn shb(pbo: PcapByteOrder) -> Vec<u8> {
        SectionHeaderBlock::new(Options::new(vec![GeneralOption::new(
            SHB_USERAPPL,
            b"test writer",
        )]))
        .to_vec(pbo)
        .unwrap()
    }

    #[test]
    fn section_header_selects_byte_order() {
        for pbo in [PcapByteOrder::LittleEndian, PcapByteOrder::BigEndian] {
            let raw = shb(pbo);
            // an earlier section of the other order must not matter
            let block = parse_block(&raw, Some(PcapByteOrder::LittleEndian)).unwrap();
            assert!(block.starts_section());
            assert_eq!(block.raw(), &raw[..]);
            match block {
                Block::SectionHeader { pbo: got, shb, .. } => {
                    assert_eq!(got, pbo);
                    assert_eq!(shb.user_applications(), vec!["test writer".to_string()]);
                }
                other => panic!("unexpected block {:?}", other),
            }
        }
    }
    #[test]
    fn unknown_magic() {
        let mut raw = shb(PcapByteOrder::LittleEndian);
        raw[8..12].copy_from_slice(&[1, 2, 3, 4]);
        assert!(matches!(
            parse_block(&raw, None),
            Err(RingcapError::UnknownMagic { .. })
        ));
    }
    #[test]
    fn truncated_block() {
        let raw = shb(PcapByteOrder::BigEndian);
        assert!(matches!(
            parse_block(&raw[..raw.len() - 1], None),
            Err(RingcapError::TruncatedBlock { .. })
        ));
        assert!(matches!(
            parse_block(&raw[..8], None),
            Err(RingcapError::TruncatedBlock { needed: 12, available: 8 })
        ));
    }
    #[test]
    fn block_before_section() {
        let idb = InterfaceDescriptionBlock::new(1, 0, Options::default())
            .to_vec(PcapByteOrder::LittleEndian)
            .unwrap();
        assert!(matches!(
            parse_block(&idb, None),
            Err(RingcapError::StreamCorrupt { .. })
        ));
        let block = parse_block(&idb, Some(PcapByteOrder::LittleEndian)).unwrap();
        assert!(matches!(block, Block::InterfaceDescription { .. }));
    }
    #[test]
    fn mismatched_trailing_length() {
        let mut idb = InterfaceDescriptionBlock::new(1, 0, Options::default())
            .to_vec(PcapByteOrder::LittleEndian)
            .unwrap();
        let last = idb.len() - 4;
        idb[last] = 0x40;
        assert!(matches!(
            parse_block(&idb, Some(PcapByteOrder::LittleEndian)),
            Err(RingcapError::StreamCorrupt { .. })
        ));
    }
    #[test]
    fn unknown_blocks_are_other() {
        // a custom block with a 4 bytes body
        let raw = [0xad, 0x0b, 0, 0, 16, 0, 0, 0, 1, 2, 3, 4, 16, 0, 0, 0];
        let block = parse_block(&raw, Some(PcapByteOrder::LittleEndian)).unwrap();
        assert!(matches!(block, Block::Other { block_type: 0xbad, .. }));
        assert!(!block.is_packet());
    }
    #[test]
    fn pcap_header_and_record() {
        let header = FileHeader::new(false, 65535, 1)
            .to_vec(PcapByteOrder::BigEndian)
            .unwrap();
        let block = parse_pcap_header(&header).unwrap();
        assert_eq!(block.byte_order(), PcapByteOrder::BigEndian);
        assert!(block.starts_section());

        let record = PacketRecord::new(1, 2, &[7; 20])
            .to_vec(PcapByteOrder::BigEndian)
            .unwrap();
        assert_eq!(record_length(&record, PcapByteOrder::BigEndian).unwrap(), 36);
        let block = parse_record(&record, PcapByteOrder::BigEndian, false).unwrap();
        match block {
            Block::Packet { format, epb, .. } => {
                assert_eq!(format, PacketFormat::Record { nanosecond: false });
                assert_eq!(epb.packet_data, vec![7; 20]);
            }
            other => panic!("unexpected block {:?}", other),
        }
    }
}
