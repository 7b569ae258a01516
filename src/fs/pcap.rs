use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use std::io;
use std::io::Cursor;

use crate::PcapByteOrder;
use crate::error::RingcapError;
use crate::fs::pcapng::EnhancedPacketBlock;
use crate::fs::pcapng::GeneralOption;
use crate::fs::pcapng::IDB_TSRESOL;
use crate::fs::pcapng::InterfaceDescriptionBlock;
use crate::fs::pcapng::Options;

/// Seconds and microseconds timestamps.
pub const MAGIC_USEC: u32 = 0xa1b2c3d4;
/// Seconds and nanoseconds timestamps.
pub const MAGIC_NSEC: u32 = 0xa1b23c4d;

pub const FILE_HEADER_SIZE: usize = 24;
pub const RECORD_HEADER_SIZE: usize = 16;

/// Returns the byte order and the nanosecond flag if `magic` (read as little endian) is a pcap magic.
pub fn detect_magic(magic: [u8; 4]) -> Option<(PcapByteOrder, bool)> {
    match u32::from_le_bytes(magic) {
        MAGIC_USEC => Some((PcapByteOrder::LittleEndian, false)),
        MAGIC_NSEC => Some((PcapByteOrder::LittleEndian, true)),
        m if m.swap_bytes() == MAGIC_USEC => Some((PcapByteOrder::BigEndian, false)),
        m if m.swap_bytes() == MAGIC_NSEC => Some((PcapByteOrder::BigEndian, true)),
        _ => None,
    }
}

// File Header
// from https://www.ietf.org/archive/id/draft-gharris-opsawg-pcap-01.html#name-file-header
//
//                         1                   2                   3
//     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  0 |                          Magic Number                         |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  4 |          Major Version        |         Minor Version         |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  8 |                           Reserved1                           |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 12 |                           Reserved2                           |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 16 |                            SnapLen                            |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 20 | FCS |f|0 0 0 0 0 0 0 0 0 0 0 0|         LinkType              |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic Number (32 bits):
    /// If the value is 0xA1B2C3D4, time stamps in Packet Records are in seconds and microseconds;
    /// if it is 0xA1B23C4D, time stamps in Packet Records are in seconds and nanoseconds.
    pub magic_number: u32,
    /// Major Version (16 bits), 2 for the current format.
    pub major_version: u16,
    /// Minor Version (16 bits), 4 for the current format.
    pub minor_version: u16,
    reserved1: u32,
    reserved2: u32,
    /// SnapLen (32 bits):
    /// An unsigned value indicating the maximum number of octets captured from each packet.
    pub snaplen: u32,
    /// LinkType and the FCS bits, only the lower 16 bits are the link type.
    pub linktype: u32,
}

impl Default for FileHeader {
    fn default() -> Self {
        FileHeader {
            magic_number: MAGIC_USEC,
            major_version: 2,
            minor_version: 4,
            reserved1: 0,
            reserved2: 0,
            snaplen: 65535,
            linktype: 1,
        }
    }
}

impl FileHeader {
    pub fn new(nanosecond: bool, snaplen: u32, linktype: u16) -> Self {
        FileHeader {
            magic_number: if nanosecond { MAGIC_NSEC } else { MAGIC_USEC },
            snaplen,
            linktype: linktype as u32,
            ..Default::default()
        }
    }
    pub fn nanosecond(&self) -> bool {
        self.magic_number == MAGIC_NSEC
    }
    /// The interface this file header stands for once merged into a pcapng section.
    pub fn to_interface(&self) -> InterfaceDescriptionBlock {
        let options = if self.nanosecond() {
            Options::new(vec![GeneralOption::new(IDB_TSRESOL, &[9])])
        } else {
            Options::default()
        };
        InterfaceDescriptionBlock::new((self.linktype & 0xffff) as u16, self.snaplen, options)
    }
    fn encode<B: ByteOrder>(&self) -> io::Result<Vec<u8>> {
        let mut ret = Vec::with_capacity(FILE_HEADER_SIZE);
        ret.write_u32::<B>(self.magic_number)?;
        ret.write_u16::<B>(self.major_version)?;
        ret.write_u16::<B>(self.minor_version)?;
        ret.write_u32::<B>(self.reserved1)?;
        ret.write_u32::<B>(self.reserved2)?;
        ret.write_u32::<B>(self.snaplen)?;
        ret.write_u32::<B>(self.linktype)?;
        Ok(ret)
    }
    pub fn to_vec(&self, pbo: PcapByteOrder) -> Result<Vec<u8>, RingcapError> {
        let ret = match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                self.encode::<LittleEndian>()?
            }
            PcapByteOrder::BigEndian => self.encode::<BigEndian>()?,
        };
        Ok(ret)
    }
    fn parse_with<B: ByteOrder>(raw: &[u8]) -> io::Result<Self> {
        let mut rdr = Cursor::new(raw);
        Ok(FileHeader {
            magic_number: rdr.read_u32::<B>()?,
            major_version: rdr.read_u16::<B>()?,
            minor_version: rdr.read_u16::<B>()?,
            reserved1: rdr.read_u32::<B>()?,
            reserved2: rdr.read_u32::<B>()?,
            snaplen: rdr.read_u32::<B>()?,
            linktype: rdr.read_u32::<B>()?,
        })
    }
    pub fn parse(raw: &[u8], pbo: PcapByteOrder) -> Result<Self, RingcapError> {
        if raw.len() < FILE_HEADER_SIZE {
            return Err(RingcapError::TruncatedBlock {
                needed: FILE_HEADER_SIZE,
                available: raw.len(),
            });
        }
        match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                Self::parse_with::<LittleEndian>(raw)
            }
            PcapByteOrder::BigEndian => Self::parse_with::<BigEndian>(raw),
        }
        .map_err(|e| RingcapError::corrupt(format!("pcap file header: {}", e)))
    }
}

// Packet Record
// from https://www.ietf.org/archive/id/draft-gharris-opsawg-pcap-01.html#name-packet-record
//                         1                   2                   3
//     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  0 |                      Timestamp (Seconds)                      |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  4 |            Timestamp (Microseconds or nanoseconds)            |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  8 |                    Captured Packet Length                     |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 12 |                    Original Packet Length                     |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 16 /                                                               /
//    /                          Packet Data                          /
//    /                        variable length                        /
//    /                                                               /
//    +---------------------------------------------------------------+

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub ts_sec: u32,
    /// Microseconds or nanoseconds, depending on the file magic.
    pub ts_frac: u32,
    pub captured_packet_length: u32,
    pub original_packet_length: u32,
    pub packet_data: Vec<u8>,
}

impl PacketRecord {
    pub fn new(ts_sec: u32, ts_frac: u32, packet_data: &[u8]) -> Self {
        PacketRecord {
            ts_sec,
            ts_frac,
            captured_packet_length: packet_data.len() as u32,
            original_packet_length: packet_data.len() as u32,
            packet_data: packet_data.to_vec(),
        }
    }
    /// Reads the captured length out of a 16 bytes record header.
    pub fn captured_length(header: &[u8], pbo: PcapByteOrder) -> u32 {
        let field = &header[8..12];
        match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                LittleEndian::read_u32(field)
            }
            PcapByteOrder::BigEndian => BigEndian::read_u32(field),
        }
    }
    /// The same packet as an Enhanced Packet Block of `interface_id`, the timestamp kept in the file's units.
    pub fn to_enhanced(&self, interface_id: u32, nanosecond: bool) -> EnhancedPacketBlock {
        let units = if nanosecond { 1_000_000_000 } else { 1_000_000 };
        let mut epb = EnhancedPacketBlock {
            interface_id,
            ts_high: 0,
            ts_low: 0,
            captured_packet_length: self.captured_packet_length,
            original_packet_length: self.original_packet_length,
            packet_data: self.packet_data.clone(),
            options: Options::default(),
        };
        epb.set_timestamp(self.ts_sec as u64 * units + self.ts_frac as u64);
        epb
    }
    fn encode<B: ByteOrder>(&self) -> io::Result<Vec<u8>> {
        let mut ret = Vec::with_capacity(RECORD_HEADER_SIZE + self.packet_data.len());
        ret.write_u32::<B>(self.ts_sec)?;
        ret.write_u32::<B>(self.ts_frac)?;
        ret.write_u32::<B>(self.captured_packet_length)?;
        ret.write_u32::<B>(self.original_packet_length)?;
        ret.extend_from_slice(&self.packet_data);
        Ok(ret)
    }
    pub fn to_vec(&self, pbo: PcapByteOrder) -> Result<Vec<u8>, RingcapError> {
        let ret = match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                self.encode::<LittleEndian>()?
            }
            PcapByteOrder::BigEndian => self.encode::<BigEndian>()?,
        };
        Ok(ret)
    }
    fn parse_with<B: ByteOrder>(raw: &[u8]) -> io::Result<Self> {
        let mut rdr = Cursor::new(raw);
        let ts_sec = rdr.read_u32::<B>()?;
        let ts_frac = rdr.read_u32::<B>()?;
        let captured_packet_length = rdr.read_u32::<B>()?;
        let original_packet_length = rdr.read_u32::<B>()?;
        // read only capt_len length
        let end = RECORD_HEADER_SIZE + captured_packet_length as usize;
        let packet_data = raw
            .get(RECORD_HEADER_SIZE..end)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?
            .to_vec();
        Ok(PacketRecord {
            ts_sec,
            ts_frac,
            captured_packet_length,
            original_packet_length,
            packet_data,
        })
    }
    pub fn parse(raw: &[u8], pbo: PcapByteOrder) -> Result<Self, RingcapError> {
        match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                Self::parse_with::<LittleEndian>(raw)
            }
            PcapByteOrder::BigEndian => Self::parse_with::<BigEndian>(raw),
        }
        .map_err(|e| RingcapError::corrupt(format!("pcap packet record: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_detection() {
        assert!(matches!(
            detect_magic([0xd4, 0xc3, 0xb2, 0xa1]),
            Some((PcapByteOrder::LittleEndian, false))
        ));
        assert!(matches!(
            detect_magic([0xa1, 0xb2, 0x3c, 0x4d]),
            Some((PcapByteOrder::BigEndian, true))
        ));
        assert!(detect_magic([0x0a, 0x0d, 0x0d, 0x0a]).is_none());
    }
    #[test]
    fn header_to_interface() {
        let header = FileHeader::new(true, 262144, 1);
        let data = header.to_vec(PcapByteOrder::BigEndian).unwrap();
        assert_eq!(data.len(), FILE_HEADER_SIZE);
        let parsed = FileHeader::parse(&data, PcapByteOrder::BigEndian).unwrap();
        assert_eq!(parsed, header);
        let idb = parsed.to_interface();
        assert_eq!(idb.linktype, 1);
        assert_eq!(idb.snaplen, 262144);
        assert_eq!(idb.options.find(IDB_TSRESOL).unwrap().option_value, vec![9]);
    }
    #[test]
    fn record_to_enhanced() {
        let record = PacketRecord::new(2, 500, &[0xaa; 10]);
        let data = record.to_vec(PcapByteOrder::LittleEndian).unwrap();
        assert_eq!(PacketRecord::captured_length(&data, PcapByteOrder::LittleEndian), 10);
        let parsed = PacketRecord::parse(&data, PcapByteOrder::LittleEndian).unwrap();
        let epb = parsed.to_enhanced(4, false);
        assert_eq!(epb.interface_id, 4);
        assert_eq!(epb.timestamp(), 2_000_500);
        assert_eq!(epb.packet_data.len(), 10);
    }
}
