use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
#[cfg(feature = "libpnet")]
use pnet::datalink::MacAddr;
#[cfg(feature = "libpnet")]
use pnet::ipnetwork::IpNetwork;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::process::Command;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use strum_macros::EnumString;

use crate::PcapByteOrder;
use crate::error::RingcapError;

/// The Byte-Order Magic of every Section Header Block.
pub const BYTE_ORDER_MAGIC: u32 = 0x1a2b3c4d;

pub const OPT_ENDOFOPT: u16 = 0;
pub const OPT_COMMENT: u16 = 1;
pub const SHB_HARDWARE: u16 = 2;
pub const SHB_OS: u16 = 3;
pub const SHB_USERAPPL: u16 = 4;
pub const IDB_NAME: u16 = 2;
pub const IDB_DESCRIPTION: u16 = 3;
pub const IDB_IPV4ADDR: u16 = 4;
pub const IDB_IPV6ADDR: u16 = 5;
pub const IDB_MACADDR: u16 = 6;
pub const IDB_TSRESOL: u16 = 9;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter)]
pub enum LinkType {
    NULL = 0,
    ETHERNET = 1,
    AX25 = 3,
    IEEE8025 = 6,
    SLIP = 8,
    PPP = 9,
    FDDI = 10,
    PPPHDLC = 50,
    PPPETHER = 51,
    RAW = 101,
    CHDLC = 104,
    IEEE80211 = 105,
    LOOP = 108,
    LINUXSLL = 113,
    PFLOG = 117,
    IEEE80211RADIOTAP = 127,
    USBLINUX = 189,
    PPI = 192,
    IPV4 = 228,
    IPV6 = 229,
    NFLOG = 239,
    USBPCAP = 249,
    WIRESHARKUPPERPDU = 252,
    NETLINK = 253,
    LINUXSLL2 = 276,
}

impl LinkType {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
    pub fn from_u16(value: u16) -> Option<Self> {
        LinkType::iter().find(|&e| e.to_u16() == value)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum BlockType {
    SectionHeaderBlock = 0x0a0d0d0a,
    InterfaceDescriptionBlock = 0x01,
    /// Obsolete, superseded by the Enhanced Packet Block.
    PacketBlock = 0x02,
    SimplePacketBlock = 0x03,
    NameResolutionBlock = 0x04,
    InterfaceStatisticsBlock = 0x05,
    EnhancedPacketBlock = 0x06,
    DecryptionSecretsBlock = 0x0a,
    CustomBlock = 0x0bad,
    CustomBlockNoCopy = 0x40000bad,
}

impl BlockType {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
    pub fn from_u32(value: u32) -> Option<Self> {
        BlockType::iter().find(|&e| e.to_u32() == value)
    }
}

/// How the value of an option has to be treated when a block changes byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionLayout {
    /// Strings and byte arrays, copied as is.
    Opaque,
    U32,
    U64,
    /// A timestamp stored as high and low 32 bits halves.
    TwoU32,
}

impl OptionLayout {
    pub fn interface_description(code: u16) -> Self {
        match code {
            // if_speed, if_tsoffset
            8 | 14 => OptionLayout::U64,
            // if_tzone
            10 => OptionLayout::U32,
            _ => OptionLayout::Opaque,
        }
    }
    pub fn enhanced_packet(code: u16) -> Self {
        match code {
            // epb_flags, epb_queue
            2 | 6 => OptionLayout::U32,
            // epb_dropcount, epb_packetid
            4 | 5 => OptionLayout::U64,
            _ => OptionLayout::Opaque,
        }
    }
    pub fn interface_statistics(code: u16) -> Self {
        match code {
            // isb_starttime, isb_endtime
            2 | 3 => OptionLayout::TwoU32,
            4..=8 => OptionLayout::U64,
            _ => OptionLayout::Opaque,
        }
    }
}

//                      1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |      Option Code              |         Option Length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// /                       Option Value                            /
// /              variable length, padded to 32 bits               /
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// /                                                               /
// /                 . . . other options . . .                     /
// /                                                               /
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Option Code == opt_endofopt |   Option Length == 0          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralOption {
    /// Option Type (16 bits):
    /// An unsigned value that contains the code that specifies the type of the current TLV record.
    pub option_code: u16,
    /// Option Length (16 bits):
    /// An unsigned value that contains the actual length of the following 'Option Value' field without the padding octets.
    pub option_length: u16,
    /// Option Value (variable length), kept without its padding and in the byte order of the section it was read from.
    pub option_value: Vec<u8>,
}

impl GeneralOption {
    pub fn new(option_code: u16, option_value: &[u8]) -> Self {
        Self {
            option_code,
            option_length: option_value.len() as u16,
            option_value: option_value.to_vec(),
        }
    }
    pub fn new_tail() -> Self {
        Self {
            option_code: OPT_ENDOFOPT,
            option_length: 0,
            option_value: Vec::new(),
        }
    }
    pub fn is_tail(&self) -> bool {
        self.option_code == OPT_ENDOFOPT
    }
    pub fn size(&self) -> usize {
        let option_code_size = 2;
        let option_length_size = 2;
        let after_padding_size = PcapNgUtils::padded_len(self.option_value.len());
        option_code_size + option_length_size + after_padding_size
    }
    /// Lossy UTF-8 view of the value, for string options.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.option_value)
            .trim_end_matches('\0')
            .to_string()
    }
    fn encode<B: ByteOrder>(&self, ret: &mut Vec<u8>) -> io::Result<()> {
        ret.write_u16::<B>(self.option_code)?;
        ret.write_u16::<B>(self.option_length)?;
        ret.extend_from_slice(&PcapNgUtils::padding_to_32(&self.option_value));
        Ok(())
    }
    pub fn to_vec(&self, pbo: PcapByteOrder) -> Result<Vec<u8>, RingcapError> {
        let mut ret = Vec::with_capacity(self.size());
        match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                self.encode::<LittleEndian>(&mut ret)?
            }
            PcapByteOrder::BigEndian => self.encode::<BigEndian>(&mut ret)?,
        }
        Ok(ret)
    }
    fn swap_numeric(&mut self, layout: OptionLayout) {
        let value = &mut self.option_value;
        match layout {
            OptionLayout::Opaque => (),
            OptionLayout::U32 if value.len() == 4 => value.reverse(),
            OptionLayout::U64 if value.len() == 8 => value.reverse(),
            OptionLayout::TwoU32 if value.len() == 8 => {
                value[..4].reverse();
                value[4..].reverse();
            }
            // a value of unexpected size is carried as is
            _ => (),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub options: Vec<GeneralOption>,
}

impl Options {
    /// Builds an option list, terminated by opt_endofopt when not empty.
    pub fn new(mut options: Vec<GeneralOption>) -> Self {
        if !options.is_empty() && !options.last().is_some_and(|o| o.is_tail()) {
            options.push(GeneralOption::new_tail());
        }
        Self { options }
    }
    pub fn size(&self) -> usize {
        self.options.iter().map(|op| op.size()).sum()
    }
    pub fn find(&self, option_code: u16) -> Option<&GeneralOption> {
        self.options.iter().find(|op| op.option_code == option_code)
    }
    /// All string values of the given option code, in order.
    pub fn strings(&self, option_code: u16) -> Vec<String> {
        self.options
            .iter()
            .filter(|op| !op.is_tail() && op.option_code == option_code)
            .map(|op| op.as_string())
            .collect()
    }
    /// Reverses the numeric option values so they can be written in the other byte order.
    pub fn swap_numeric(&mut self, layout: fn(u16) -> OptionLayout) {
        for op in &mut self.options {
            op.swap_numeric(layout(op.option_code));
        }
    }
    fn encode<B: ByteOrder>(&self, ret: &mut Vec<u8>) -> io::Result<()> {
        for op in &self.options {
            op.encode::<B>(ret)?;
        }
        Ok(())
    }
    pub fn to_vec(&self, pbo: PcapByteOrder) -> Result<Vec<u8>, RingcapError> {
        let mut ret = Vec::with_capacity(self.size());
        match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                self.encode::<LittleEndian>(&mut ret)?
            }
            PcapByteOrder::BigEndian => self.encode::<BigEndian>(&mut ret)?,
        }
        Ok(ret)
    }
    fn parse_with<B: ByteOrder>(data: &[u8]) -> io::Result<Self> {
        let mut rdr = Cursor::new(data);
        let mut options = Vec::new();
        while data.len() - rdr.position() as usize >= 4 {
            let option_code = rdr.read_u16::<B>()?;
            let option_length = rdr.read_u16::<B>()?;
            if option_code == OPT_ENDOFOPT {
                options.push(GeneralOption::new_tail());
                break;
            }
            let mut option_value = vec![0u8; option_length as usize];
            rdr.read_exact(&mut option_value)?;
            let padding = PcapNgUtils::padded_len(option_length as usize) - option_length as usize;
            let remain = data.len() - rdr.position() as usize;
            rdr.set_position(rdr.position() + padding.min(remain) as u64);
            options.push(GeneralOption {
                option_code,
                option_length,
                option_value,
            });
        }
        Ok(Self { options })
    }
    pub fn parse(data: &[u8], pbo: PcapByteOrder) -> Result<Self, RingcapError> {
        let options = match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                Self::parse_with::<LittleEndian>(data)
            }
            PcapByteOrder::BigEndian => Self::parse_with::<BigEndian>(data),
        };
        options.map_err(|e| RingcapError::corrupt(format!("options: {}", e)))
    }
}

// Section Header Block
// from https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html#section_shb
//                         1                   2                   3
//     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  0 |                   Block Type = 0x0A0D0D0A                     |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  4 |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  8 |                      Byte-Order Magic                         |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 12 |          Major Version        |         Minor Version         |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 16 |                                                               |
//    |                          Section Length                       |
//    |                                                               |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 24 /                                                               /
//    /                      Options (variable)                       /
//    /                                                               /
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//    |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeaderBlock {
    /// Byte-Order Magic (32 bits):
    /// An unsigned magic number, whose value is the hexadecimal number 0x1A2B3C4D.
    pub byte_order_magic: u32,
    /// Major Version (16 bits), 1 for the current format.
    pub major_version: u16,
    /// Minor Version (16 bits), 0 for the current format.
    pub minor_version: u16,
    /// Section Length (64 bits):
    /// A signed value specifying the length in octets of the following section, excluding the Section Header Block itself.
    /// -1 means the size of the section is not specified.
    pub section_length: i64,
    pub options: Options,
}

impl SectionHeaderBlock {
    const HEADER_SIZE: usize = 24;

    pub fn new(options: Options) -> Self {
        Self {
            byte_order_magic: BYTE_ORDER_MAGIC,
            major_version: 1,
            minor_version: 0,
            section_length: -1,
            options,
        }
    }
    /// A section header describing this host, with `user_appl` as its User Application option.
    pub fn synthesized(user_appl: &str) -> Self {
        let sysinfo = SysInfo::init();
        let mut options = Vec::new();
        // an unknown hardware or os is not worth failing a capture for
        if let Ok(cpu_model_name) = sysinfo.cpu_model_name() {
            options.push(GeneralOption::new(SHB_HARDWARE, cpu_model_name.as_bytes()));
        }
        if let Ok(system_name) = sysinfo.system_name() {
            options.push(GeneralOption::new(SHB_OS, system_name.as_bytes()));
        }
        options.push(GeneralOption::new(SHB_USERAPPL, user_appl.as_bytes()));
        Self::new(Options::new(options))
    }
    /// A very simple method to calculate the actual data size of a structure.
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.options.size() + 4
    }
    pub fn user_applications(&self) -> Vec<String> {
        self.options.strings(SHB_USERAPPL)
    }
    fn encode<B: ByteOrder>(&self) -> io::Result<Vec<u8>> {
        let size = self.size() as u32;
        let mut ret = Vec::with_capacity(size as usize);
        ret.write_u32::<B>(BlockType::SectionHeaderBlock.to_u32())?;
        ret.write_u32::<B>(size)?;
        ret.write_u32::<B>(self.byte_order_magic)?;
        ret.write_u16::<B>(self.major_version)?;
        ret.write_u16::<B>(self.minor_version)?;
        ret.write_i64::<B>(self.section_length)?;
        self.options.encode::<B>(&mut ret)?;
        ret.write_u32::<B>(size)?;
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
        let mut rdr = Cursor::new(&raw[8..]);
        let byte_order_magic = rdr.read_u32::<B>()?;
        let major_version = rdr.read_u16::<B>()?;
        let minor_version = rdr.read_u16::<B>()?;
        let section_length = rdr.read_i64::<B>()?;
        let options = Options::parse_with::<B>(PcapNgUtils::options_area(raw, Self::HEADER_SIZE))?;
        Ok(Self {
            byte_order_magic,
            major_version,
            minor_version,
            section_length,
            options,
        })
    }
    /// Parses a whole block, `raw` including the block type and both lengths.
    pub fn parse(raw: &[u8], pbo: PcapByteOrder) -> Result<Self, RingcapError> {
        let shb = match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                Self::parse_with::<LittleEndian>(raw)
            }
            PcapByteOrder::BigEndian => Self::parse_with::<BigEndian>(raw),
        }
        .map_err(|e| RingcapError::corrupt(format!("section header block: {}", e)))?;
        if shb.major_version != 1 {
            return Err(RingcapError::corrupt(format!(
                "unsupported pcapng version {}.{}",
                shb.major_version, shb.minor_version
            )));
        }
        Ok(shb)
    }
}

// Interface Description Block
// from https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html#name-interface-description-block
//                        1                   2                   3
//     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  0 |                    Block Type = 0x00000001                    |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  4 |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  8 |           LinkType            |           Reserved            |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 12 |                            SnapLen                            |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 16 /                                                               /
//    /                      Options (variable)                       /
//    /                                                               /
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//    |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptionBlock {
    /// LinkType (16 bits): the link layer type of this interface.
    /// Kept as the raw value, unknown types are still passed along.
    pub linktype: u16,
    /// Reserved (16 bits): not used.
    reserved: u16,
    /// SnapLen (32 bits): maximum number of octets captured from each packet, zero means no limit.
    pub snaplen: u32,
    pub options: Options,
}

impl InterfaceDescriptionBlock {
    const HEADER_SIZE: usize = 16;

    pub fn new(linktype: u16, snaplen: u32, options: Options) -> Self {
        Self {
            linktype,
            reserved: 0,
            snaplen,
            options,
        }
    }
    #[cfg(feature = "libpnet")]
    pub fn new_raw(
        if_name: &str,
        if_description: &str,
        ips: &[IpNetwork],
        mac: Option<MacAddr>,
        snaplen: u32,
    ) -> Self {
        let mut general_option = Vec::new();
        general_option.push(GeneralOption::new(IDB_NAME, if_name.as_bytes()));
        if !if_description.is_empty() {
            general_option.push(GeneralOption::new(IDB_DESCRIPTION, if_description.as_bytes()));
        }
        for ip in ips {
            let op = match ip {
                IpNetwork::V4(ipv4) => {
                    // Examples: '192 168 1 1 255 255 255 0'
                    let mut data = ipv4.ip().octets().to_vec();
                    data.extend_from_slice(&ipv4.mask().octets());
                    GeneralOption::new(IDB_IPV4ADDR, &data)
                }
                IpNetwork::V6(ipv6) => {
                    // Example: 2001:0db8:85a3:08d3:1319:8a2e:0370:7344/64 is written (in hex) as '20 01 0d b8 85 a3 08 d3 13 19 8a 2e 03 70 73 44 40'
                    let mut data = ipv6.ip().octets().to_vec();
                    data.push(ipv6.prefix());
                    GeneralOption::new(IDB_IPV6ADDR, &data)
                }
            };
            general_option.push(op);
        }
        if let Some(mac) = mac {
            // Example: '00 01 02 03 04 05'
            general_option.push(GeneralOption::new(IDB_MACADDR, &mac.octets()));
        }
        Self::new(
            LinkType::ETHERNET.to_u16(),
            snaplen,
            Options::new(general_option),
        )
    }
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.options.size() + 4
    }
    pub fn name(&self) -> Option<String> {
        self.options.find(IDB_NAME).map(|op| op.as_string())
    }
    fn encode<B: ByteOrder>(&self) -> io::Result<Vec<u8>> {
        let size = self.size() as u32;
        let mut ret = Vec::with_capacity(size as usize);
        ret.write_u32::<B>(BlockType::InterfaceDescriptionBlock.to_u32())?;
        ret.write_u32::<B>(size)?;
        ret.write_u16::<B>(self.linktype)?;
        ret.write_u16::<B>(self.reserved)?;
        ret.write_u32::<B>(self.snaplen)?;
        self.options.encode::<B>(&mut ret)?;
        ret.write_u32::<B>(size)?;
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
        let mut rdr = Cursor::new(&raw[8..]);
        let linktype = rdr.read_u16::<B>()?;
        let reserved = rdr.read_u16::<B>()?;
        let snaplen = rdr.read_u32::<B>()?;
        let options = Options::parse_with::<B>(PcapNgUtils::options_area(raw, Self::HEADER_SIZE))?;
        Ok(Self {
            linktype,
            reserved,
            snaplen,
            options,
        })
    }
    pub fn parse(raw: &[u8], pbo: PcapByteOrder) -> Result<Self, RingcapError> {
        match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                Self::parse_with::<LittleEndian>(raw)
            }
            PcapByteOrder::BigEndian => Self::parse_with::<BigEndian>(raw),
        }
        .map_err(|e| RingcapError::corrupt(format!("interface description block: {}", e)))
    }
}

// Enhanced Packet Block
// from https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html#name-enhanced-packet-block
//                        1                   2                   3
//     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  0 |                    Block Type = 0x00000006                    |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  4 |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  8 |                         Interface ID                          |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 12 |                        Timestamp (High)                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 16 |                        Timestamp (Low)                        |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 20 |                    Captured Packet Length                     |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 24 |                    Original Packet Length                     |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 28 /                                                               /
//    /                          Packet Data                          /
//    /              variable length, padded to 32 bits               /
//    /                                                               /
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//    /                                                               /
//    /                      Options (variable)                       /
//    /                                                               /
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//    |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedPacketBlock {
    /// Interface ID (32 bits):
    /// The interface on which this packet was received or transmitted, the index of its Interface Description Block in the section.
    pub interface_id: u32,
    /// Upper 32 bits of a 64-bit timestamp, in the units of the interface's if_tsresol.
    pub ts_high: u32,
    /// Lower 32 bits of a 64-bit timestamp.
    pub ts_low: u32,
    /// Captured Packet Length (32 bits): the length of the Packet Data field.
    pub captured_packet_length: u32,
    /// Original Packet Length (32 bits): the length of the packet when it was transmitted on the network.
    pub original_packet_length: u32,
    /// Packet Data: the data coming from the network, including link-layer headers.
    pub packet_data: Vec<u8>,
    pub options: Options,
}

impl EnhancedPacketBlock {
    const HEADER_SIZE: usize = 28;

    /// A packet captured right now on `interface_id`, truncated to `snaplen`.
    pub fn new(
        interface_id: u32,
        packet_data: &[u8],
        snaplen: usize,
    ) -> Result<EnhancedPacketBlock, RingcapError> {
        let packet_slice = if snaplen > 0 && packet_data.len() > snaplen {
            &packet_data[..snaplen]
        } else {
            packet_data
        };
        // default if_tsresol is microseconds
        let dura = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let ts = dura.as_micros() as u64;
        let mut epb = EnhancedPacketBlock {
            interface_id,
            ts_high: 0,
            ts_low: 0,
            captured_packet_length: packet_slice.len() as u32,
            original_packet_length: packet_data.len() as u32,
            packet_data: packet_slice.to_vec(),
            options: Options::default(),
        };
        epb.set_timestamp(ts);
        Ok(epb)
    }
    pub fn timestamp(&self) -> u64 {
        ((self.ts_high as u64) << 32) | self.ts_low as u64
    }
    pub fn set_timestamp(&mut self, ts: u64) {
        self.ts_high = (ts >> 32) as u32;
        self.ts_low = (ts & 0xffff_ffff) as u32;
    }
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE
            + PcapNgUtils::padded_len(self.packet_data.len())
            + self.options.size()
            + 4
    }
    fn encode<B: ByteOrder>(&self) -> io::Result<Vec<u8>> {
        let size = self.size() as u32;
        let mut ret = Vec::with_capacity(size as usize);
        ret.write_u32::<B>(BlockType::EnhancedPacketBlock.to_u32())?;
        ret.write_u32::<B>(size)?;
        ret.write_u32::<B>(self.interface_id)?;
        ret.write_u32::<B>(self.ts_high)?;
        ret.write_u32::<B>(self.ts_low)?;
        ret.write_u32::<B>(self.captured_packet_length)?;
        ret.write_u32::<B>(self.original_packet_length)?;
        ret.extend_from_slice(&PcapNgUtils::padding_to_32(&self.packet_data));
        self.options.encode::<B>(&mut ret)?;
        ret.write_u32::<B>(size)?;
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
        let mut rdr = Cursor::new(&raw[8..]);
        let interface_id = rdr.read_u32::<B>()?;
        let ts_high = rdr.read_u32::<B>()?;
        let ts_low = rdr.read_u32::<B>()?;
        let captured_packet_length = rdr.read_u32::<B>()?;
        let original_packet_length = rdr.read_u32::<B>()?;
        Self::check_captured(raw, captured_packet_length)?;
        let mut packet_data = vec![0u8; captured_packet_length as usize];
        rdr.read_exact(&mut packet_data)?;
        let options_start =
            Self::HEADER_SIZE + PcapNgUtils::padded_len(captured_packet_length as usize);
        let options = Options::parse_with::<B>(PcapNgUtils::options_area(raw, options_start))?;
        Ok(Self {
            interface_id,
            ts_high,
            ts_low,
            captured_packet_length,
            original_packet_length,
            packet_data,
            options,
        })
    }
    /// The captured length has to fit in the block before its buffer is allocated.
    fn check_captured(raw: &[u8], captured_packet_length: u32) -> io::Result<()> {
        let needed = Self::HEADER_SIZE as u64
            + PcapNgUtils::padded_len(captured_packet_length as usize) as u64
            + 4;
        if needed > raw.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "captured length {} does not fit in a {} bytes block",
                    captured_packet_length,
                    raw.len()
                ),
            ));
        }
        Ok(())
    }
    // Simple Packet Block: Block Type = 3, Block Total Length, Original Packet Length, Packet Data, Block Total Length.
    // It has no interface id (always the first interface of the section) and no timestamp.
    fn parse_simple_with<B: ByteOrder>(raw: &[u8]) -> io::Result<Self> {
        let mut rdr = Cursor::new(&raw[8..]);
        let original_packet_length = rdr.read_u32::<B>()?;
        let available = raw.len().saturating_sub(16);
        let captured = (original_packet_length as usize).min(available);
        let mut packet_data = vec![0u8; captured];
        rdr.read_exact(&mut packet_data)?;
        Ok(Self {
            interface_id: 0,
            ts_high: 0,
            ts_low: 0,
            captured_packet_length: captured as u32,
            original_packet_length,
            packet_data,
            options: Options::default(),
        })
    }
    // Obsolete Packet Block: like the Enhanced Packet Block but with a 16 bits interface id followed by a 16 bits drops count.
    fn parse_obsolete_with<B: ByteOrder>(raw: &[u8]) -> io::Result<Self> {
        let mut rdr = Cursor::new(&raw[8..]);
        let interface_id = rdr.read_u16::<B>()? as u32;
        let _drops_count = rdr.read_u16::<B>()?;
        let ts_high = rdr.read_u32::<B>()?;
        let ts_low = rdr.read_u32::<B>()?;
        let captured_packet_length = rdr.read_u32::<B>()?;
        let original_packet_length = rdr.read_u32::<B>()?;
        Self::check_captured(raw, captured_packet_length)?;
        let mut packet_data = vec![0u8; captured_packet_length as usize];
        rdr.read_exact(&mut packet_data)?;
        let options_start =
            Self::HEADER_SIZE + PcapNgUtils::padded_len(captured_packet_length as usize);
        let options = Options::parse_with::<B>(PcapNgUtils::options_area(raw, options_start))?;
        Ok(Self {
            interface_id,
            ts_high,
            ts_low,
            captured_packet_length,
            original_packet_length,
            packet_data,
            options,
        })
    }
    /// Parses an enhanced, simple or obsolete packet block into the enhanced form.
    pub fn parse(
        raw: &[u8],
        block_type: BlockType,
        pbo: PcapByteOrder,
    ) -> Result<Self, RingcapError> {
        let parsed = match (block_type, pbo) {
            (BlockType::SimplePacketBlock, PcapByteOrder::BigEndian) => {
                Self::parse_simple_with::<BigEndian>(raw)
            }
            (BlockType::SimplePacketBlock, _) => Self::parse_simple_with::<LittleEndian>(raw),
            (BlockType::PacketBlock, PcapByteOrder::BigEndian) => {
                Self::parse_obsolete_with::<BigEndian>(raw)
            }
            (BlockType::PacketBlock, _) => Self::parse_obsolete_with::<LittleEndian>(raw),
            (_, PcapByteOrder::BigEndian) => Self::parse_with::<BigEndian>(raw),
            (_, _) => Self::parse_with::<LittleEndian>(raw),
        };
        parsed.map_err(|e| RingcapError::corrupt(format!("{:?}: {}", block_type, e)))
    }
}

// Interface Statistics Block
// from https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html#name-interface-statistics-block
//                        1                   2                   3
//     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  0 |                   Block Type = 0x00000005                     |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  4 |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  8 |                         Interface ID                          |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 12 |                        Timestamp (High)                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 16 |                        Timestamp (Low)                        |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 20 /                                                               /
//    /                      Options (variable)                       /
//    /                                                               /
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//    |                      Block Total Length                       |
//    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStatisticsBlock {
    pub interface_id: u32,
    pub ts_high: u32,
    pub ts_low: u32,
    pub options: Options,
}

impl InterfaceStatisticsBlock {
    const HEADER_SIZE: usize = 20;

    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.options.size() + 4
    }
    fn encode<B: ByteOrder>(&self) -> io::Result<Vec<u8>> {
        let size = self.size() as u32;
        let mut ret = Vec::with_capacity(size as usize);
        ret.write_u32::<B>(BlockType::InterfaceStatisticsBlock.to_u32())?;
        ret.write_u32::<B>(size)?;
        ret.write_u32::<B>(self.interface_id)?;
        ret.write_u32::<B>(self.ts_high)?;
        ret.write_u32::<B>(self.ts_low)?;
        self.options.encode::<B>(&mut ret)?;
        ret.write_u32::<B>(size)?;
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
        let mut rdr = Cursor::new(&raw[8..]);
        let interface_id = rdr.read_u32::<B>()?;
        let ts_high = rdr.read_u32::<B>()?;
        let ts_low = rdr.read_u32::<B>()?;
        let options = Options::parse_with::<B>(PcapNgUtils::options_area(raw, Self::HEADER_SIZE))?;
        Ok(Self {
            interface_id,
            ts_high,
            ts_low,
            options,
        })
    }
    pub fn parse(raw: &[u8], pbo: PcapByteOrder) -> Result<Self, RingcapError> {
        match pbo {
            PcapByteOrder::LittleEndian | PcapByteOrder::WiresharkDefault => {
                Self::parse_with::<LittleEndian>(raw)
            }
            PcapByteOrder::BigEndian => Self::parse_with::<BigEndian>(raw),
        }
        .map_err(|e| RingcapError::corrupt(format!("interface statistics block: {}", e)))
    }
}

pub struct PcapNgUtils;

impl PcapNgUtils {
    pub fn padding_to_32(input: &[u8]) -> Vec<u8> {
        let mut ret = input.to_vec();
        ret.resize(Self::padded_len(input.len()), 0);
        ret
    }
    /// Returns the actual size after padding to 32 bits.
    pub fn padded_len(length: usize) -> usize {
        (length + 3) & !3
    }
    /// The options of a block: what lies between its fixed header and the trailing length.
    fn options_area(raw: &[u8], header_size: usize) -> &[u8] {
        let end = raw.len().saturating_sub(4);
        if header_size >= end {
            &[]
        } else {
            &raw[header_size..end]
        }
    }
}

pub struct SysInfo;

impl SysInfo {
    pub fn init() -> SysInfo {
        SysInfo {}
    }
    #[cfg(target_os = "linux")]
    pub fn cpu_model_name(&self) -> Result<String, RingcapError> {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo")?;
        for line in cpuinfo.lines().map(|x| x.trim()) {
            if line.starts_with("model name") {
                let line_split: Vec<&str> = line.split(':').map(|x| x.trim()).collect();
                if line_split.len() == 2 {
                    return Ok(line_split[1].to_string());
                }
            }
        }
        Err(RingcapError::GetSystemInfoError)
    }
    #[cfg(any(target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
    pub fn cpu_model_name(&self) -> Result<String, RingcapError> {
        let output = Command::new("sysctl").args(["-n", "hw.model"]).output()?;
        if output.status.success() {
            let cpu_model_name = String::from_utf8_lossy(&output.stdout);
            return Ok(cpu_model_name.trim().to_string());
        }
        Err(RingcapError::GetSystemInfoError)
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    )))]
    pub fn cpu_model_name(&self) -> Result<String, RingcapError> {
        Err(RingcapError::GetSystemInfoError)
    }
    #[cfg(unix)]
    pub fn system_name(&self) -> Result<String, RingcapError> {
        let output = Command::new("uname").arg("-srv").output()?;
        if output.status.success() {
            let system_name = String::from_utf8_lossy(&output.stdout);
            return Ok(system_name.trim().to_string());
        }
        Err(RingcapError::GetSystemInfoError)
    }
    #[cfg(windows)]
    pub fn system_name(&self) -> Result<String, RingcapError> {
        let output = Command::new("wmic")
            .args(["os", "get", "Caption"])
            .output()?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let lines: Vec<&str> = stdout.lines().map(|x| x.trim()).collect();
            if lines.len() >= 2 {
                return Ok(lines[1].to_string());
            }
        }
        Err(RingcapError::GetSystemInfoError)
    }
}
