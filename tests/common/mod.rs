#![allow(dead_code)]

use ringcap::PcapByteOrder;
use ringcap::fs::pcap::FileHeader;
use ringcap::fs::pcap::PacketRecord;
use ringcap::fs::pcapng::EnhancedPacketBlock;
use ringcap::fs::pcapng::GeneralOption;
use ringcap::fs::pcapng::IDB_NAME;
use ringcap::fs::pcapng::InterfaceDescriptionBlock;
use ringcap::fs::pcapng::Options;
use ringcap::fs::pcapng::SHB_USERAPPL;
use ringcap::fs::pcapng::SectionHeaderBlock;
use ringcap::reader::Block;
use ringcap::source::SourceReader;
use std::fs::File;
use std::path::Path;

/// One pcapng section: `interfaces` interfaces, `packets` packets spread over them.
pub fn section(pbo: PcapByteOrder, user_appl: &str, interfaces: usize, packets: usize) -> Vec<u8> {
    let shb = SectionHeaderBlock::new(Options::new(vec![GeneralOption::new(
        SHB_USERAPPL,
        user_appl.as_bytes(),
    )]));
    let mut data = shb.to_vec(pbo).unwrap();
    for i in 0..interfaces {
        let name = format!("{}-if{}", user_appl, i);
        let idb = InterfaceDescriptionBlock::new(
            1,
            262144,
            Options::new(vec![GeneralOption::new(IDB_NAME, name.as_bytes())]),
        );
        data.extend(idb.to_vec(pbo).unwrap());
    }
    for i in 0..packets {
        let len = 60 + i % 7;
        let mut epb = EnhancedPacketBlock {
            interface_id: (i % interfaces) as u32,
            ts_high: 0,
            ts_low: 0,
            captured_packet_length: len as u32,
            original_packet_length: len as u32,
            packet_data: vec![i as u8; len],
            options: Options::default(),
        };
        epb.set_timestamp(1_700_000_000_000_000 + i as u64);
        data.extend(epb.to_vec(pbo).unwrap());
    }
    data
}

pub fn pcap_stream(pbo: PcapByteOrder, packets: usize) -> Vec<u8> {
    let mut data = FileHeader::new(false, 65535, 1).to_vec(pbo).unwrap();
    for i in 0..packets {
        let record = PacketRecord::new(1_700_000_000 + i as u32, 0, &[0x55; 54]);
        data.extend(record.to_vec(pbo).unwrap());
    }
    data
}

#[derive(Debug, Default)]
pub struct Summary {
    pub blocks: Vec<Block>,
    pub packets: usize,
    pub interfaces: usize,
    pub sections: usize,
    pub user_appls: Vec<String>,
}

impl Summary {
    pub fn first_starts_section(&self) -> bool {
        self.blocks.first().is_some_and(|b| b.starts_section())
    }
}

/// Reads back an output file, checking every packet's interface was described before it.
pub fn summarize<P: AsRef<Path>>(path: P) -> Summary {
    let fs = File::open(path.as_ref()).unwrap();
    let mut reader = SourceReader::from_reader(fs);
    let mut summary = Summary::default();
    let mut section_interfaces = 0;
    while let Some(block) = reader.next_block().unwrap() {
        match &block {
            Block::SectionHeader { shb, .. } => {
                summary.sections += 1;
                section_interfaces = 0;
                summary.user_appls.extend(shb.user_applications());
            }
            Block::PcapHeader { .. } => {
                summary.sections += 1;
                summary.interfaces += 1;
                section_interfaces = 1;
            }
            Block::InterfaceDescription { .. } => {
                summary.interfaces += 1;
                section_interfaces += 1;
            }
            Block::Packet { epb, .. } => {
                summary.packets += 1;
                assert!(
                    (epb.interface_id as usize) < section_interfaces,
                    "packet on interface {} with {} interfaces described in {}",
                    epb.interface_id,
                    section_interfaces,
                    path.as_ref().display()
                );
            }
            Block::Other { .. } => (),
        }
        summary.blocks.push(block);
    }
    summary
}
