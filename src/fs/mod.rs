pub mod pcap;
pub mod pcapng;
