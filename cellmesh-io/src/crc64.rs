//! CRC-64 checksum utilities for callers that want to verify a block's
//! bytes independently of the store that produced them. Neither
//! `BlockStore` implementation in this crate calls these yet; `FileBlockStore`
//! currently trusts the filesystem and does not detect partial writes.

use crc::{Crc, CRC_64_GO_ISO};

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

pub struct Digest {
    digest: crc::Digest<'static, u64>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u64 {
        self.digest.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}
