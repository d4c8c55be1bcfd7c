//! Page framing and the transactional write path.
//!
//! Frame: `magic(4) | seq(4 LE) | len(4 LE) | crc32(4 LE) | payload`, with
//! the CRC taken over the payload. A record write goes to the page that is
//! *not* currently active with `seq + 1`, then erases the old page. Torn
//! writes fail the CRC and the previous page stays active; a loss between
//! program and erase leaves two valid pages and the higher seq wins.

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::flash::{FlashBackend, FlashError, Region, PAGES_PER_REGION};

const MAGIC: [u8; 4] = *b"VLT1";
const HEADER_LEN: usize = 16;

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

fn encode_page(seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&CRC32.checksum(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_page(bytes: &[u8]) -> Option<(u32, &[u8])> {
    if bytes.len() < HEADER_LEN || bytes[..4] != MAGIC {
        return None;
    }
    let seq = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let crc = u32::from_le_bytes(bytes[12..16].try_into().unwrap());

    let payload = bytes.get(HEADER_LEN..HEADER_LEN + len)?;
    if CRC32.checksum(payload) != crc {
        return None;
    }
    Some((seq, payload))
}

/// Tracks which page of a region currently holds the live record.
pub(crate) struct PageStore {
    region: Region,
    active: Option<(usize, u32)>,
}

impl PageStore {
    /// Scan both pages and adopt the valid one with the highest seq.
    /// Returns the store plus the decoded record, or `T::default()` for
    /// fresh (fully erased) flash.
    pub(crate) fn load<T, F>(
        flash: &F,
        region: Region,
    ) -> Result<(Self, T), FlashError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FlashBackend,
    {
        let mut best: Option<(usize, u32, T)> = None;
        for page in 0..PAGES_PER_REGION {
            let Some(bytes) = flash.read_page(region, page)? else {
                continue;
            };
            let Some((seq, payload)) = decode_page(&bytes) else {
                warn!(?region, page, "discarding corrupt flash page");
                continue;
            };
            let record: T = match bcs::from_bytes(payload) {
                Ok(record) => record,
                Err(err) => {
                    warn!(?region, page, %err, "undecodable flash record");
                    continue;
                }
            };
            let newer = match &best {
                Some((_, best_seq, _)) => seq_newer(seq, *best_seq),
                None => true,
            };
            if newer {
                best = Some((page, seq, record));
            }
        }

        match best {
            Some((page, seq, record)) => Ok((
                Self {
                    region,
                    active: Some((page, seq)),
                },
                record,
            )),
            None => Ok((
                Self {
                    region,
                    active: None,
                },
                T::default(),
            )),
        }
    }

    /// Transactionally replace the record.
    pub(crate) fn save<T, F>(
        &mut self,
        flash: &mut F,
        record: &T,
    ) -> Result<(), FlashError>
    where
        T: Serialize,
        F: FlashBackend,
    {
        let payload =
            bcs::to_bytes(record).expect("region records always serialize");

        let (old_page, seq) = match self.active {
            Some((page, seq)) => (Some(page), seq.wrapping_add(1)),
            None => (None, 0),
        };
        let new_page = match old_page {
            Some(page) => (page + 1) % PAGES_PER_REGION,
            None => 0,
        };

        flash.write_page(self.region, new_page, &encode_page(seq, &payload))?;
        if let Some(old) = old_page {
            flash.erase_page(self.region, old)?;
        }

        self.active = Some((new_page, seq));
        Ok(())
    }

    /// Erase both pages (factory reset).
    pub(crate) fn wipe<F: FlashBackend>(
        &mut self,
        flash: &mut F,
    ) -> Result<(), FlashError> {
        for page in 0..PAGES_PER_REGION {
            flash.erase_page(self.region, page)?;
        }
        self.active = None;
        Ok(())
    }
}

/// Wrapping seq comparison so the counter surviving 2^32 writes is a
/// non-event.
fn seq_newer(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) < u32::MAX / 2
}
