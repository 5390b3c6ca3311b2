//! Keychain slot format and sector location records
//!
//! Every keychain slot is a fixed-size allocation:
//! SlotHeader (13 bytes) + compressed key (zero padded to `max_key_size`)

use crate::error::{SectorError, SectorResult};

/// Slot header size in bytes
pub const SLOT_HEADER_SIZE: usize = 13;

/// Largest block file index a slot can address
pub const MAX_SECTOR_FILE: u32 = u16::MAX as u32;

/// Commit state of a sector location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectorState {
    /// Vacant or erased slot
    Empty = 0,
    /// Sector bytes are fully written
    Ready = 1,
    /// Sector is being rewritten by a transaction commit
    Transaction = 2,
    /// Sector contents disagree with their key
    Mismatch = 3,
}

impl SectorState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SectorState::Empty),
            1 => Some(SectorState::Ready),
            2 => Some(SectorState::Transaction),
            3 => Some(SectorState::Mismatch),
            _ => None,
        }
    }
}

/// Location of a payload in the block files, keyed by its raw key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorKey {
    pub state: SectorState,
    /// Raw (uncompressed) key as supplied by the caller
    pub key: Vec<u8>,
    pub sector_file: u32,
    pub sector_start: u32,
    pub sector_size: u32,
}

impl SectorKey {
    pub fn new(state: SectorState, key: Vec<u8>, sector_file: u32, sector_start: u32, sector_size: u32) -> Self {
        Self { state, key, sector_file, sector_start, sector_size }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SectorState::Ready
    }

    pub fn is_txn(&self) -> bool {
        self.state == SectorState::Transaction
    }
}

/// Fold a key down to at most `target` bytes.
///
/// While the key is too long, byte `i` is XORed with byte `2i` for the first
/// half of the key, then the key is truncated to that half. One-way and
/// lossy: distinct keys can fold to the same bytes.
pub fn compress_key(key: &[u8], target: usize) -> Vec<u8> {
    let mut data = key.to_vec();
    while data.len() > target {
        let half = data.len() / 2;
        for i in 0..half {
            if i * 2 < data.len() {
                data[i] ^= data[i * 2];
            }
        }
        data.truncate(half);
    }
    data
}

/// Length `compress_key` produces for a key of `len` bytes.
pub fn compressed_len(mut len: usize, target: usize) -> usize {
    while len > target {
        len /= 2;
    }
    len
}

/// Fixed-size slot header.
///
/// Layout (little-endian):
///   [0]      state:        u8
///   [1..3]   key_len:      u16 - raw key length
///   [3..5]   sector_file:  u16
///   [5..9]   sector_size:  u32
///   [9..13]  sector_start: u32
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    pub state: u8,
    pub key_len: u16,
    pub sector_file: u16,
    pub sector_size: u32,
    pub sector_start: u32,
}

impl SlotHeader {
    pub fn to_bytes(&self) -> [u8; SLOT_HEADER_SIZE] {
        let mut buf = [0u8; SLOT_HEADER_SIZE];
        buf[0] = self.state;
        buf[1..3].copy_from_slice(&self.key_len.to_le_bytes());
        buf[3..5].copy_from_slice(&self.sector_file.to_le_bytes());
        buf[5..9].copy_from_slice(&self.sector_size.to_le_bytes());
        buf[9..13].copy_from_slice(&self.sector_start.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SLOT_HEADER_SIZE]) -> Self {
        Self {
            state: buf[0],
            key_len: u16::from_le_bytes([buf[1], buf[2]]),
            sector_file: u16::from_le_bytes([buf[3], buf[4]]),
            sector_size: u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
            sector_start: u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
        }
    }
}

/// A decoded keychain slot: header plus the compressed key it was written for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub header: SlotHeader,
    pub compressed: Vec<u8>,
}

impl Slot {
    /// Build the slot persisted for `key`.
    pub fn for_key(key: &SectorKey, max_key_size: usize) -> SectorResult<Self> {
        if key.key.len() > u16::MAX as usize {
            return Err(SectorError::OversizedKey { size: key.key.len(), max: u16::MAX as usize });
        }
        if key.sector_file > MAX_SECTOR_FILE {
            return Err(SectorError::SectorFileOverflow { file: key.sector_file, max: MAX_SECTOR_FILE });
        }
        Ok(Self {
            header: SlotHeader {
                state: key.state as u8,
                key_len: key.key.len() as u16,
                sector_file: key.sector_file as u16,
                sector_size: key.sector_size,
                sector_start: key.sector_start,
            },
            compressed: compress_key(&key.key, max_key_size),
        })
    }

    /// Serialize into exactly `SLOT_HEADER_SIZE + max_key_size` bytes.
    pub fn encode(&self, max_key_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; SLOT_HEADER_SIZE + max_key_size];
        buf[..SLOT_HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
        buf[SLOT_HEADER_SIZE..SLOT_HEADER_SIZE + self.compressed.len()].copy_from_slice(&self.compressed);
        buf
    }

    /// Parse a slot. Returns `None` for a vacant (zeroed) slot.
    pub fn decode(buf: &[u8], max_key_size: usize) -> Result<Option<Self>, String> {
        if buf.len() < SLOT_HEADER_SIZE + max_key_size {
            return Err(format!("slot too short: {} bytes", buf.len()));
        }
        let header_bytes: [u8; SLOT_HEADER_SIZE] = buf[..SLOT_HEADER_SIZE]
            .try_into()
            .map_err(|_| "slot header truncated".to_string())?;
        let header = SlotHeader::from_bytes(&header_bytes);

        match SectorState::from_u8(header.state) {
            Some(SectorState::Empty) => return Ok(None),
            Some(_) => {}
            None => return Err(format!("invalid sector state {}", header.state)),
        }

        let len = compressed_len(header.key_len as usize, max_key_size);
        Ok(Some(Self {
            header,
            compressed: buf[SLOT_HEADER_SIZE..SLOT_HEADER_SIZE + len].to_vec(),
        }))
    }

    /// Whether this slot was written for a key compressing to `compressed`.
    pub fn matches(&self, compressed: &[u8]) -> bool {
        self.compressed == compressed
    }

    /// Rebuild the location record, attaching the caller's raw key.
    pub fn to_sector_key(&self, raw_key: &[u8]) -> SectorKey {
        SectorKey {
            state: SectorState::from_u8(self.header.state).unwrap_or(SectorState::Mismatch),
            key: raw_key.to_vec(),
            sector_file: self.header.sector_file as u32,
            sector_start: self.header.sector_start,
            sector_size: self.header.sector_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = SlotHeader {
            state: SectorState::Transaction as u8,
            key_len: 300,
            sector_file: 7,
            sector_size: 0xDEAD,
            sector_start: 0xBEEF_0001,
        };
        assert_eq!(SlotHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_slot_encode_decode() {
        let key = SectorKey::new(SectorState::Ready, b"account:42".to_vec(), 3, 1024, 77);
        let slot = Slot::for_key(&key, 32).unwrap();
        let bytes = slot.encode(32);
        assert_eq!(bytes.len(), 45);

        let decoded = Slot::decode(&bytes, 32).unwrap().unwrap();
        assert_eq!(decoded, slot);
        assert_eq!(decoded.to_sector_key(b"account:42"), key);
    }

    #[test]
    fn test_zeroed_slot_is_vacant() {
        let bytes = vec![0u8; SLOT_HEADER_SIZE + 32];
        assert!(Slot::decode(&bytes, 32).unwrap().is_none());
    }

    #[test]
    fn test_invalid_state_rejected() {
        let mut bytes = vec![0u8; SLOT_HEADER_SIZE + 8];
        bytes[0] = 0x7F;
        assert!(Slot::decode(&bytes, 8).is_err());
    }

    #[test]
    fn test_compress_short_key_unchanged() {
        assert_eq!(compress_key(b"alpha", 8), b"alpha".to_vec());
        assert_eq!(compress_key(b"exactly8", 8), b"exactly8".to_vec());
    }

    #[test]
    fn test_compress_deterministic_and_idempotent() {
        let key: Vec<u8> = (0u8..100).collect();
        let once = compress_key(&key, 32);
        assert_eq!(once, compress_key(&key, 32));
        assert!(once.len() <= 32);
        assert_eq!(compress_key(&once, 32), once);
        assert_eq!(once.len(), compressed_len(key.len(), 32));
    }

    #[test]
    fn test_compress_folds_by_halving() {
        // 4 bytes -> 2: [a^a, b^c]
        assert_eq!(compress_key(&[0x11, 0x22, 0x33, 0x44], 2), vec![0x00, 0x22 ^ 0x33]);
        assert_eq!(compressed_len(40, 8), 5);
    }

    #[test]
    fn test_compress_collisions_exist() {
        // The first byte always folds with itself, so it never reaches the output.
        let a = compress_key(&[0x01, 0xAA, 0xBB, 0xCC], 2);
        let b = compress_key(&[0x02, 0xAA, 0xBB, 0xCC], 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sector_file_overflow() {
        let key = SectorKey::new(SectorState::Ready, b"k".to_vec(), MAX_SECTOR_FILE + 1, 0, 1);
        assert!(matches!(
            Slot::for_key(&key, 32),
            Err(SectorError::SectorFileOverflow { .. })
        ));
    }
}
