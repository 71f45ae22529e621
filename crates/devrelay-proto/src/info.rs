use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtoError, Result};
use crate::request::{get_u24_le, put_u24_le};

/// Status sub-code reserved for device information block queries.
pub const DEVICE_INFO_CODE: u8 = 3;

/// Wire size of a device information block.
pub const DEVICE_INFO_SIZE: usize = 25;

const NAME_FIELD: usize = 16;

/// Flag bits of the device information block's general byte.
pub const FLAG_BLOCK_DEVICE: u8 = 0x80;
pub const FLAG_WRITE_ALLOWED: u8 = 0x40;
pub const FLAG_READ_ALLOWED: u8 = 0x20;
pub const FLAG_ONLINE: u8 = 0x10;

/// Device information block: the descriptor a unit returns for a
/// Status query with sub-code [`DEVICE_INFO_CODE`].
///
/// Wire layout, 25 bytes:
/// ```text
/// [flags][block-count;3][name-len][name;16][type][subtype][version;2]
/// ```
/// The name field is space-padded to 16 bytes; `name_len` bytes of it
/// are meaningful. Multi-byte fields are little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// General status flags, see the `FLAG_*` bits.
    pub flags: u8,
    /// Capacity in 512-byte blocks (24-bit).
    pub block_count: u32,
    /// Identification string, at most 16 bytes.
    pub name: String,
    pub device_type: u8,
    pub device_subtype: u8,
    pub firmware_version: u16,
}

impl DeviceInfo {
    pub fn is_block_device(&self) -> bool {
        self.flags & FLAG_BLOCK_DEVICE != 0
    }

    pub fn is_write_allowed(&self) -> bool {
        self.flags & FLAG_WRITE_ALLOWED != 0
    }

    pub fn is_read_allowed(&self) -> bool {
        self.flags & FLAG_READ_ALLOWED != 0
    }

    pub fn is_online(&self) -> bool {
        self.flags & FLAG_ONLINE != 0
    }

    /// Encode to the 25-byte wire descriptor. Names longer than the
    /// 16-byte field are truncated.
    pub fn encode(&self) -> Bytes {
        let name = self.name.as_bytes();
        let name_len = name.len().min(NAME_FIELD);

        let mut buf = BytesMut::with_capacity(DEVICE_INFO_SIZE);
        buf.put_u8(self.flags);
        put_u24_le(&mut buf, self.block_count);
        buf.put_u8(name_len as u8);
        buf.put_slice(&name[..name_len]);
        buf.put_bytes(b' ', NAME_FIELD - name_len);
        buf.put_u8(self.device_type);
        buf.put_u8(self.device_subtype);
        buf.put_u16_le(self.firmware_version);
        buf.freeze()
    }

    /// Decode a wire descriptor. Trailing bytes beyond the 25-byte
    /// layout are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DEVICE_INFO_SIZE {
            return Err(ProtoError::InfoTooShort {
                len: bytes.len(),
                expected: DEVICE_INFO_SIZE,
            });
        }
        let name_len = (bytes[4] as usize).min(NAME_FIELD);
        let name = String::from_utf8_lossy(&bytes[5..5 + name_len]).into_owned();
        Ok(Self {
            flags: bytes[0],
            block_count: get_u24_le(&bytes[1..4]),
            name,
            device_type: bytes[21],
            device_subtype: bytes[22],
            firmware_version: u16::from_le_bytes([bytes[23], bytes[24]]),
        })
    }
}
