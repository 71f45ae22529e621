use bytes::{BufMut, Bytes, BytesMut};

use crate::command::CommandCode;
use crate::error::{ProtoError, Result};
use crate::response::Response;

/// Size of one storage block, the unit of ReadBlock/WriteBlock transfers.
pub const BLOCK_SIZE: usize = 512;

/// Request header size: `[seq][command][unit]`.
pub const REQUEST_HEADER: usize = 3;

pub(crate) fn put_u24_le(buf: &mut BytesMut, value: u32) {
    buf.put_u8(value as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8((value >> 16) as u8);
}

pub(crate) fn get_u24_le(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16
}

/// Command-specific fields of a request.
///
/// One variant per wire command. Block numbers and byte addresses are
/// 24-bit; a `WriteBlock` always carries exactly one block of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Status { code: u8 },
    ReadBlock { block: u32 },
    WriteBlock { block: u32, data: Box<[u8; BLOCK_SIZE]> },
    Format,
    Control { code: u8, payload: Vec<u8> },
    Init,
    Open,
    Close,
    Read { length: u16, address: u32 },
    Write { address: u32, data: Vec<u8> },
    Reset,
}

/// One relay request: correlation sequence, target unit, operation.
///
/// A request serializes itself to wire bytes, parses the paired response
/// out of raw reply bytes, and can also build its response locally when
/// the command was executed without crossing the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlation sequence number, echoed by the response.
    pub seq: u8,
    /// Target unit, peer-local and 1-based.
    pub unit: u8,
    /// The command to perform.
    pub op: Operation,
}

impl Request {
    pub fn status(seq: u8, unit: u8, code: u8) -> Self {
        Self { seq, unit, op: Operation::Status { code } }
    }

    /// `block` must fit the wire's 24-bit block-number field.
    pub fn read_block(seq: u8, unit: u8, block: u32) -> Self {
        debug_assert!(block <= 0x00FF_FFFF);
        Self { seq, unit, op: Operation::ReadBlock { block } }
    }

    /// `block` must fit the wire's 24-bit block-number field.
    pub fn write_block(seq: u8, unit: u8, block: u32, data: [u8; BLOCK_SIZE]) -> Self {
        debug_assert!(block <= 0x00FF_FFFF);
        Self {
            seq,
            unit,
            op: Operation::WriteBlock { block, data: Box::new(data) },
        }
    }

    pub fn format(seq: u8, unit: u8) -> Self {
        Self { seq, unit, op: Operation::Format }
    }

    pub fn control(seq: u8, unit: u8, code: u8, payload: Vec<u8>) -> Self {
        Self { seq, unit, op: Operation::Control { code, payload } }
    }

    pub fn init(seq: u8, unit: u8) -> Self {
        Self { seq, unit, op: Operation::Init }
    }

    pub fn open(seq: u8, unit: u8) -> Self {
        Self { seq, unit, op: Operation::Open }
    }

    pub fn close(seq: u8, unit: u8) -> Self {
        Self { seq, unit, op: Operation::Close }
    }

    /// `address` must fit the wire's 24-bit address field.
    pub fn read(seq: u8, unit: u8, length: u16, address: u32) -> Self {
        debug_assert!(address <= 0x00FF_FFFF);
        Self { seq, unit, op: Operation::Read { length, address } }
    }

    /// `data.len()` must fit the wire's 2-byte length field, `address`
    /// its 24-bit address field.
    pub fn write(seq: u8, unit: u8, address: u32, data: Vec<u8>) -> Self {
        debug_assert!(data.len() <= u16::MAX as usize);
        debug_assert!(address <= 0x00FF_FFFF);
        Self { seq, unit, op: Operation::Write { address, data } }
    }

    pub fn reset(seq: u8, unit: u8) -> Self {
        Self { seq, unit, op: Operation::Reset }
    }

    /// The wire command for this request's operation.
    pub fn command(&self) -> CommandCode {
        match &self.op {
            Operation::Status { .. } => CommandCode::Status,
            Operation::ReadBlock { .. } => CommandCode::ReadBlock,
            Operation::WriteBlock { .. } => CommandCode::WriteBlock,
            Operation::Format => CommandCode::Format,
            Operation::Control { .. } => CommandCode::Control,
            Operation::Init => CommandCode::Init,
            Operation::Open => CommandCode::Open,
            Operation::Close => CommandCode::Close,
            Operation::Read { .. } => CommandCode::Read,
            Operation::Write { .. } => CommandCode::Write,
            Operation::Reset => CommandCode::Reset,
        }
    }

    /// Serialize to wire bytes.
    ///
    /// Layout (all multi-byte fields little-endian, addresses and block
    /// numbers 24-bit):
    /// ```text
    /// [seq][command][unit]                         Format/Init/Open/Close/Reset
    /// [seq][command][unit][status-code]            Status
    /// [seq][command][unit][block;3]                ReadBlock
    /// [seq][command][unit][block;3][data;512]      WriteBlock
    /// [seq][command][unit][ctrl-code][payload…]    Control
    /// [seq][command][unit][length;2][address;3]    Read
    /// [seq][command][unit][length;2][address;3][data…]  Write
    /// ```
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER + 8);
        buf.put_u8(self.seq);
        buf.put_u8(self.command().as_u8());
        buf.put_u8(self.unit);
        match &self.op {
            Operation::Status { code } => buf.put_u8(*code),
            Operation::ReadBlock { block } => put_u24_le(&mut buf, *block),
            Operation::WriteBlock { block, data } => {
                put_u24_le(&mut buf, *block);
                buf.put_slice(&data[..]);
            }
            Operation::Control { code, payload } => {
                buf.put_u8(*code);
                buf.put_slice(payload);
            }
            Operation::Read { length, address } => {
                buf.put_u16_le(*length);
                put_u24_le(&mut buf, *address);
            }
            Operation::Write { address, data } => {
                buf.put_u16_le(data.len() as u16);
                put_u24_le(&mut buf, *address);
                buf.put_slice(data);
            }
            Operation::Format | Operation::Init | Operation::Open
            | Operation::Close | Operation::Reset => {}
        }
        buf.freeze()
    }

    /// Decode a wire request, the receiving peer's side of [`serialize`].
    ///
    /// Validates the per-command minimum length; trailing bytes beyond a
    /// command's fixed layout are ignored, except for Write, whose data
    /// run is bounded by its own length field.
    ///
    /// [`serialize`]: Request::serialize
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REQUEST_HEADER {
            return Err(ProtoError::HeaderTooShort { len: bytes.len() });
        }
        let seq = bytes[0];
        let command = CommandCode::from_wire(bytes[1])
            .ok_or(ProtoError::UnknownCommand(bytes[1]))?;
        let unit = bytes[2];

        let need = |min: usize| -> Result<()> {
            if bytes.len() < min {
                Err(ProtoError::RequestTooShort { command, len: bytes.len(), min })
            } else {
                Ok(())
            }
        };

        let op = match command {
            CommandCode::Status => {
                need(4)?;
                Operation::Status { code: bytes[3] }
            }
            CommandCode::ReadBlock => {
                need(6)?;
                Operation::ReadBlock { block: get_u24_le(&bytes[3..6]) }
            }
            CommandCode::WriteBlock => {
                need(6 + BLOCK_SIZE)?;
                let mut data = [0u8; BLOCK_SIZE];
                data.copy_from_slice(&bytes[6..6 + BLOCK_SIZE]);
                Operation::WriteBlock {
                    block: get_u24_le(&bytes[3..6]),
                    data: Box::new(data),
                }
            }
            CommandCode::Format => Operation::Format,
            CommandCode::Control => {
                need(4)?;
                Operation::Control { code: bytes[3], payload: bytes[4..].to_vec() }
            }
            CommandCode::Init => Operation::Init,
            CommandCode::Open => Operation::Open,
            CommandCode::Close => Operation::Close,
            CommandCode::Read => {
                need(8)?;
                Operation::Read {
                    length: u16::from_le_bytes([bytes[3], bytes[4]]),
                    address: get_u24_le(&bytes[5..8]),
                }
            }
            CommandCode::Write => {
                need(8)?;
                let length = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
                need(8 + length)?;
                Operation::Write {
                    address: get_u24_le(&bytes[5..8]),
                    data: bytes[8..8 + length].to_vec(),
                }
            }
            CommandCode::Reset => Operation::Reset,
        };

        Ok(Self { seq, unit, op })
    }

    /// Parse raw reply bytes into this request's paired response.
    ///
    /// A nonzero status is ordinary data (the body is empty and trailing
    /// bytes are ignored); length violations are hard errors. A
    /// successful ReadBlock must carry exactly one block.
    pub fn parse_response(&self, bytes: &[u8]) -> Result<Response> {
        let command = self.command();
        if bytes.len() < 2 {
            return Err(ProtoError::ResponseTooShort { command, len: bytes.len() });
        }
        let seq = bytes[0];
        let status = bytes[1];
        if status != 0 {
            return Ok(Response::new(seq, status, Bytes::new()));
        }
        let body = match command {
            CommandCode::ReadBlock => {
                if bytes.len() != 2 + BLOCK_SIZE {
                    return Err(ProtoError::BlockSizeMismatch {
                        len: bytes.len() - 2,
                        expected: BLOCK_SIZE,
                    });
                }
                Bytes::copy_from_slice(&bytes[2..])
            }
            CommandCode::Status | CommandCode::Read | CommandCode::Control => {
                Bytes::copy_from_slice(&bytes[2..])
            }
            _ => Bytes::new(),
        };
        Ok(Response::new(seq, status, body))
    }

    /// Build this request's response from a local execution result,
    /// without any wire involved. A failed execution carries no body.
    pub fn response_with(&self, status: u8, data: &[u8]) -> Response {
        let body = if status == 0 {
            Bytes::copy_from_slice(data)
        } else {
            Bytes::new()
        };
        Response::new(self.seq, status, body)
    }

    /// The in-memory command buffer handed to local (non-network)
    /// dispatchers: command, unit, and the fixed fields, without the
    /// correlation sequence or any bulk payload.
    pub fn command_block(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u8(self.command().as_u8());
        buf.put_u8(self.unit);
        match &self.op {
            Operation::Status { code } => buf.put_u8(*code),
            Operation::ReadBlock { block } | Operation::WriteBlock { block, .. } => {
                put_u24_le(&mut buf, *block)
            }
            Operation::Control { code, .. } => buf.put_u8(*code),
            Operation::Read { length, address } => {
                buf.put_u16_le(*length);
                put_u24_le(&mut buf, *address);
            }
            Operation::Write { address, data } => {
                buf.put_u16_le(data.len() as u16);
                put_u24_le(&mut buf, *address);
            }
            Operation::Format | Operation::Init | Operation::Open
            | Operation::Close | Operation::Reset => {}
        }
        buf.to_vec()
    }

    /// The bulk payload this request carries toward the device, if any.
    pub fn payload(&self) -> &[u8] {
        match &self.op {
            Operation::WriteBlock { data, .. } => &data[..],
            Operation::Control { payload, .. } => payload,
            Operation::Write { data, .. } => data,
            _ => &[],
        }
    }
}
