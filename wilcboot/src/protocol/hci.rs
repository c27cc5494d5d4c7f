//! HCI command/event codec.
//!
//! ## Command Format
//!
//! ```text
//! +---------+-------------+--------------------+------------------+
//! | Opcode  | Param length|     Parameters     | Bulk payload     |
//! +---------+-------------+--------------------+------------------+
//! | 2 bytes |   1 byte    |  0..=255 bytes     | write-memory only|
//! +---------+-------------+--------------------+------------------+
//! ```
//!
//! On a UART link every packet is prefixed with an H4 packet-type byte
//! ([`H4_COMMAND`] / [`H4_EVENT`]).
//!
//! ## Completion Events
//!
//! ```text
//! Command Complete: 0x0E | len | ncmd | opcode(2) | status | return params...
//! Command Status:   0x0F | len | status | ncmd | opcode(2)
//! ```

use {
    crate::error::{Error, Result},
    byteorder::{LittleEndian, WriteBytesExt},
    std::{fmt, str::FromStr},
};

/// H4 packet type of an HCI command.
pub const H4_COMMAND: u8 = 0x01;

/// H4 packet type of an HCI event.
pub const H4_EVENT: u8 = 0x04;

/// Command Complete event code.
pub const EVT_COMMAND_COMPLETE: u8 = 0x0E;

/// Command Status event code.
pub const EVT_COMMAND_STATUS: u8 = 0x0F;

/// Opcode (2) plus parameter length (1).
pub const COMMAND_HEADER_LEN: usize = 3;

/// Largest parameter block a command can carry.
pub const MAX_PARAM_LEN: usize = 255;

/// Size of a command buffer for an ordinary command.
pub const COMMAND_BUFFER_SIZE: usize = COMMAND_HEADER_LEN + MAX_PARAM_LEN;

/// Standard HCI opcodes used during bring-up.
pub mod opcode {
    /// HCI_Reset.
    pub const RESET: u16 = 0x0C03;
    /// HCI_Read_Local_Version_Information.
    pub const READ_LOCAL_VERSION: u16 = 0x1001;
    /// HCI_Read_BD_ADDR.
    pub const READ_BD_ADDR: u16 = 0x1009;
}

/// An HCI command ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: u16,
    params: Vec<u8>,
    payload: Vec<u8>,
}

impl Command {
    /// Create a command with no parameters.
    pub fn new(opcode: u16) -> Self {
        Self {
            opcode,
            params: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Append a byte parameter.
    #[must_use]
    pub fn param_u8(mut self, value: u8) -> Self {
        self.params
            .push(value);
        self
    }

    /// Append a little-endian u32 parameter.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn param_u32(mut self, value: u32) -> Self {
        self.params
            .write_u32::<LittleEndian>(value)
            .unwrap();
        self
    }

    /// Append raw parameter bytes.
    #[must_use]
    pub fn param_bytes(mut self, bytes: &[u8]) -> Self {
        self.params
            .extend_from_slice(bytes);
        self
    }

    /// Attach bulk data sent after the parameter block.
    ///
    /// The parameter length byte does not count it.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Opcode.
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    /// Parameter block.
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Bulk payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encoded size in bytes, without the H4 prefix.
    pub fn encoded_len(&self) -> usize {
        COMMAND_HEADER_LEN
            + self
                .params
                .len()
            + self
                .payload
                .len()
    }

    /// Encode into a freshly allocated vector.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Encode into a transport-owned buffer, replacing its contents.
    pub fn encode_into(&self, buf: &mut CommandBuffer) -> Result<()> {
        if self.encoded_len() > buf.capacity() {
            return Err(Error::TransportUnavailable(format!(
                "command {:#06x} needs {} bytes, buffer holds {}",
                self.opcode,
                self.encoded_len(),
                buf.capacity()
            )));
        }
        buf.data
            .clear();
        self.write_to(&mut buf.data)
    }

    /// Encode with the H4 command prefix, as written to a UART.
    pub fn to_h4_packet(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + self.encoded_len());
        out.push(H4_COMMAND);
        self.write_to(&mut out)?;
        Ok(out)
    }

    #[allow(clippy::cast_possible_truncation)] // length checked against MAX_PARAM_LEN
    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        if self
            .params
            .len()
            > MAX_PARAM_LEN
        {
            return Err(Error::Protocol(format!(
                "command {:#06x} has {} parameter bytes, limit is {MAX_PARAM_LEN}",
                self.opcode,
                self.params
                    .len()
            )));
        }
        out.write_u16::<LittleEndian>(self.opcode)?;
        out.push(
            self.params
                .len() as u8,
        );
        out.extend_from_slice(&self.params);
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Buffer handed out by the transport for one outgoing command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl CommandBuffer {
    /// Create an empty buffer able to hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum encoded command size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of encoded bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether nothing has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}

/// Which event carried a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Command Complete, carrying return parameters.
    CommandComplete,
    /// Command Status, carrying only a status.
    CommandStatus,
}

/// Completion of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    /// Event that carried the completion.
    pub kind: EventKind,
    /// Opcode of the completed command.
    pub opcode: u16,
    /// Status, 0 on success.
    pub status: u8,
    /// Return parameters after the status byte.
    pub params: Vec<u8>,
}

impl CompletionEvent {
    /// A Command Complete with the given status and return parameters.
    pub fn complete(opcode: u16, status: u8, params: &[u8]) -> Self {
        Self {
            kind: EventKind::CommandComplete,
            opcode,
            status,
            params: params.to_vec(),
        }
    }

    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Return parameter at `index`.
    pub fn param(&self, index: usize) -> Option<u8> {
        self.params
            .get(index)
            .copied()
    }

    /// Decode an HCI event packet (without the H4 prefix).
    ///
    /// Returns `Ok(None)` for events that are not completions.
    pub fn parse(packet: &[u8]) -> Result<Option<Self>> {
        let [code, len, body @ ..] = packet else {
            return Err(Error::Protocol(format!(
                "event of {} bytes has no header",
                packet.len()
            )));
        };
        let len = usize::from(*len);
        if body.len() < len {
            return Err(Error::Protocol(format!(
                "event {code:#04x} declares {len} bytes, got {}",
                body.len()
            )));
        }
        let body = &body[..len];

        match *code {
            EVT_COMMAND_COMPLETE => {
                let [_ncmd, lo, hi, status, params @ ..] = body else {
                    return Err(Error::Protocol(format!(
                        "command complete event too short ({len} bytes)"
                    )));
                };
                Ok(Some(Self {
                    kind: EventKind::CommandComplete,
                    opcode: u16::from_le_bytes([*lo, *hi]),
                    status: *status,
                    params: params.to_vec(),
                }))
            }
            EVT_COMMAND_STATUS => {
                let [status, _ncmd, lo, hi, ..] = body else {
                    return Err(Error::Protocol(format!(
                        "command status event too short ({len} bytes)"
                    )));
                };
                Ok(Some(Self {
                    kind: EventKind::CommandStatus,
                    opcode: u16::from_le_bytes([*lo, *hi]),
                    status: *status,
                    params: Vec::new(),
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Six-byte device address, stored least significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Length of an address on the wire.
    pub const LEN: usize = 6;

    /// Build from bytes in wire order.
    pub fn from_wire(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Bytes in wire order.
    pub fn to_wire(self) -> [u8; 6] {
        self.0
    }

    /// Whether every byte is zero (no address programmed).
    pub fn is_zero(&self) -> bool {
        self.0
            .iter()
            .all(|b| *b == 0)
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    /// Parse 12 hex digits, most significant byte first, with optional
    /// `:` or `-` separators.
    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != Self::LEN * 2
            || !digits
                .chars()
                .all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::Config(format!(
                "invalid device address '{s}', expected 12 hex digits"
            )));
        }

        let mut bytes = [0u8; 6];
        for i in 0..Self::LEN {
            let byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|e| Error::Config(format!("invalid device address '{s}': {e}")))?;
            bytes[Self::LEN - 1 - i] = byte;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{g:02X}:{e:02X}:{d:02X}:{c:02X}:{b:02X}:{a:02X}")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for DeviceAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
