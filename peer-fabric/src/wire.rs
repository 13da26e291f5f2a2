//! Fixed, interoperability-critical wire format: the packet header that is
//! both transmitted on the wire and used verbatim as AEAD associated data.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

bitflags::bitflags! {
    /// The security flags byte of the packet header. Bit 0 selects whether
    /// the session is a group session; bits 2-3 select the extension
    /// presence. Unknown extension bits must be ignored, never rejected.
    pub struct SecurityFlags: u8 {
        const GROUP             = 0b0000_0001;
        const EXTENSIONS        = 0b0010_0000;
        const SOURCE_NODE_ID    = 0b0100_0000;
        const DEST_NODE_ID      = 0b1000_0000;
    }
}

/// A trait for types that serialize to the wire format used by this
/// protocol, mirroring the corpus's serialize/deserialize split for
/// protocol types.
pub trait WireEncode {
    fn wire_encode<W: Write>(&self, writer: W) -> io::Result<()>;
}

pub trait WireDecode: Sized {
    fn wire_decode<R: Read>(reader: R) -> io::Result<Self>;
}

/// The packet header: `security_flags`, `session_id`, `message_id`, and
/// optional source/destination node ids.
///
/// `security_flags` is always `header_bytes[0]`: that placement is relied
/// on directly by nonce derivation (see `peer-net`'s `secure_session`
/// module), so the field order here is load-bearing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PacketHeader {
    pub message_id: u32,
    pub session_id: u16,
    pub security_flags: SecurityFlags,
    pub source_node_id: Option<u64>,
    pub dest_node_id: Option<u64>,
}

impl PacketHeader {
    pub fn new(session_id: u16, message_id: u32) -> Self {
        PacketHeader {
            message_id,
            session_id,
            security_flags: SecurityFlags::empty(),
            source_node_id: None,
            dest_node_id: None,
        }
    }
}

impl WireEncode for PacketHeader {
    fn wire_encode<W: Write>(&self, mut writer: W) -> io::Result<()> {
        // The message length prefix is owned by the transport framing, not
        // this header; byte layout here starts at security_flags so that
        // byte offset 0 is always the flags nonce derivation reads.
        writer.write_u8(self.security_flags.bits())?;
        writer.write_u16::<LittleEndian>(self.session_id)?;
        writer.write_u32::<LittleEndian>(self.message_id)?;
        if let Some(src) = self.source_node_id {
            writer.write_u64::<LittleEndian>(src)?;
        }
        if let Some(dst) = self.dest_node_id {
            writer.write_u64::<LittleEndian>(dst)?;
        }
        Ok(())
    }
}

impl WireDecode for PacketHeader {
    fn wire_decode<R: Read>(mut reader: R) -> io::Result<Self> {
        let security_flags = SecurityFlags::from_bits_truncate(reader.read_u8()?);
        let session_id = reader.read_u16::<LittleEndian>()?;
        let message_id = reader.read_u32::<LittleEndian>()?;
        let source_node_id = if security_flags.contains(SecurityFlags::SOURCE_NODE_ID) {
            Some(reader.read_u64::<LittleEndian>()?)
        } else {
            None
        };
        let dest_node_id = if security_flags.contains(SecurityFlags::DEST_NODE_ID) {
            Some(reader.read_u64::<LittleEndian>()?)
        } else {
            None
        };
        Ok(PacketHeader {
            message_id,
            session_id,
            security_flags,
            source_node_id,
            dest_node_id,
        })
    }
}

/// Encode a header to its raw bytes, which doubles as the AEAD AAD.
pub fn header_bytes(header: &PacketHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    header
        .wire_encode(&mut buf)
        .expect("encoding into a Vec cannot fail");
    buf
}

/// `header_bytes[0]`, as used directly by nonce derivation.
pub fn security_flags_byte(header_bytes: &[u8]) -> u8 {
    header_bytes[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_without_node_ids() {
        let header = PacketHeader::new(7, 42);
        let bytes = header_bytes(&header);
        let decoded = PacketHeader::wire_decode(&bytes[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn round_trip_with_node_ids() {
        let header = PacketHeader {
            message_id: 9,
            session_id: 3,
            security_flags: SecurityFlags::SOURCE_NODE_ID | SecurityFlags::DEST_NODE_ID,
            source_node_id: Some(0xAAAA),
            dest_node_id: Some(0xBBBB),
        };
        let bytes = header_bytes(&header);
        let decoded = PacketHeader::wire_decode(&bytes[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn security_flags_is_the_first_byte() {
        let header = PacketHeader {
            message_id: 0xAABBCCDD,
            session_id: 0x1234,
            security_flags: SecurityFlags::EXTENSIONS,
            source_node_id: None,
            dest_node_id: None,
        };
        let bytes = header_bytes(&header);
        assert_eq!(security_flags_byte(&bytes), SecurityFlags::EXTENSIONS.bits());
    }
}
