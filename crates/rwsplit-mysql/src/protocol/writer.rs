//! Payload builder and packet framing.

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// Growable payload buffer with MySQL encodings.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a command payload: the command byte followed by its argument.
    pub fn command(command: u8, arg: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(1 + arg.len());
        buf.push(command);
        buf.extend_from_slice(arg);
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Length-encoded integer: one byte below 251, else a 0xFC/0xFD/0xFE
    /// marker followed by 2, 3 or 8 little-endian bytes.
    pub fn write_lenenc_int(&mut self, value: u64) {
        let bytes = value.to_le_bytes();
        match value {
            0..=250 => self.buf.push(bytes[0]),
            251..=0xFFFF => {
                self.buf.push(0xFC);
                self.buf.extend_from_slice(&bytes[..2]);
            }
            0x1_0000..=0xFF_FFFF => {
                self.buf.push(0xFD);
                self.buf.extend_from_slice(&bytes[..3]);
            }
            _ => {
                self.buf.push(0xFE);
                self.buf.extend_from_slice(&bytes);
            }
        }
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_null_string(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }
}

/// Frame `payload` into one or more wire packets starting at sequence `seq`.
///
/// Payloads of `MAX_PACKET_SIZE` bytes or more are split; a payload that ends
/// exactly on a chunk boundary gets a trailing empty packet. Returns the
/// framed bytes and the next sequence id.
pub fn frame_packets(payload: &[u8], mut seq: u8) -> (Vec<u8>, u8) {
    let mut out = Vec::with_capacity(payload.len() + 4);
    let mut chunks = payload.chunks(MAX_PACKET_SIZE).peekable();
    let mut last_len = 0;

    if chunks.peek().is_none() {
        out.extend_from_slice(&header(0, seq));
        return (out, seq.wrapping_add(1));
    }

    for chunk in chunks {
        out.extend_from_slice(&header(chunk.len(), seq));
        out.extend_from_slice(chunk);
        seq = seq.wrapping_add(1);
        last_len = chunk.len();
    }
    if last_len == MAX_PACKET_SIZE {
        out.extend_from_slice(&header(0, seq));
        seq = seq.wrapping_add(1);
    }
    (out, seq)
}

fn header(len: usize, sequence_id: u8) -> [u8; 4] {
    // chunks never exceed MAX_PACKET_SIZE, which fits in 24 bits
    let payload_length = u32::try_from(len).unwrap_or(u32::MAX) & 0x00FF_FFFF;
    PacketHeader {
        payload_length,
        sequence_id,
    }
    .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenenc_int_widths() {
        let mut w = PacketWriter::new();
        w.write_lenenc_int(0x42);
        w.write_lenenc_int(0x1234);
        w.write_lenenc_int(0x0012_3456);
        assert_eq!(
            w.into_payload(),
            vec![0x42, 0xFC, 0x34, 0x12, 0xFD, 0x56, 0x34, 0x12]
        );

        let mut w = PacketWriter::new();
        w.write_lenenc_int(u64::MAX);
        assert_eq!(w.len(), 9);
    }

    #[test]
    fn test_command_packet() {
        let payload = PacketWriter::command(0x03, b"SELECT 1").into_payload();
        let (packet, next) = frame_packets(&payload, 0);
        assert_eq!(&packet[..4], &[0x09, 0x00, 0x00, 0x00]);
        assert_eq!(packet[4], 0x03);
        assert_eq!(&packet[5..], b"SELECT 1");
        assert_eq!(next, 1);
    }

    #[test]
    fn test_strings() {
        let mut w = PacketWriter::new();
        w.write_null_string("root");
        w.write_lenenc_string("db");
        assert_eq!(w.into_payload(), b"root\0\x02db".to_vec());
    }

    #[test]
    fn test_large_payload_is_split() {
        let payload = vec![0u8; MAX_PACKET_SIZE];
        let (packet, next) = frame_packets(&payload, 3);
        // full chunk + empty terminator
        assert_eq!(packet.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&packet[..4], &[0xFF, 0xFF, 0xFF, 3]);
        assert_eq!(&packet[MAX_PACKET_SIZE + 4..], &[0, 0, 0, 4]);
        assert_eq!(next, 5);
    }
}
