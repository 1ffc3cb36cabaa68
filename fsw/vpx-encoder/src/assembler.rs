use crate::{
    EncodeError,
    codec::{EncodedPacket, PacketKind},
};

/// Concatenates the frame packets of one encode call into a reusable buffer of
/// fixed capacity.
pub struct PacketAssembler {
    buf: Vec<u8>,
    capacity: usize,
}

impl PacketAssembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Output of the last [`PacketAssembler::assemble`] call.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the concatenated payload of every [`PacketKind::Frame`] packet, in
    /// order. An empty slice means there is nothing to publish. Exceeding the
    /// capacity fails the whole frame.
    pub fn assemble(
        &mut self,
        packets: impl IntoIterator<Item = EncodedPacket>,
    ) -> Result<&[u8], EncodeError> {
        self.buf.clear();
        for packet in packets {
            if packet.kind != PacketKind::Frame {
                continue;
            }
            let len = self.buf.len() + packet.data.len();
            if len > self.capacity {
                self.buf.clear();
                return Err(EncodeError::Overflow {
                    len,
                    capacity: self.capacity,
                });
            }
            self.buf.extend_from_slice(&packet.data);
        }
        Ok(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other(data: &[u8]) -> EncodedPacket {
        EncodedPacket {
            kind: PacketKind::Other,
            data: data.to_vec(),
            keyframe: false,
        }
    }

    #[test]
    fn test_concatenates_frame_packets() {
        let mut assembler = PacketAssembler::new(16);
        let packets = vec![
            EncodedPacket::frame(vec![1, 2], true),
            other(&[0xFF; 4]),
            EncodedPacket::frame(vec![3], false),
            EncodedPacket::frame(vec![4, 5, 6], false),
        ];
        assert_eq!(assembler.assemble(packets).unwrap(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_empty() {
        let mut assembler = PacketAssembler::new(16);
        assert!(assembler.assemble(vec![]).unwrap().is_empty());
        assert!(assembler.assemble(vec![other(&[1, 2, 3])]).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_reset_between_frames() {
        let mut assembler = PacketAssembler::new(8);
        assembler
            .assemble(vec![EncodedPacket::frame(vec![9; 8], true)])
            .unwrap();
        let second = assembler
            .assemble(vec![EncodedPacket::frame(vec![1], false)])
            .unwrap();
        assert_eq!(second, &[1]);
    }

    #[test]
    fn test_capacity() {
        let mut assembler = PacketAssembler::new(4);
        let exact = assembler
            .assemble(vec![
                EncodedPacket::frame(vec![1, 2], true),
                EncodedPacket::frame(vec![3, 4], false),
            ])
            .unwrap();
        assert_eq!(exact.len(), 4);

        let err = assembler
            .assemble(vec![
                EncodedPacket::frame(vec![1, 2, 3], true),
                EncodedPacket::frame(vec![4, 5], false),
            ])
            .unwrap_err();
        assert!(matches!(err, EncodeError::Overflow { len: 5, capacity: 4 }));
        // stats packets never count against the capacity
        assert!(assembler.assemble(vec![other(&[0; 64])]).unwrap().is_empty());
    }
}
