use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

use super::{
    command::Command, CRC32, CURRENT_VERSION, FRAME_MAGIC, HEADER_SIZE, TRAILER_SIZE,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameMatchResult<'a> {
    Incomplete(&'a str),
    MissMatch(&'a str),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub command: Command,
    pub id: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command, id: u16, payload: Vec<u8>) -> Self {
        Frame {
            version: CURRENT_VERSION,
            command,
            id,
            payload,
        }
    }

    pub fn new_start_upgrade(id: u16, total_size: u32) -> Self {
        Frame::new(Command::StartUpgrade, id, total_size.to_le_bytes().to_vec())
    }

    pub fn new_chunk(id: u16, chunk: &[u8]) -> Self {
        Frame::new(Command::TransferChunk, id, chunk.to_vec())
    }

    pub fn new_end_upgrade(id: u16) -> Self {
        Frame::new(Command::EndUpgrade, id, Vec::new())
    }

    pub fn new_ack(id: u16) -> Self {
        Frame::new(Command::Ack, id, Vec::new())
    }

    pub fn new_nack(id: u16) -> Self {
        Frame::new(Command::Nack, id, Vec::new())
    }

    /// 编码后的总字节数
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    /// StartUpgrade负载中的固件总大小，负载长度异常时返回None
    pub fn start_total_size(&self) -> Option<u32> {
        if self.command != Command::StartUpgrade || self.payload.len() != 4 {
            return None;
        }
        let bytes: [u8; 4] = self.payload[..4].try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    pub fn encode(&self) -> Bytes {
        let mut buff = BytesMut::with_capacity(self.encoded_size());
        buff.put_u32_le(FRAME_MAGIC);
        buff.put_u8(self.version);
        buff.put_u8(self.command.to_byte());
        buff.put_u16_le(self.id);
        buff.put_u32_le(self.payload.len() as u32);
        buff.extend_from_slice(&self.payload);
        let crc = CRC32.checksum(&buff[..]);
        buff.put_u32_le(crc);
        buff.freeze()
    }

    /// 检查缓冲区头部是否为一个完整的合法帧
    ///
    /// MissMatch表示当前字节不是帧起点，调用方应丢弃1字节后重新检查
    pub fn check<'a>(cursor: &mut Cursor<&[u8]>) -> FrameMatchResult<'a> {
        if cursor.remaining() < 4 {
            return FrameMatchResult::Incomplete("magic");
        }
        let magic = cursor.get_u32_le();
        if magic != FRAME_MAGIC {
            return FrameMatchResult::MissMatch("magic");
        }

        if cursor.remaining() < HEADER_SIZE - 4 {
            return FrameMatchResult::Incomplete("header");
        }
        // version + command + id
        cursor.advance(4);
        let length = cursor.get_u32_le() as usize;
        if cursor.remaining() < length + TRAILER_SIZE {
            return FrameMatchResult::Incomplete("payload");
        }

        cursor.advance(length);
        let declared = cursor.get_u32_le();
        let total = HEADER_SIZE + length + TRAILER_SIZE;
        let actual = CRC32.checksum(&cursor.get_ref()[..total - TRAILER_SIZE]);
        if declared != actual {
            // 负载中恰好出现magic序列时也会走到这里
            return FrameMatchResult::MissMatch("checksum");
        }
        FrameMatchResult::Complete
    }

    pub fn parse(cursor: &mut Cursor<&[u8]>) -> anyhow::Result<Frame> {
        // magic已由check校验，跳过
        cursor.advance(4);
        let version = cursor.get_u8();
        let command = Command::from(cursor.get_u8());
        let id = cursor.get_u16_le();
        let length = cursor.get_u32_le() as usize;
        let mut payload = vec![0u8; length];
        cursor.copy_to_slice(&mut payload);
        cursor.advance(TRAILER_SIZE);
        Ok(Frame {
            version,
            command,
            id,
            payload,
        })
    }
}

/// 从缓冲区头部拆出一帧
///
/// 无法匹配时逐字节丢弃实现重新同步，一次传输读取中到达的多个帧
/// 可通过反复调用依次取出
pub fn next_frame(read_buf: &mut BytesMut) -> anyhow::Result<Option<Frame>> {
    loop {
        let mut cursor = Cursor::new(&read_buf[..]);
        match Frame::check(&mut cursor) {
            FrameMatchResult::Complete => {
                let mut cursor = Cursor::new(&read_buf[..]);
                let frame = Frame::parse(&mut cursor)?;
                let len = cursor.position() as usize;
                read_buf.advance(len);
                return Ok(Some(frame));
            }
            FrameMatchResult::Incomplete(reason) => {
                trace!("Incomplete, reason={}", reason);
                return Ok(None);
            }
            FrameMatchResult::MissMatch(reason) => {
                trace!("MissMatch, reason={}, 丢弃1字节重新同步", reason);
                read_buf.advance(1);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use crate::protocol::{
        command::Command,
        frame::{next_frame, Frame, FrameMatchResult},
        CURRENT_VERSION, HEADER_SIZE, MIN_FRAME_SIZE, TRAILER_SIZE,
    };

    fn sample_chunk_frame() -> Frame {
        Frame::new_chunk(7, &[0x10, 0x20, 0x30, 0x40, 0x50])
    }

    #[test]
    fn encode_layout_test() {
        let frame = sample_chunk_frame();
        let encoded = frame.encode();
        assert_eq!(encoded.len(), frame.encoded_size());
        // magic "SCZN" 小端
        assert_eq!(&encoded[..4], &[0x4E, 0x5A, 0x43, 0x53]);
        assert_eq!(encoded[4], CURRENT_VERSION);
        assert_eq!(encoded[5], 0x02);
        assert_eq!(&encoded[6..8], &7u16.to_le_bytes());
        assert_eq!(&encoded[8..12], &5u32.to_le_bytes());
        assert_eq!(&encoded[12..17], &[0x10, 0x20, 0x30, 0x40, 0x50]);
    }

    #[test]
    fn round_trip_test() {
        for frame in [
            Frame::new_ack(1),
            Frame::new_nack(9),
            Frame::new_end_upgrade(1024),
            Frame::new_start_upgrade(1, 3000),
            Frame::new_chunk(2, &vec![0xAB; 1280]),
        ] {
            let mut buff = BytesMut::from(&frame.encode()[..]);
            let decoded = next_frame(&mut buff).unwrap().unwrap();
            assert_eq!(decoded.command, frame.command);
            assert_eq!(decoded.id, frame.id);
            assert_eq!(decoded.payload, frame.payload);
            assert!(buff.is_empty());
        }
    }

    #[test]
    fn incomplete_check_for_empty_buffer_test() {
        let buff = BytesMut::new();
        let mut cursor = Cursor::new(&buff[..]);
        assert_eq!(
            Frame::check(&mut cursor),
            FrameMatchResult::Incomplete("magic")
        );
    }

    #[test]
    fn incomplete_check_for_partial_header_test() {
        let encoded = sample_chunk_frame().encode();
        let mut cursor = Cursor::new(&encoded[..HEADER_SIZE - 2]);
        assert_eq!(
            Frame::check(&mut cursor),
            FrameMatchResult::Incomplete("header")
        );
    }

    #[test]
    fn incomplete_check_for_partial_payload_test() {
        let encoded = sample_chunk_frame().encode();
        let mut cursor = Cursor::new(&encoded[..encoded.len() - 1]);
        assert_eq!(
            Frame::check(&mut cursor),
            FrameMatchResult::Incomplete("payload")
        );
    }

    #[test]
    fn miss_match_check_for_magic_test() {
        let mut raw = BytesMut::from(&sample_chunk_frame().encode()[..]);
        raw[0] = 0xF1;
        let mut cursor = Cursor::new(&raw[..]);
        assert_eq!(
            Frame::check(&mut cursor),
            FrameMatchResult::MissMatch("magic")
        );
    }

    #[test]
    fn miss_match_check_for_checksum_test() {
        let mut raw = BytesMut::from(&sample_chunk_frame().encode()[..]);
        raw[HEADER_SIZE] ^= 0xFF;
        let mut cursor = Cursor::new(&raw[..]);
        assert_eq!(
            Frame::check(&mut cursor),
            FrameMatchResult::MissMatch("checksum")
        );
    }

    #[test]
    fn single_bit_flip_rejected_test() {
        let encoded = sample_chunk_frame().encode();
        for byte_idx in 0..encoded.len() - TRAILER_SIZE {
            for bit in 0..8 {
                let mut buff = BytesMut::from(&encoded[..]);
                buff[byte_idx] ^= 1 << bit;
                // 任意单比特翻转都不能解出帧
                assert!(next_frame(&mut buff).unwrap().is_none());
            }
        }
    }

    #[test]
    fn resync_with_surrounding_garbage_test() {
        let frame = sample_chunk_frame();
        let mut buff = BytesMut::new();
        buff.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        buff.extend_from_slice(&frame.encode());
        buff.extend_from_slice(&[0x01, 0x02]);

        let decoded = next_frame(&mut buff).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(next_frame(&mut buff).unwrap().is_none());
    }

    #[test]
    fn multi_frame_drain_test() {
        let first = Frame::new_start_upgrade(1, 3000);
        let second = Frame::new_ack(1);
        let mut buff = BytesMut::new();
        buff.extend_from_slice(&first.encode());
        buff.extend_from_slice(&second.encode());

        assert_eq!(next_frame(&mut buff).unwrap().unwrap(), first);
        assert_eq!(next_frame(&mut buff).unwrap().unwrap(), second);
        assert!(buff.is_empty());
        assert!(next_frame(&mut buff).unwrap().is_none());
    }

    #[test]
    fn partial_delivery_test() {
        let frame = sample_chunk_frame();
        let encoded = frame.encode();
        let mut buff = BytesMut::new();
        // 模拟传输层一次一个字节的碎片到达
        for (i, byte) in encoded.iter().enumerate() {
            buff.put_u8(*byte);
            if i < encoded.len() - 1 {
                assert!(next_frame(&mut buff).unwrap().is_none());
            }
        }
        assert_eq!(next_frame(&mut buff).unwrap().unwrap(), frame);
    }

    #[test]
    fn unknown_command_decode_test() {
        let frame = Frame::new(Command::Unknown(0xFF), 3, Vec::new());
        let mut buff = BytesMut::from(&frame.encode()[..]);
        let decoded = next_frame(&mut buff).unwrap().unwrap();
        assert_eq!(decoded.command, Command::Unknown(0xFF));
        assert_eq!(decoded.id, 3);
    }

    #[test]
    fn start_total_size_test() {
        assert_eq!(
            Frame::new_start_upgrade(1, 3000).start_total_size(),
            Some(3000)
        );
        let malformed = Frame::new(Command::StartUpgrade, 1, vec![0x01, 0x02]);
        assert_eq!(malformed.start_total_size(), None);
        assert_eq!(Frame::new_ack(1).start_total_size(), None);
    }

    #[test]
    fn min_frame_size_test() {
        assert_eq!(Frame::new_ack(1).encode().len(), MIN_FRAME_SIZE);
    }
}
