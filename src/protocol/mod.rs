//! 协议设计
//! Magic(32) + Version(8) + Command(8) + Id(16) + Length(32) + <PAYLOAD...> + Crc32(32)
//!
//! 所有多字节字段为小端序

use crc::{Crc, CRC_32_ISO_HDLC};

/// Magic "SCZN" 小端
pub const FRAME_MAGIC: u32 = 0x53435A4E;
pub const CURRENT_VERSION: u8 = 1;

/// Magic + Version + Command + Id + Length
pub const HEADER_SIZE: usize = 12;
/// Crc32尾部
pub const TRAILER_SIZE: usize = 4;
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;

/// 预计算查找表，避免运行时惰性初始化
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub mod command;
pub mod frame;
