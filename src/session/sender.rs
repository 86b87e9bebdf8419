use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::time::timeout;

use crate::{
    config::Config,
    connection::connection::Connection,
    error::SessionError,
    firmware::FirmwareSource,
    protocol::{command::Command, frame::Frame},
    until,
};

/// 一次推送完成后的统计
#[derive(Debug)]
pub struct PushReport {
    pub total_size: u64,
    pub bytes_sent: u64,
    pub frames_sent: usize,
    pub elapsed_ms: u128,
}

/// 推送固件：StartUpgrade -> TransferChunk... -> EndUpgrade
///
/// 严格串行，每一帧都等到对应id的Ack后才发送下一帧，
/// 等待失败(超时/断开)立即中止整个传输，没有重试
pub async fn push_firmware(
    conn: &Connection,
    source: &mut dyn FirmwareSource,
    cfg: &Config,
) -> anyhow::Result<PushReport> {
    let started = until::now_ts()?;
    let total_size = source.total_size().await?;
    if total_size > u32::MAX as u64 {
        return Err(anyhow::anyhow!(
            "firmware too large for 4-byte size field: {}",
            total_size
        ));
    }
    let mut next_id: u16 = 1;
    let mut frames_sent = 0usize;

    // 1. 宣告总大小
    let start = Frame::new_start_upgrade(alloc_id(&mut next_id), total_size as u32);
    let start_id = start.id;
    conn.write_frame(&[start]).await?;
    frames_sent += 1;
    wait_ack(conn, start_id, cfg.ack_timeout).await?;
    info!(
        "StartUpgrade acked, total={} bytes, peer={}",
        total_size,
        conn.get_peer_addr()
    );

    // 2. 分块传输
    let mut bytes_sent: u64 = 0;
    let mut chunk_buf = vec![0u8; cfg.chunk_size];
    loop {
        let n = source.read_chunk(&mut chunk_buf).await?;
        if n == 0 {
            break;
        }
        let chunk = Frame::new_chunk(alloc_id(&mut next_id), &chunk_buf[..n]);
        let chunk_id = chunk.id;
        conn.write_frame(&[chunk]).await?;
        frames_sent += 1;
        wait_ack(conn, chunk_id, cfg.ack_timeout).await?;
        bytes_sent += n as u64;
        debug!(
            "chunk acked, id={}, progress {} / {} bytes",
            chunk_id, bytes_sent, total_size
        );
    }

    // 3. 结束帧，这里的Ack按尽力而为处理，缺失不算失败
    let end = Frame::new_end_upgrade(alloc_id(&mut next_id));
    let end_id = end.id;
    conn.write_frame(&[end]).await?;
    frames_sent += 1;
    if let Err(err) = wait_ack(conn, end_id, cfg.ack_timeout).await {
        warn!("EndUpgrade ack not received: {:?}", err);
    }

    Ok(PushReport {
        total_size,
        bytes_sent,
        frames_sent,
        elapsed_ms: until::elapsed_ms(started)?,
    })
}

/// 每发送一帧分配一个新id，从1开始单调递增
fn alloc_id(next_id: &mut u16) -> u16 {
    let id = *next_id;
    *next_id = next_id.wrapping_add(1);
    id
}

/// 阻塞等待指定id的Ack，超过时限返回SessionError::AckTimeout
pub async fn wait_ack(conn: &Connection, id: u16, deadline: Duration) -> anyhow::Result<()> {
    match timeout(deadline, wait_ack_inner(conn, id)).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::AckTimeout(id).into()),
    }
}

async fn wait_ack_inner(conn: &Connection, id: u16) -> anyhow::Result<()> {
    loop {
        match conn.read_frame().await? {
            Some(frame) => {
                if frame.command == Command::Ack && frame.id == id {
                    trace!("ack received, id={}", id);
                    return Ok(());
                }
                // Nack和其它不匹配的帧不满足等待条件，忽略
                trace!(
                    "ignore frame while waiting ack, want id={}, got cmd={:?} id={}",
                    id,
                    frame.command,
                    frame.id
                );
            }
            None => return Err(SessionError::Closed.into()),
        }
    }
}
