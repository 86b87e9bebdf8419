use std::sync::Arc;

use log::{error, info, trace, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::JoinHandle,
};
use tokio_context::context::{Context, RefContext};

use crate::{
    config::Config,
    connection::connection::Connection,
    firmware::{FileSink, FirmwareSink},
    protocol::{command::Command, frame::Frame},
};

/// 一次接收会话结束后的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReport {
    pub received: u64,
    pub expected: u64,
}

pub fn start_upgrade_server(ctx: RefContext, cfg: Arc<Config>) -> anyhow::Result<JoinHandle<()>> {
    let bind = format!("{}:{}", cfg.listen_addr, cfg.listen_port);
    info!("Upgrade server listening at: {}", bind);

    let handler = tokio::spawn(async move {
        let (mut done_ctx, _handler) = Context::with_parent(&ctx, None);
        let tcp_listener = TcpListener::bind(bind).await.unwrap();
        info!("Upgrade server thread startup");
        loop {
            select! {
                _ = done_ctx.done() => {
                    info!("Upgrade server loop stop");
                    break;
                },
                _ = accept(ctx.clone(), cfg.clone(), &tcp_listener) => {
                }
            }
        }
    });
    Ok(handler)
}

async fn accept(ctx: RefContext, cfg: Arc<Config>, tcp_listener: &TcpListener) {
    match tcp_listener.accept().await {
        Ok((socket, addr)) => {
            let addr = addr.to_string();
            info!("Accept new conn {}", &addr);
            let ctx = ctx.clone();
            // 每个连接由独立的任务处理
            tokio::spawn(async move {
                handle_connection(ctx, cfg, socket).await;
                info!("disconnect {}", &addr);
            });
        }
        Err(err) => {
            error!("Failed accept conn, {:?}", err);
        }
    };
}

async fn handle_connection(ctx: RefContext, cfg: Arc<Config>, socket: TcpStream) {
    let conn = Connection::new(socket);
    let mut sink = match FileSink::create(&cfg.output_path).await {
        Ok(sink) => sink,
        Err(err) => {
            error!(
                "Open output file fail, path={}, {:?}",
                &cfg.output_path, err
            );
            return;
        }
    };
    match serve_upgrade(ctx, &conn, &mut sink).await {
        Ok(Some(report)) => {
            info!(
                "firmware received {} / {} bytes, peer={}",
                report.received,
                report.expected,
                conn.get_peer_addr()
            );
        }
        Ok(None) => {
            warn!(
                "session ended before EndUpgrade, peer={}",
                conn.get_peer_addr()
            );
        }
        Err(err) => {
            error!(
                "upgrade session error, peer={}, {:?}",
                conn.get_peer_addr(),
                err
            );
        }
    }
}

/// 接收端会话循环
///
/// 纯被动：逐帧响应，每个请求帧恰好回复一帧，EndUpgrade后返回统计。
/// 对端提前断开返回None
pub async fn serve_upgrade(
    ctx: RefContext,
    conn: &Connection,
    sink: &mut dyn FirmwareSink,
) -> anyhow::Result<Option<ReceiveReport>> {
    let (mut ctx, _handler) = Context::with_parent(&ctx, None);
    let mut expected: u64 = 0;
    let mut received: u64 = 0;
    loop {
        select! {
            _ = ctx.done() => {
                info!("upgrade session cancelled, peer={}", conn.get_peer_addr());
                return Ok(None);
            },
            frame = conn.read_frame() => {
                match frame? {
                    Some(frame) => {
                        if let Some(report) =
                            handle_frame(conn, frame, sink, &mut expected, &mut received).await?
                        {
                            return Ok(Some(report));
                        }
                    }
                    None => {
                        warn!(
                            "peer closed before EndUpgrade, received {} / {} bytes, peer={}",
                            received,
                            expected,
                            conn.get_peer_addr()
                        );
                        return Ok(None);
                    }
                }
            }
        }
    }
}

async fn handle_frame(
    conn: &Connection,
    frame: Frame,
    sink: &mut dyn FirmwareSink,
    expected: &mut u64,
    received: &mut u64,
) -> anyhow::Result<Option<ReceiveReport>> {
    match frame.command {
        Command::StartUpgrade => {
            match frame.start_total_size() {
                Some(total) => {
                    *expected = total as u64;
                    *received = 0;
                    sink.rewind().await?;
                    info!(
                        "StartUpgrade, total={} bytes, peer={}",
                        total,
                        conn.get_peer_addr()
                    );
                }
                None => {
                    // 负载长度异常时仍回复Ack，与既有设备行为保持一致
                    warn!(
                        "StartUpgrade with malformed payload, len={}, peer={}",
                        frame.payload.len(),
                        conn.get_peer_addr()
                    );
                }
            }
            conn.write_frame(&[Frame::new_ack(frame.id)]).await?;
            Ok(None)
        }
        Command::TransferChunk => {
            sink.write_all(&frame.payload).await?;
            *received += frame.payload.len() as u64;
            conn.write_frame(&[Frame::new_ack(frame.id)]).await?;
            trace!(
                "chunk stored, id={}, received {} / {} bytes",
                frame.id,
                received,
                expected
            );
            Ok(None)
        }
        Command::EndUpgrade => {
            sink.flush().await?;
            conn.write_frame(&[Frame::new_ack(frame.id)]).await?;
            Ok(Some(ReceiveReport {
                received: *received,
                expected: *expected,
            }))
        }
        other => {
            // 接收端不该收到的命令(含Ack/Nack)一律回复Nack，会话继续
            warn!(
                "unexpected command {:?}, id={}, reply nack, peer={}",
                other,
                frame.id,
                conn.get_peer_addr()
            );
            conn.write_frame(&[Frame::new_nack(frame.id)]).await?;
            Ok(None)
        }
    }
}
