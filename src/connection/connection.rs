use std::ops::DerefMut;

use bytes::BytesMut;
use log::{log_enabled, trace};
use tokio::io::BufWriter;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
};

use crate::protocol::frame::{self, Frame};

pub struct Connection {
    peer_addr: String,
    read_stream: Mutex<OwnedReadHalf>,
    write_stream: Mutex<BufWriter<OwnedWriteHalf>>,
    read_buf: Mutex<BytesMut>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let peer_addr = stream
            .peer_addr()
            .map_or_else(|_| String::from("unknown"), |addr| addr.to_string());
        let (read, write) = stream.into_split();
        Connection {
            peer_addr,
            read_stream: Mutex::new(read),
            write_stream: Mutex::new(BufWriter::new(write)),
            read_buf: Mutex::new(BytesMut::new()),
        }
    }

    pub fn get_peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Read a frame from the connection.
    ///
    /// Returns `None` if EOF is reached
    pub async fn read_frame(&self) -> anyhow::Result<Option<Frame>> {
        loop {
            {
                if let Some(frame) = self.parse_frame().await? {
                    return Ok(Some(frame));
                }
            }

            {
                let mut read_stream = self.read_stream.lock().await;
                let mut read_buf = self.read_buf.lock().await;
                if 0 == read_stream.read_buf(read_buf.deref_mut()).await? {
                    if read_buf.is_empty() {
                        return Ok(None);
                    } else {
                        return Err(anyhow::anyhow!("connection reset by peer"));
                    }
                }
                if log_enabled!(log::Level::Trace) {
                    trace!("read_buf {:?}", &read_buf[..])
                }
            }
        }
    }

    pub async fn parse_frame(&self) -> anyhow::Result<Option<Frame>> {
        let mut read_buf = self.read_buf.lock().await;
        let frame = frame::next_frame(read_buf.deref_mut())?;
        if let Some(frame) = &frame {
            trace!("got frame {:?}", frame);
        }
        Ok(frame)
    }

    /// Write frames to the connection.
    pub async fn write_frame(&self, frames: &[Frame]) -> anyhow::Result<()> {
        let mut write_stream = self.write_stream.lock().await;
        for frame in frames {
            write_stream.write_all(&frame.encode()).await?;
        }
        write_stream.flush().await?;
        Ok(())
    }
}
