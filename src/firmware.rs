use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

/// 固件字节来源，发送端按块顺序读取
#[async_trait]
pub trait FirmwareSource: Send {
    /// 固件总字节数
    async fn total_size(&mut self) -> anyhow::Result<u64>;

    /// 顺序读取下一段到buf，返回读取的字节数，0表示读尽
    async fn read_chunk(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;
}

/// 固件字节去向，接收端顺序写入
#[async_trait]
pub trait FirmwareSink: Send {
    /// 回到起始位置，之前写入的内容将被覆盖
    async fn rewind(&mut self) -> anyhow::Result<()>;

    async fn write_all(&mut self, bytes: &[u8]) -> anyhow::Result<()>;

    async fn flush(&mut self) -> anyhow::Result<()>;
}

pub struct FileSource {
    file: File,
}

impl FileSource {
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let file = File::open(path).await?;
        Ok(FileSource { file })
    }
}

#[async_trait]
impl FirmwareSource for FileSource {
    async fn total_size(&mut self) -> anyhow::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        // 单次read可能不足一个块，凑满或读尽为止
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

pub struct FileSink {
    file: File,
}

impl FileSink {
    pub async fn create(path: &str) -> anyhow::Result<Self> {
        let file = File::create(path).await?;
        Ok(FileSink { file })
    }
}

#[async_trait]
impl FirmwareSink for FileSink {
    async fn rewind(&mut self) -> anyhow::Result<()> {
        self.file.seek(SeekFrom::Start(0)).await?;
        self.file.set_len(0).await?;
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.file.write_all(bytes).await?;
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        self.file.flush().await?;
        Ok(())
    }
}

/// 内存实现，测试用
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        MemorySource { data, pos: 0 }
    }
}

#[async_trait]
impl FirmwareSource for MemorySource {
    async fn total_size(&mut self) -> anyhow::Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let remain = self.data.len() - self.pos;
        let n = remain.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub data: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }
}

#[async_trait]
impl FirmwareSink for MemorySink {
    async fn rewind(&mut self) -> anyhow::Result<()> {
        self.data.clear();
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
