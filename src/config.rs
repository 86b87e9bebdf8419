use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    // 升级服务器监听地址
    pub listen_addr: String,
    // 升级服务器监听端口
    pub listen_port: usize,
    // 单个TransferChunk承载的固件字节数
    pub chunk_size: usize,
    // 每次等待Ack的最长时间
    pub ack_timeout: Duration,
    // 接收端固件落盘路径
    pub output_path: String,
}

impl Config {
    pub fn new() -> Self {
        let listen_port = std::env::var("FW_LISTEN_PORT").ok();
        Config {
            listen_addr: std::env::var("FW_LISTEN_ADDR")
                .unwrap_or_else(|_| String::from("0.0.0.0")),
            listen_port: listen_port
                .map_or(7199, |port| usize::from_str_radix(&port, 10).unwrap_or(7199)),
            chunk_size: env_usize("FW_CHUNK_SIZE", 1280),
            ack_timeout: Duration::from_secs(env_usize("FW_ACK_TIMEOUT_SECS", 30) as u64),
            output_path: std::env::var("FW_OUTPUT_PATH")
                .unwrap_or_else(|_| String::from("firmware.bin")),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
