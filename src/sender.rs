use log::info;
use tokio::net::TcpSocket;

use FirmwareLink::config::Config;
use FirmwareLink::connection::connection::Connection;
use FirmwareLink::firmware::FileSource;
use FirmwareLink::session::sender::push_firmware;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| String::from("127.0.0.1:7199"));
    let firmware_path = args.next().unwrap_or_else(|| String::from("firmware.bin"));

    let cfg = Config::default();
    let addr = addr.parse()?;
    let socket = TcpSocket::new_v4()?;
    let stream = socket.connect(addr).await?;
    info!("connected {}", &addr);

    let conn = Connection::new(stream);
    let mut source = FileSource::open(&firmware_path).await?;
    let report = push_firmware(&conn, &mut source, &cfg).await?;
    info!(
        "firmware push complete, sent {} / {} bytes in {} frames, elapsed {}ms",
        report.bytes_sent, report.total_size, report.frames_sent, report.elapsed_ms
    );
    Ok(())
}
