use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ts() -> anyhow::Result<u128> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(now.as_millis())
}

pub fn elapsed_ms(since_ts: u128) -> anyhow::Result<u128> {
    Ok(now_ts()?.saturating_sub(since_ts))
}
