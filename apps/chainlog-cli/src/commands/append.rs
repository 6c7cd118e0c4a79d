// append.rs - `chainlog append`.

use std::io::Read;

use anyhow::Context;
use chainlog::ChainLog;

pub fn execute(log: &ChainLog, partition: &str, data: &str) -> anyhow::Result<()> {
    let raw = if data == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        data.to_string()
    };
    let value = parse_payload(&raw)?;

    let entry = log.append(partition, value)?;
    println!("Appended entry {} to partition '{}'", entry.seq, partition);
    println!("  Hash: {}", entry.hash);
    Ok(())
}

fn parse_payload(raw: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(raw.trim()).context("payload is not valid JSON")
}
