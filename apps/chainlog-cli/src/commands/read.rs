// read.rs - `chainlog read`, `chainlog tail`, `chainlog last`.
//
// Entries are printed exactly as stored: one JSON object per line, so the
// output can be piped into jq or back into another tool.

use chainlog::{CancellationToken, ChainLog, Entry};

pub fn read(log: &ChainLog, partition: &str, start: u64, limit: Option<usize>) -> anyhow::Result<()> {
    for entry in log.read(partition, start, limit)? {
        print_entry(&entry?)?;
    }
    Ok(())
}

pub fn tail(
    log: &ChainLog,
    partition: &str,
    n: Option<usize>,
    start: Option<u64>,
    follow: bool,
) -> anyhow::Result<()> {
    // Print the backlog and remember where following should pick up.
    let mut next_seq = start.unwrap_or(0);
    let backlog = match (start, n) {
        (None, Some(n)) => log.read_last(partition, n)?,
        _ => log
            .read(partition, next_seq, None)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    for entry in &backlog {
        print_entry(entry)?;
        next_seq = entry.seq + 1;
    }
    if backlog.is_empty() && start.is_none() && n.is_some() {
        // `-n 0`: print nothing, but follow from the current end.
        if let Some(last) = log.last_entry(partition)? {
            next_seq = last.seq + 1;
        }
    }

    if !follow {
        return Ok(());
    }

    eprintln!("# Following partition '{}' (Ctrl+C to stop)...", partition);
    for entry in log.follow(partition, next_seq, CancellationToken::new())? {
        print_entry(&entry?)?;
    }
    Ok(())
}

pub fn last(log: &ChainLog, partition: &str) -> anyhow::Result<()> {
    match log.last_entry(partition)? {
        Some(entry) => print_entry(&entry),
        None => {
            println!("Partition '{}' is empty.", partition);
            Ok(())
        }
    }
}

fn print_entry(entry: &Entry) -> anyhow::Result<()> {
    println!("{}", chainlog::encode(entry)?);
    Ok(())
}
