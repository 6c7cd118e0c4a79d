// list.rs - `chainlog list`.

use chainlog::ChainLog;

pub fn execute(log: &ChainLog) -> anyhow::Result<()> {
    let partitions = log.list_partitions()?;
    if partitions.is_empty() {
        println!("No partitions found.");
        return Ok(());
    }
    println!("Available partitions:");
    for name in partitions {
        println!("  - {}", name);
    }
    Ok(())
}
