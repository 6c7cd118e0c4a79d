// verify.rs - `chainlog verify`.

use chainlog::{ChainLog, VerifyResult};

pub fn execute(log: &ChainLog, partition: &str) -> anyhow::Result<()> {
    let result = log.verify(partition)?;
    println!("{}", render(partition, &result));
    if !result.valid {
        anyhow::bail!("partition '{}' failed integrity verification", partition);
    }
    Ok(())
}

fn render(partition: &str, result: &VerifyResult) -> String {
    match &result.failure {
        None => format!(
            "Partition '{}' verified: {} entr{}, hash chain intact.\n  Final hash: {}",
            partition,
            result.count,
            if result.count == 1 { "y" } else { "ies" },
            result.final_hash
        ),
        Some(failure) => {
            let mut out = format!("INTEGRITY VIOLATION in partition '{}':\n", partition);
            out.push_str(&format!("  {}\n", failure));
            out.push_str(&format!("  Entries verified before the break: {}\n", result.count));
            out.push_str(&format!("  Last good hash: {}\n", result.final_hash));
            out.push_str("\nThe partition may have been tampered with.");
            out
        }
    }
}
