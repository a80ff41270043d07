//! Failure fingerprint inspection: `storyloop fingerprint`.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

use super::super::Cli;

/// Print the normalized form, digest and preview of failure text read from
/// `file`, or from stdin when no file is given.
pub fn cmd_fingerprint(cli: &Cli, file: Option<&Path>) -> Result<()> {
    use storyloop::fingerprint::{fingerprint, normalize_error, preview};

    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read failure text from stdin")?;
            buf
        }
    };

    let digest = fingerprint(&text);
    let normalized = normalize_error(&text);
    let preview = preview(&text);

    if cli.json {
        let value = serde_json::json!({
            "fingerprint": digest,
            "normalized": normalized,
            "preview": preview,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("fingerprint: {}", digest);
    println!("preview:     {}", preview);
    println!();
    println!("{}", normalized);
    Ok(())
}
