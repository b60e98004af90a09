//! Compare command implementation.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde_json::json;

use artguard_core::{hamming_distance, similarity, HashFamily, HashValue};

use super::print_json;
use crate::OutputFormat;

/// Distance and similarity between two hashes of one family.
#[derive(Debug, PartialEq)]
pub struct Comparison {
    pub family: HashFamily,
    pub distance: u32,
    pub similarity: f64,
}

pub fn compare_hex(a: &str, b: &str, family: &str) -> Result<Comparison> {
    let family: HashFamily = family
        .parse()
        .map_err(|_| anyhow::anyhow!("Unknown hash family '{}'", family))?;
    let width = family.bit_width();

    let a = HashValue::from_hex(a, width)
        .with_context(|| format!("Invalid hash A for {}", family))?;
    let b = HashValue::from_hex(b, width)
        .with_context(|| format!("Invalid hash B for {}", family))?;

    let distance = hamming_distance(&a, &b, width)?;
    Ok(Comparison {
        family,
        distance,
        similarity: similarity(distance, width),
    })
}

/// Execute the compare command.
pub fn execute(
    a: &str,
    b: &str,
    family: &str,
    threshold: Option<f64>,
    output: OutputFormat,
) -> Result<()> {
    if let Some(t) = threshold {
        if !(0.0..=1.0).contains(&t) {
            bail!("Threshold must be within [0, 1], got {}", t);
        }
    }

    let cmp = compare_hex(a, b, family)?;
    let matches = threshold.map(|t| cmp.similarity >= t);

    if output == OutputFormat::Json {
        print_json(&json!({
            "family": cmp.family,
            "bitWidth": cmp.family.bit_width(),
            "distance": cmp.distance,
            "similarity": cmp.similarity,
            "matches": matches,
        }));
        return Ok(());
    }

    println!(
        "   {} {} ({} bits)",
        "Family:".dimmed(),
        cmp.family,
        cmp.family.bit_width()
    );
    println!("   {} {}", "Distance:".dimmed(), cmp.distance);
    println!("   {} {:.4}", "Similarity:".dimmed(), cmp.similarity);
    match matches {
        Some(true) => println!("   {} {}", "Match:".dimmed(), "yes".green().bold()),
        Some(false) => println!("   {} {}", "Match:".dimmed(), "no".red().bold()),
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_hex() {
        let cmp = compare_hex("ffffffff00000000", "ffffffff00000003", "average").unwrap();
        assert_eq!(cmp.family, HashFamily::Average);
        assert_eq!(cmp.distance, 2);
        assert!((cmp.similarity - 62.0 / 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_rejects_bad_input() {
        let err = compare_hex("zz", "00", "average").unwrap_err();
        assert!(format!("{err:#}").contains("Invalid hash A"));

        let err = compare_hex("00", "00", "sha256").unwrap_err();
        assert!(err.to_string().contains("Unknown hash family"));

        // 65 bits does not fit a 64-bit family
        assert!(compare_hex("1ffffffffffffffff", "00", "average").is_err());
    }
}
