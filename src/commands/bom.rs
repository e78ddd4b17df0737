// src/commands/bom.rs
//! Bill of materials commands

use airlock::bom::BillOfMaterials;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Hash a tree and print or save its BOM
pub fn cmd_bom_generate(dir: &Path, output: Option<&Path>) -> Result<()> {
    info!("Generating BOM for {}", dir.display());
    let bom = match output {
        Some(path) => BillOfMaterials::generate_for(dir, path),
        None => BillOfMaterials::generate(dir),
    }
    .with_context(|| format!("Failed to generate BOM for {}", dir.display()))?;

    match output {
        Some(path) => {
            bom.save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Wrote BOM for {} files ({} bytes) to {}",
                bom.len(),
                bom.total_size(),
                path.display()
            );
        }
        None => print!("{}", bom.to_json()?),
    }
    Ok(())
}

/// Check a tree against a BOM, listing every offending path
pub fn cmd_bom_verify(dir: &Path, bom_path: &Path) -> Result<()> {
    info!("Verifying {} against {}", dir.display(), bom_path.display());
    let bom = BillOfMaterials::load(bom_path)
        .with_context(|| format!("Failed to load BOM {}", bom_path.display()))?;
    let actual = BillOfMaterials::generate_for(dir, bom_path)
        .with_context(|| format!("Failed to hash {}", dir.display()))?;

    let diff = bom.diff(&actual);
    if diff.is_clean() {
        println!("OK: {} files match", bom.len());
        return Ok(());
    }
    for path in &diff.missing {
        println!("  missing  {}", path);
    }
    for path in &diff.extra {
        println!("  extra    {}", path);
    }
    for path in &diff.changed {
        println!("  changed  {}", path);
    }
    diff.into_result(&dir.display().to_string())?;
    Ok(())
}
