//! Witness files. `.toml` is `Prover.toml` text; everything else goes through
//! the JSON/CBOR helpers in [`nrollup_core::io`].

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::CanonicalWitness;

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}

/// Write a witness; the format follows the extension.
pub fn write_witness_auto<P: AsRef<Path>>(path: P, cw: &CanonicalWitness) -> Result<()> {
    let path = path.as_ref();
    if is_toml(path) {
        nrollup_core::io::ensure_parent_dir(path)?;
        let text = cw.to_prover_toml()?;
        fs::write(path, text).with_context(|| format!("write {}", path.display()))
    } else {
        nrollup_core::io::write_auto(path, cw)
    }
}

/// Read a witness written by [`write_witness_auto`].
pub fn read_witness_auto<P: AsRef<Path>>(path: P) -> Result<CanonicalWitness> {
    let path = path.as_ref();
    if is_toml(path) {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        CanonicalWitness::from_prover_toml(&text)
            .with_context(|| format!("parse {}", path.display()))
    } else {
        nrollup_core::io::read_auto(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrollup_crypto::FieldElement;
    use std::path::PathBuf;

    fn tmp_path(name: &str, ext: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("nrollup_witness_{name}_{nanos}.{ext}"));
        p
    }

    #[test]
    fn every_format_roundtrips() {
        let cw = CanonicalWitness {
            amount: vec![FieldElement::from_u64(9)],
            bal_root: FieldElement::from_u64(1),
            intermediate_roots: vec![FieldElement::from_u64(2)],
            new_root: FieldElement::from_u64(3),
            ..CanonicalWitness::default()
        };
        for ext in ["toml", "json", "cbor"] {
            let path = tmp_path("rt", ext);
            write_witness_auto(&path, &cw).unwrap();
            assert_eq!(read_witness_auto(&path).unwrap(), cw);
            let _ = fs::remove_file(path);
        }
    }
}
