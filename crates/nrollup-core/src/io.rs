//! File helpers for state snapshots, configuration, and any other serde
//! payload (ledger calls, events, witnesses).
//!
//! Reads pick the format from the extension (`.json` / `.cbor`, case
//! insensitive) and reject anything else. Writes default to pretty JSON for
//! unknown or missing extensions.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor};
use std::path::{Path, PathBuf};

use crate::config::CONFIG_ENV;
use crate::{RollupConfig, StateSnapshot};

/// Ensure the parent directory for a file exists (no-op if none).
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", display(path)))?;
        }
    }
    Ok(())
}

/// Read `T` from **JSON**.
pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", display(path_ref)))?;
    serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("deserialize JSON from {}", display(path_ref)))
}

/// Write `T` to **JSON** (pretty).
pub fn write_json<T: Serialize + ?Sized, P: AsRef<Path>>(path: P, v: &T) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", display(path_ref)))?;
    serde_json::to_writer_pretty(BufWriter::new(f), v)
        .with_context(|| format!("serialize JSON to {}", display(path_ref)))
}

/// Read `T` from **CBOR**.
pub fn read_cbor<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path_ref = path.as_ref();
    let bytes = fs::read(path_ref).with_context(|| format!("read {}", display(path_ref)))?;
    from_cbor(&bytes).with_context(|| format!("deserialize CBOR from {}", display(path_ref)))
}

/// Write `T` to **CBOR**.
pub fn write_cbor<T: Serialize + ?Sized, P: AsRef<Path>>(path: P, v: &T) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let bytes = to_cbor(v).with_context(|| format!("serialize CBOR to {}", display(path_ref)))?;
    fs::write(path_ref, bytes).with_context(|| format!("write {}", display(path_ref)))
}

/// Auto-detect read by extension.
pub fn read_auto<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("json") => read_json(path),
        Some("cbor") => read_cbor(path),
        Some(other) => Err(anyhow!(
            "unsupported extension: {other} (supported: .json, .cbor)"
        )),
        None => Err(anyhow!("path has no extension (expected .json or .cbor)")),
    }
}

/// Auto-detect write (defaults to **JSON** if unknown or missing).
pub fn write_auto<T: Serialize + ?Sized, P: AsRef<Path>>(path: P, v: &T) -> Result<()> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("cbor") => write_cbor(path, v),
        _ => write_json(path, v),
    }
}

/// Read a persisted [`StateSnapshot`].
pub fn read_state_auto<P: AsRef<Path>>(path: P) -> Result<StateSnapshot> {
    read_auto(path.as_ref())
        .with_context(|| format!("reading rollup state {}", display(path.as_ref())))
}

/// Persist a [`StateSnapshot`].
pub fn write_state_auto<P: AsRef<Path>>(path: P, snap: &StateSnapshot) -> Result<()> {
    write_auto(path.as_ref(), snap)
        .with_context(|| format!("writing rollup state {}", display(path.as_ref())))
}

/// Read and validate a [`RollupConfig`].
pub fn read_config_auto<P: AsRef<Path>>(path: P) -> Result<RollupConfig> {
    let cfg: RollupConfig = read_auto(path.as_ref())
        .with_context(|| format!("reading config {}", display(path.as_ref())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Config from `path`, else from the file named by `NROLLUP_CONFIG`, else
/// the defaults.
pub fn load_config(path: Option<&Path>) -> Result<RollupConfig> {
    let chosen: Option<PathBuf> = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match chosen {
        Some(p) => read_config_auto(&p),
        None => Ok(RollupConfig::default()),
    }
}

/// Serialize any `T: Serialize` to **CBOR bytes**.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).context("serialize CBOR (to_cbor)")?;
    Ok(buf)
}

/// Deserialize any `T: DeserializeOwned` from **CBOR bytes**.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut cur = Cursor::new(bytes);
    ciborium::de::from_reader(&mut cur).context("deserialize CBOR (from_cbor)")
}

/// Lowercase extension without the dot.
fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LedgerEvent, RollupState};
    use nrollup_crypto::{CircomPoseidon, FieldElement, PublicKey};

    fn tmp_path(name: &str, ext: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("nrollup_core_io_{name}_{nanos}.{ext}"));
        p
    }

    fn sample_state() -> RollupState {
        let mut s = RollupState::new(RollupConfig::default()).unwrap();
        s.genesis_deposit().unwrap();
        s.deposit(
            PublicKey::new(FieldElement::from_u64(3), FieldElement::from_u64(4)),
            FieldElement::from_u64(50),
            FieldElement::from_u64(1),
        )
        .unwrap();
        s
    }

    #[test]
    fn state_roundtrip_json_and_cbor() {
        let s = sample_state();
        let snap = s.snapshot().unwrap();
        for ext in ["json", "cbor"] {
            let path = tmp_path("state", ext);
            write_state_auto(&path, &snap).unwrap();
            let back = read_state_auto(&path).unwrap();
            assert_eq!(back, snap);
            let restored = RollupState::from_snapshot(back, CircomPoseidon).unwrap();
            assert_eq!(restored.root(), s.root());
            assert_eq!(restored.deposit_queue().len(), 2);
            let _ = std::fs::remove_file(path);
        }
    }

    #[test]
    fn unknown_extension_rejected_on_read() {
        let err = read_auto::<RollupConfig, _>("state.yaml").unwrap_err();
        assert!(err.to_string().contains("unsupported extension"));
    }

    #[test]
    fn config_file_validated() {
        let path = tmp_path("config", "json");
        std::fs::write(&path, r#"{"balance_depth": 0}"#).unwrap();
        assert!(read_config_auto(&path).is_err());
        std::fs::write(&path, r#"{"balance_depth": 6}"#).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().balance_depth, 6);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn events_through_cbor_bytes() {
        let events = vec![LedgerEvent::ConfirmBatch {
            old_root: FieldElement::from_u64(1),
            new_root: FieldElement::from_u64(2),
            count: 3,
        }];
        let bytes = to_cbor(&events).unwrap();
        let back: Vec<LedgerEvent> = from_cbor(&bytes).unwrap();
        assert_eq!(back, events);
    }
}
