//! Trust anchors and the local revocation set (spec §4.7: "each a separate
//! anchor set" for V2G root, MO root, OEM root, and contract root).

use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// The four independent trust-anchor roles ISO 15118 distinguishes
/// (spec §4.7). A chain is validated against exactly one of these,
/// selected by the flow that produced it (PnC authorization vs. TLS
/// server identity vs. contract-certificate installation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    V2gRoot,
    MoRoot,
    OemRoot,
    ContractRoot,
}

/// Process-scoped, read-mostly trust anchors and revocation set (spec §5
/// "Resource policy": loaded once at startup and refreshed only on
/// explicit reload).
#[derive(Debug, Default)]
pub struct TrustStore {
    anchors: std::collections::HashMap<RootKindKey, Vec<Vec<u8>>>,
    revoked: HashSet<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RootKindKey(RootKind);

impl TrustStore {
    pub fn new() -> Self {
        TrustStore::default()
    }

    /// Load anchor sets and the revocation list from the standard
    /// per-role directory layout under `pki_path` (spec §6 "PKI on disk":
    /// filenames are implementation-defined, validation rules are not).
    ///
    /// Expected layout:
    /// `<pki_path>/{v2g_root,mo_root,oem_root,contract_root}/*.der`
    /// `<pki_path>/revoked/*.der`
    pub fn load_from_disk(pki_path: &Path) -> Result<Self> {
        let mut store = TrustStore::new();
        for (kind, dir) in [
            (RootKind::V2gRoot, "v2g_root"),
            (RootKind::MoRoot, "mo_root"),
            (RootKind::OemRoot, "oem_root"),
            (RootKind::ContractRoot, "contract_root"),
        ] {
            let path = pki_path.join(dir);
            if !path.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&path)
                .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?
            {
                let entry = entry.map_err(|e| Error::Config(format!("reading dir entry: {e}")))?;
                if entry.path().extension().and_then(|e| e.to_str()) == Some("der") {
                    let der = std::fs::read(entry.path())
                        .map_err(|e| Error::Config(format!("{}: {e}", entry.path().display())))?;
                    store.add_anchor(kind, der);
                }
            }
        }
        let revoked_dir = pki_path.join("revoked");
        if revoked_dir.is_dir() {
            for entry in std::fs::read_dir(&revoked_dir)
                .map_err(|e| Error::Config(format!("reading {}: {e}", revoked_dir.display())))?
            {
                let entry = entry.map_err(|e| Error::Config(format!("reading dir entry: {e}")))?;
                let der = std::fs::read(entry.path())
                    .map_err(|e| Error::Config(format!("{}: {e}", entry.path().display())))?;
                store.revoked.insert(der);
            }
        }
        Ok(store)
    }

    pub fn add_anchor(&mut self, kind: RootKind, der: Vec<u8>) {
        self.anchors.entry(RootKindKey(kind)).or_default().push(der);
    }

    /// The DER anchors registered for `kind`, e.g. for seeding a TLS
    /// [`rustls::RootCertStore`] from the same trust material chain
    /// validation uses (spec §4.7 "TLS identity").
    pub fn anchors(&self, kind: RootKind) -> &[Vec<u8>] {
        self.anchors.get(&RootKindKey(kind)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_trusted_root(&self, kind: RootKind, der: &[u8]) -> bool {
        self.anchors
            .get(&RootKindKey(kind))
            .map(|set| set.iter().any(|a| a.as_slice() == der))
            .unwrap_or(false)
    }

    /// `true` if `der` (a contract certificate) is in the local revocation
    /// set (spec §4.6 authorization policy: "not revoked per the local
    /// revocation set").
    pub fn is_revoked(&self, der: &[u8]) -> bool {
        self.revoked.contains(der)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_lookup_is_per_role() {
        let mut store = TrustStore::new();
        store.add_anchor(RootKind::V2gRoot, vec![1, 2, 3]);
        assert!(store.is_trusted_root(RootKind::V2gRoot, &[1, 2, 3]));
        assert!(!store.is_trusted_root(RootKind::MoRoot, &[1, 2, 3]));
    }

    #[test]
    fn revocation_set_is_checked_independently_of_anchors() {
        let mut store = TrustStore::new();
        store.revoked.insert(vec![9, 9]);
        assert!(store.is_revoked(&[9, 9]));
        assert!(!store.is_revoked(&[1, 2]));
    }
}
