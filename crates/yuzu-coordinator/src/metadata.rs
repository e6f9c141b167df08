//! Cluster metadata registry with fingerprint reconciliation.
//!
//! Each node keeps the schema registry as named entries with
//! `(version, fingerprint, encoding_version)` headers. The broadcast
//! channel carries only the top-level header; a receiver whose fingerprint
//! differs pulls the full registry and reconciles entry-by-entry with a
//! total order, so every node converges regardless of delivery order.
//! Deletions are tombstones (`fingerprint = 0, encoding_version = 0`).

use crate::types::{GlobalMetadata, MetadataEntry, MetadataHeader};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use yuzu_intern::fnv1a_64;

/// Total order for conflicting entries: higher wins.
fn entry_precedence(entry: &MetadataEntry) -> (u32, u64, u64) {
    (entry.encoding_version, entry.fingerprint, entry.version)
}

struct RegistryState {
    entries: BTreeMap<String, MetadataEntry>,
    version: u64,
    fingerprint: u64,
}

impl RegistryState {
    fn recompute_fingerprint(&self) -> u64 {
        // Stable across nodes: entries are iterated in name order.
        let mut bytes = Vec::new();
        for entry in self.entries.values() {
            bytes.extend_from_slice(entry.name.as_bytes());
            bytes.extend_from_slice(&entry.version.to_le_bytes());
            bytes.extend_from_slice(&entry.fingerprint.to_le_bytes());
            bytes.extend_from_slice(&entry.encoding_version.to_le_bytes());
        }
        fnv1a_64(&bytes)
    }
}

/// Versioned metadata registry for one node.
pub struct MetadataRegistry {
    state: RwLock<RegistryState>,
    encoding_version: u32,
}

impl MetadataRegistry {
    pub fn new(encoding_version: u32) -> Self {
        assert!(encoding_version > 0, "encoding version 0 marks tombstones");
        Self {
            state: RwLock::new(RegistryState {
                entries: BTreeMap::new(),
                version: 0,
                fingerprint: 0,
            }),
            encoding_version,
        }
    }

    /// Install or replace a named entry from a local change.
    pub fn upsert(&self, name: &str, payload: Vec<u8>) -> MetadataHeader {
        let mut state = self.state.write();
        let version = state.entries.get(name).map_or(1, |e| e.version + 1);
        let entry = MetadataEntry {
            name: name.to_string(),
            version,
            fingerprint: fnv1a_64(&payload),
            encoding_version: self.encoding_version,
            payload,
        };
        state.entries.insert(name.to_string(), entry);
        bump(&mut state)
    }

    /// Delete a named entry, leaving a tombstone for reconciliation.
    pub fn remove(&self, name: &str) -> MetadataHeader {
        let mut state = self.state.write();
        let version = state.entries.get(name).map_or(1, |e| e.version + 1);
        state.entries.insert(
            name.to_string(),
            MetadataEntry {
                name: name.to_string(),
                version,
                fingerprint: 0,
                encoding_version: 0,
                payload: Vec::new(),
            },
        );
        bump(&mut state)
    }

    pub fn header(&self) -> MetadataHeader {
        let state = self.state.read();
        MetadataHeader {
            version: state.version,
            fingerprint: state.fingerprint,
        }
    }

    /// Whether a broadcast header warrants a full pull.
    pub fn needs_pull(&self, header: &MetadataHeader) -> bool {
        self.state.read().fingerprint != header.fingerprint
    }

    pub fn get(&self, name: &str) -> Option<MetadataEntry> {
        self.state
            .read()
            .entries
            .get(name)
            .filter(|e| !e.is_tombstone())
            .cloned()
    }

    pub fn snapshot(&self) -> GlobalMetadata {
        let state = self.state.read();
        GlobalMetadata {
            header: MetadataHeader {
                version: state.version,
                fingerprint: state.fingerprint,
            },
            entries: state.entries.values().cloned().collect(),
        }
    }

    /// Merge a peer's registry. The top-level version bumps iff the
    /// post-reconcile fingerprint differs from the pre-reconcile one.
    /// Returns whether anything changed.
    pub fn reconcile(&self, incoming: &GlobalMetadata) -> bool {
        let mut state = self.state.write();
        let before = state.fingerprint;
        // Versions only move forward across the cluster.
        state.version = state.version.max(incoming.header.version);
        for entry in &incoming.entries {
            let adopt = match state.entries.get(&entry.name) {
                None => true,
                Some(existing) => entry_precedence(entry) > entry_precedence(existing),
            };
            if adopt {
                tracing::debug!(
                    entry = %entry.name,
                    version = entry.version,
                    tombstone = entry.is_tombstone(),
                    "adopting metadata entry"
                );
                state.entries.insert(entry.name.clone(), entry.clone());
            }
        }
        let after = state.recompute_fingerprint();
        if after != before {
            state.fingerprint = after;
            state.version += 1;
            true
        } else {
            false
        }
    }
}

/// Receiver side of the metadata channel: compare the broadcast header
/// against the local registry, pull the sender's full registry when the
/// fingerprints differ, reconcile, and re-broadcast when the merge
/// produced something new. Returns whether local state changed.
pub async fn handle_metadata_broadcast(
    client: &crate::client::PartitionClient,
    registry: &MetadataRegistry,
    sender: &crate::types::PartitionTarget,
    peers: &[crate::types::PartitionTarget],
    header: MetadataHeader,
) -> Result<bool, crate::types::RpcError> {
    if !registry.needs_pull(&header) {
        return Ok(false);
    }
    let incoming = client.get_global_metadata(sender).await?;
    let changed = registry.reconcile(&incoming);
    if changed {
        client.broadcast_metadata(peers, registry.header()).await?;
    }
    Ok(changed)
}

fn bump(state: &mut RegistryState) -> MetadataHeader {
    state.fingerprint = state.recompute_fingerprint();
    state.version += 1;
    MetadataHeader {
        version: state.version,
        fingerprint: state.fingerprint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get() {
        let registry = MetadataRegistry::new(1);
        registry.upsert("idx", b"schema-a".to_vec());
        let entry = registry.get("idx").unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.fingerprint, fnv1a_64(b"schema-a"));

        registry.upsert("idx", b"schema-b".to_vec());
        assert_eq!(registry.get("idx").unwrap().version, 2);
    }

    #[test]
    fn test_tombstone_hides_entry() {
        let registry = MetadataRegistry::new(1);
        registry.upsert("idx", b"schema".to_vec());
        registry.remove("idx");
        assert!(registry.get("idx").is_none());
        // The tombstone still travels in snapshots.
        assert_eq!(registry.snapshot().entries.len(), 1);
        assert!(registry.snapshot().entries[0].is_tombstone());
    }

    #[test]
    fn test_needs_pull_on_differing_fingerprint() {
        let a = MetadataRegistry::new(1);
        let b = MetadataRegistry::new(1);
        assert!(!b.needs_pull(&a.header()));
        a.upsert("idx", b"schema".to_vec());
        assert!(b.needs_pull(&a.header()));
    }

    #[test]
    fn test_reconcile_converges_both_directions() {
        let a = MetadataRegistry::new(1);
        let b = MetadataRegistry::new(1);
        a.upsert("one", b"1".to_vec());
        b.upsert("two", b"2".to_vec());

        assert!(a.reconcile(&b.snapshot()));
        assert!(b.reconcile(&a.snapshot()));
        assert_eq!(a.header().fingerprint, b.header().fingerprint);
        assert!(a.get("two").is_some());
        assert!(b.get("one").is_some());

        // Already converged: no content change, so no bump past the
        // version adopted from the peer.
        assert!(!a.reconcile(&b.snapshot()));
        let version = a.header().version;
        assert!(!a.reconcile(&b.snapshot()));
        assert_eq!(a.header().version, version);
    }

    #[test]
    fn test_reconcile_precedence_order() {
        let a = MetadataRegistry::new(1);
        a.upsert("idx", b"old".to_vec());

        // Higher encoding version wins regardless of fingerprint/version.
        let newer_encoding = GlobalMetadata {
            header: MetadataHeader { version: 1, fingerprint: 1 },
            entries: vec![MetadataEntry {
                name: "idx".to_string(),
                version: 1,
                fingerprint: 1,
                encoding_version: 2,
                payload: b"new".to_vec(),
            }],
        };
        assert!(a.reconcile(&newer_encoding));
        assert_eq!(a.get("idx").unwrap().payload, b"new".to_vec());

        // A lower-precedence entry does not claw back.
        let stale = GlobalMetadata {
            header: MetadataHeader { version: 1, fingerprint: 2 },
            entries: vec![MetadataEntry {
                name: "idx".to_string(),
                version: 99,
                fingerprint: u64::MAX,
                encoding_version: 1,
                payload: b"stale".to_vec(),
            }],
        };
        assert!(!a.reconcile(&stale));
        assert_eq!(a.get("idx").unwrap().payload, b"new".to_vec());
    }

    #[tokio::test]
    async fn test_broadcast_pull_reconcile_flow() {
        use crate::client::PartitionClient;
        use crate::transport::InMemoryTransport;
        use crate::types::PartitionTarget;
        use std::sync::Arc;

        let sender_registry = MetadataRegistry::new(1);
        sender_registry.upsert("idx", b"schema".to_vec());

        let transport = Arc::new(InMemoryTransport::new());
        let sender = PartitionTarget {
            partition: "p0".to_string(),
            address: "mem://p0".to_string(),
        };
        transport.set_metadata("p0", sender_registry.snapshot());
        let client = PartitionClient::new(transport.clone());

        let local = MetadataRegistry::new(1);
        let changed =
            handle_metadata_broadcast(&client, &local, &sender, &[], sender_registry.header())
                .await
                .unwrap();
        assert!(changed);
        assert!(local.get("idx").is_some());
        // The merge produced a new header, which was re-broadcast.
        assert_eq!(transport.broadcast_headers().len(), 1);

        // Same header again: fingerprints match, nothing pulled.
        let changed =
            handle_metadata_broadcast(&client, &local, &sender, &[], local.header())
                .await
                .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_tombstone_reconciles_as_lowest_precedence() {
        let a = MetadataRegistry::new(1);
        let b = MetadataRegistry::new(1);
        a.upsert("idx", b"schema".to_vec());
        b.reconcile(&a.snapshot());

        // A deletion on `a` has encoding 0: it only wins where no live
        // entry with a higher precedence exists, which is exactly the
        // tombstone-vs-nothing case.
        a.remove("idx");
        b.reconcile(&a.snapshot());
        // The live entry on `b` outranks the tombstone by encoding
        // version, so `b` keeps it.
        assert!(b.get("idx").is_some());
    }
}
