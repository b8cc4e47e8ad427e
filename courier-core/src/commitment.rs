use once_cell::sync::Lazy;
use primitive_types::H256;
use sha3::{Digest, Keccak256};

/// Depth of the commitment tree. Bounds a bundle at 2^32 leaves, far above
/// any practical `MAX_BUNDLE_MESSAGES`.
pub const TREE_DEPTH: usize = 32;

pub(crate) fn hash(preimage: impl AsRef<[u8]>) -> H256 {
    H256::from_slice(Keccak256::digest(preimage.as_ref()).as_slice())
}

pub(crate) fn hash_concat(left: impl AsRef<[u8]>, right: impl AsRef<[u8]>) -> H256 {
    H256::from_slice(
        Keccak256::new()
            .chain_update(left.as_ref())
            .chain_update(right.as_ref())
            .finalize()
            .as_slice(),
    )
}

/// Zero hashes to act as synthetic right subtrees of a sparsely-filled tree.
pub static ZERO_HASHES: Lazy<[H256; TREE_DEPTH + 1]> = Lazy::new(|| {
    let mut hashes = [H256::zero(); TREE_DEPTH + 1];
    for i in 0..TREE_DEPTH {
        hashes[i + 1] = hash_concat(hashes[i], hashes[i]);
    }
    hashes
});

/// An incremental keccak-256 merkle tree, modeled on the eth2 deposit
/// contract. Ingestion order determines the root, which is exactly the
/// property bundle commitments rely on.
#[derive(Debug, Clone, Copy)]
pub struct IncrementalMerkle {
    branch: [H256; TREE_DEPTH],
    count: usize,
}

impl Default for IncrementalMerkle {
    fn default() -> Self {
        let mut branch: [H256; TREE_DEPTH] = Default::default();
        branch
            .iter_mut()
            .enumerate()
            .for_each(|(i, elem)| *elem = ZERO_HASHES[i]);
        Self { branch, count: 0 }
    }
}

impl IncrementalMerkle {
    /// Ingest a leaf into the tree.
    pub fn ingest(&mut self, element: H256) {
        let mut node = element;
        assert!(self.count < u32::MAX as usize);
        self.count += 1;
        let mut size = self.count;
        for i in 0..TREE_DEPTH {
            if (size & 1) == 1 {
                self.branch[i] = node;
                return;
            }
            node = hash_concat(self.branch[i], node);
            size /= 2;
        }
        unreachable!()
    }

    /// Calculate the current tree root.
    pub fn root(&self) -> H256 {
        let mut node: H256 = Default::default();
        let mut size = self.count;

        self.branch.iter().enumerate().for_each(|(i, elem)| {
            node = if (size & 1) == 1 {
                hash_concat(elem, node)
            } else {
                hash_concat(node, ZERO_HASHES[i])
            };
            size /= 2;
        });

        node
    }

    /// Get the number of ingested leaves.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Compute the commitment over an ordered sequence of leaves.
///
/// Deterministic: the same leaves in the same order always produce the same
/// root. This is the value submitted to the hub's commitment-recording entry
/// point and recomputed on-chain during proving.
pub fn bundle_commitment(leaves: &[H256]) -> H256 {
    let mut tree = IncrementalMerkle::default();
    for &leaf in leaves {
        tree.ingest(leaf);
    }
    tree.root()
}
