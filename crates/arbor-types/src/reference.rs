use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec;
use crate::error::TypeError;
use crate::id::NodeId;

/// Reference to the concept (type) of a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptReference(String);

impl ConceptReference {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn uid(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConceptReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConceptReference {
    fn from(uid: &str) -> Self {
        Self::new(uid)
    }
}

/// Globally unique, structured reference to a node.
///
/// Used both as the target of reference roles and as an alternate node-id
/// type for trees whose nodes are not numbered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeReference(String);

impl NodeReference {
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeReference {
    fn from(serialized: &str) -> Self {
        Self::new(serialized)
    }
}

/// Trie keys are the first eight bytes of the reference's SHA-256 digest.
impl NodeId for NodeReference {
    const ABSENT: &'static str = codec::NULL_ENCODING;

    fn serialize(&self) -> String {
        codec::escape(Some(&self.0))
    }

    fn deserialize(input: &str) -> Result<Self, TypeError> {
        codec::unescape(input)?
            .map(Self)
            .ok_or_else(|| TypeError::InvalidNodeId(input.to_owned()))
    }

    fn trie_key(&self) -> u64 {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head)
    }

    fn root_id(tree_id: &str) -> Self {
        Self(format!("{tree_id}/1"))
    }
}
