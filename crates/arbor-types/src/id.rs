use std::fmt;
use std::hash::Hash;

use crate::codec;
use crate::error::TypeError;

/// Id of the root node in trees keyed by `u64`.
pub const ROOT_ID: u64 = 1;

/// Capabilities a node-id type must provide.
///
/// Trees, tries and operation logs are generic over the id type. An id must
/// be totally ordered, hashable, have a separator-free textual form, and map
/// to the 64-bit key the trie branches on.
pub trait NodeId: Clone + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static {
    /// Textual form of an absent id (a root's parent).
    const ABSENT: &'static str;

    /// Separator-free textual form.
    fn serialize(&self) -> String;

    /// Inverse of [`NodeId::serialize`].
    fn deserialize(input: &str) -> Result<Self, TypeError>;

    /// The 64 bits the trie branches on.
    ///
    /// Must be injective over the ids stored in one trie; two distinct ids
    /// with the same key are reported as a collision when inserted.
    fn trie_key(&self) -> u64;

    /// Id of the root node of tree `tree_id`.
    fn root_id(tree_id: &str) -> Self;

    /// Whether the id can name a node. An id written as [`NodeId::ABSENT`]
    /// would read back as "no id".
    fn is_valid(&self) -> bool {
        self.serialize() != Self::ABSENT
    }

    fn serialize_optional(id: Option<&Self>) -> String {
        id.map_or_else(|| Self::ABSENT.to_owned(), Self::serialize)
    }

    fn deserialize_optional(input: &str) -> Result<Option<Self>, TypeError> {
        if input == Self::ABSENT {
            Ok(None)
        } else {
            Self::deserialize(input).map(Some)
        }
    }
}

/// Plain 64-bit ids, written as lowercase hex. Id `0` is reserved for "no
/// parent".
impl NodeId for u64 {
    const ABSENT: &'static str = "0";

    fn serialize(&self) -> String {
        codec::format_hex(*self)
    }

    fn deserialize(input: &str) -> Result<Self, TypeError> {
        codec::parse_hex(input)
    }

    fn trie_key(&self) -> u64 {
        *self
    }

    fn root_id(_tree_id: &str) -> Self {
        ROOT_ID
    }
}
