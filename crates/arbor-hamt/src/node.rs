use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_store::{malformed, ErasedRef, ObjectData, ObjectKind, ObjectRef, StoreResult};
use arbor_types::codec::{self, LEVEL1, LEVEL2};
use arbor_types::NodeId;

/// Key bits consumed per trie level.
pub const BITS_PER_LEVEL: u32 = 5;
/// Fan-out of an internal node.
pub const ENTRIES_PER_LEVEL: usize = 1 << BITS_PER_LEVEL;
/// Levels needed to consume a 64-bit key.
pub const MAX_LEVELS: u32 = 64_u32.div_ceil(BITS_PER_LEVEL);
/// Shift of the deepest level.
pub(crate) const MAX_SHIFT: u32 = (MAX_LEVELS - 1) * BITS_PER_LEVEL;

const LEVEL_MASK: u64 = (1 << BITS_PER_LEVEL) - 1;

/// Slot of `key` at the level starting `shift` bits from the top.
///
/// The last level only has four real bits; they are left-aligned.
pub(crate) fn level_index(key: u64, shift: u32) -> usize {
    let s = 64 - BITS_PER_LEVEL as i32 - shift as i32;
    let bits = if s >= 0 { key >> s } else { key << -s };
    (bits & LEVEL_MASK) as usize
}

/// Slots of `levels` consecutive levels starting at `shift`, packed.
pub(crate) fn path_bits(key: u64, shift: u32, levels: u32) -> u64 {
    (0..levels).fold(0, |acc, i| {
        (acc << BITS_PER_LEVEL) | level_index(key, shift + i * BITS_PER_LEVEL) as u64
    })
}

pub(crate) fn level_mask(levels: u32) -> u64 {
    let width = levels * BITS_PER_LEVEL;
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

/// A trie node. See the crate docs for the shape invariants.
#[derive(Clone, Debug, PartialEq)]
pub enum HamtNode<K: NodeId, V: ObjectData> {
    Leaf(HamtLeaf<K, V>),
    Internal(HamtInternal<K, V>),
    Single(HamtSingle<K, V>),
}

pub type HamtRef<K, V> = ObjectRef<HamtNode<K, V>>;

#[derive(Clone, Debug, PartialEq)]
pub struct HamtLeaf<K: NodeId, V: ObjectData> {
    pub key: K,
    pub value: ObjectRef<V>,
}

/// Sparse 32-way branch: bit `i` of `bitmap` is set iff slot `i` is occupied,
/// and `children` holds the occupied slots in ascending order.
#[derive(Clone, Debug, PartialEq)]
pub struct HamtInternal<K: NodeId, V: ObjectData> {
    pub bitmap: u32,
    pub children: Arc<[HamtRef<K, V>]>,
}

/// `num_levels` levels whose slots are all fixed to `bits` (packed five bits
/// per level, first level in the most significant position), followed by
/// `child`.
#[derive(Clone, Debug, PartialEq)]
pub struct HamtSingle<K: NodeId, V: ObjectData> {
    pub num_levels: u32,
    pub bits: u64,
    pub child: HamtRef<K, V>,
}

impl<K: NodeId, V: ObjectData> HamtInternal<K, V> {
    /// The empty trie.
    pub fn empty() -> Self {
        Self {
            bitmap: 0,
            children: Arc::from(Vec::new()),
        }
    }

    pub fn from_slots(slots: BTreeMap<usize, HamtRef<K, V>>) -> Self {
        let bitmap = slots.keys().fold(0u32, |bitmap, slot| bitmap | (1 << slot));
        Self {
            bitmap,
            children: slots.into_values().collect::<Vec<_>>().into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    pub fn child(&self, slot: usize) -> Option<&HamtRef<K, V>> {
        let bit = 1u32 << slot;
        if self.bitmap & bit == 0 {
            return None;
        }
        self.children.get((self.bitmap & (bit - 1)).count_ones() as usize)
    }

    /// Occupied slots with their children, ascending.
    pub fn slots(&self) -> impl Iterator<Item = (usize, &HamtRef<K, V>)> + '_ {
        (0..ENTRIES_PER_LEVEL)
            .filter(move |slot| self.bitmap & (1 << slot) != 0)
            .zip(self.children.iter())
    }

    pub fn slot_map(&self) -> BTreeMap<usize, HamtRef<K, V>> {
        self.slots().map(|(slot, child)| (slot, child.clone())).collect()
    }
}

impl<K: NodeId, V: ObjectData> HamtSingle<K, V> {
    /// Whether `key` follows this run's path when the run starts at `shift`.
    pub fn matches(&self, key: &K, shift: u32) -> bool {
        path_bits(key.trie_key(), shift, self.num_levels) == self.bits
    }

    /// Equivalent one-level internal node whose only child covers the
    /// remaining levels. The result is not canonical on its own; it is an
    /// intermediate for splitting and diffing.
    pub fn expand(&self) -> HamtInternal<K, V> {
        let rest_levels = self.num_levels - 1;
        let top = (self.bits >> (rest_levels * BITS_PER_LEVEL)) as usize & (ENTRIES_PER_LEVEL - 1);
        let rest = if rest_levels == 0 {
            self.child.clone()
        } else {
            ObjectRef::new(HamtNode::Single(HamtSingle {
                num_levels: rest_levels,
                bits: self.bits & level_mask(rest_levels),
                child: self.child.clone(),
            }))
        };
        HamtInternal {
            bitmap: 1 << top,
            children: Arc::from(vec![rest]),
        }
    }
}

impl<K: NodeId, V: ObjectData> HamtNode<K, V> {
    pub fn empty() -> Self {
        Self::Internal(HamtInternal::empty())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Internal(n) if n.is_empty())
    }

    /// Prepend `slot` at `shift - 5` to this node, as a parent with a single
    /// child would collapse to.
    pub(crate) fn under_slot(this: &HamtRef<K, V>, node: &Self, slot: usize) -> HamtRef<K, V> {
        match node {
            Self::Leaf(_) => this.clone(),
            Self::Single(single) => ObjectRef::new(Self::Single(HamtSingle {
                num_levels: single.num_levels + 1,
                bits: ((slot as u64) << (single.num_levels * BITS_PER_LEVEL)) | single.bits,
                child: single.child.clone(),
            })),
            Self::Internal(_) => ObjectRef::new(Self::Single(HamtSingle {
                num_levels: 1,
                bits: slot as u64,
                child: this.clone(),
            })),
        }
    }
}

impl<K: NodeId, V: ObjectData> ObjectData for HamtNode<K, V> {
    const KIND: ObjectKind = ObjectKind::HamtNode;

    fn serialize(&self) -> String {
        match self {
            Self::Leaf(leaf) => {
                format!("L{LEVEL1}{}{LEVEL1}{}", leaf.key.serialize(), leaf.value.hash())
            }
            Self::Internal(internal) => {
                let children: Vec<String> =
                    internal.children.iter().map(|c| c.hash().to_string()).collect();
                let children = codec::join_list(children, LEVEL2);
                format!("I{LEVEL1}{:x}{LEVEL1}{children}", internal.bitmap)
            }
            Self::Single(single) => format!(
                "S{LEVEL1}{}{LEVEL1}{:x}{LEVEL1}{}",
                single.num_levels,
                single.bits,
                single.child.hash()
            ),
        }
    }

    fn deserialize(input: &str) -> StoreResult<Self> {
        let fields: Vec<&str> = input.split(LEVEL1).collect();
        match fields.as_slice() {
            ["L", key, value] => Ok(Self::Leaf(HamtLeaf {
                key: K::deserialize(key)?,
                value: ObjectRef::parse(value)?,
            })),
            ["I", bitmap, children] => {
                let bitmap = u32::from_str_radix(bitmap, 16)
                    .map_err(|e| malformed(Self::KIND, format!("bad bitmap {bitmap:?}: {e}")))?;
                let children = codec::split_list(children, LEVEL2)
                    .into_iter()
                    .map(ObjectRef::parse)
                    .collect::<StoreResult<Vec<HamtRef<K, V>>>>()?;
                if bitmap.count_ones() as usize != children.len() {
                    return Err(malformed(
                        Self::KIND,
                        format!("bitmap {bitmap:x} does not match {} children", children.len()),
                    ));
                }
                Ok(Self::Internal(HamtInternal {
                    bitmap,
                    children: children.into(),
                }))
            }
            ["S", levels, bits, child] => {
                let num_levels: u32 = levels
                    .parse()
                    .map_err(|e| {
                        malformed(Self::KIND, format!("bad level count {levels:?}: {e}"))
                    })?;
                if !(1..=MAX_LEVELS).contains(&num_levels) {
                    return Err(malformed(
                        Self::KIND,
                        format!("level count {num_levels} out of range"),
                    ));
                }
                let bits = u64::from_str_radix(bits, 16)
                    .map_err(|e| malformed(Self::KIND, format!("bad path bits {bits:?}: {e}")))?;
                Ok(Self::Single(HamtSingle {
                    num_levels,
                    bits,
                    child: ObjectRef::parse(child)?,
                }))
            }
            _ => Err(malformed(Self::KIND, format!("unrecognized trie node {input:?}"))),
        }
    }

    fn containment_refs(&self) -> Vec<ErasedRef> {
        match self {
            Self::Leaf(leaf) => vec![leaf.value.erase()],
            Self::Internal(internal) => internal.children.iter().map(ObjectRef::erase).collect(),
            Self::Single(single) => vec![single.child.erase()],
        }
    }
}
