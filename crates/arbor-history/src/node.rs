//! History index nodes and their serialization.

use std::collections::BTreeSet;

use arbor_store::{malformed, ErasedRef, ObjectData, ObjectKind, ObjectRef, StoreError, StoreResult};
use arbor_types::codec;
use chrono::{DateTime, Utc};

pub type HistoryRef<V> = ObjectRef<HistoryIndexNode<V>>;

/// Versions sharing one timestamp, truncated to seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryLeaf<V> {
    pub(crate) versions: Vec<ObjectRef<V>>,
    pub(crate) authors: BTreeSet<String>,
    pub(crate) time: i64,
}

impl<V> HistoryLeaf<V> {
    /// Versions in the order they were added.
    pub fn versions(&self) -> &[ObjectRef<V>] {
        &self.versions
    }

    pub fn time(&self) -> i64 {
        self.time
    }
}

/// Two subtrees covering disjoint, ordered time spans.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRange<V: ObjectData> {
    pub(crate) first: ObjectRef<V>,
    pub(crate) last: ObjectRef<V>,
    pub(crate) authors: BTreeSet<String>,
    pub(crate) size: u64,
    pub(crate) height: u64,
    pub(crate) min_time: i64,
    pub(crate) max_time: i64,
    pub(crate) child1: HistoryRef<V>,
    pub(crate) child2: HistoryRef<V>,
}

/// A node of the history index: a balanced binary tree over versions,
/// ordered by time.
///
/// Times are seconds since the Unix epoch. Every time in `child1` of a
/// range is strictly earlier than every time in `child2`, and versions with
/// the same second share a leaf, in the order they were added.
#[derive(Clone, Debug, PartialEq)]
pub enum HistoryIndexNode<V: ObjectData> {
    Leaf(HistoryLeaf<V>),
    Range(HistoryRange<V>),
}

impl<V: ObjectData> HistoryIndexNode<V> {
    /// Index of a single version.
    pub fn of(version: ObjectRef<V>, author: Option<&str>, time: DateTime<Utc>) -> Self {
        Self::Leaf(HistoryLeaf {
            versions: vec![version],
            authors: author.map(str::to_owned).into_iter().collect(),
            time: time.timestamp(),
        })
    }

    /// Number of versions below this node.
    pub fn size(&self) -> u64 {
        match self {
            Self::Leaf(leaf) => leaf.versions.len() as u64,
            Self::Range(range) => range.size,
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            Self::Leaf(_) => 1,
            Self::Range(range) => range.height,
        }
    }

    pub fn min_time(&self) -> i64 {
        match self {
            Self::Leaf(leaf) => leaf.time,
            Self::Range(range) => range.min_time,
        }
    }

    pub fn max_time(&self) -> i64 {
        match self {
            Self::Leaf(leaf) => leaf.time,
            Self::Range(range) => range.max_time,
        }
    }

    pub fn authors(&self) -> &BTreeSet<String> {
        match self {
            Self::Leaf(leaf) => &leaf.authors,
            Self::Range(range) => &range.authors,
        }
    }

    /// Oldest version.
    pub fn first(&self) -> &ObjectRef<V> {
        match self {
            Self::Leaf(leaf) => &leaf.versions[0],
            Self::Range(range) => &range.first,
        }
    }

    /// Newest version.
    pub fn last(&self) -> &ObjectRef<V> {
        match self {
            Self::Leaf(leaf) => &leaf.versions[leaf.versions.len() - 1],
            Self::Range(range) => &range.last,
        }
    }

    pub fn children(&self) -> Option<(&HistoryRef<V>, &HistoryRef<V>)> {
        match self {
            Self::Leaf(_) => None,
            Self::Range(range) => Some((&range.child1, &range.child2)),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }
}

fn authors_field(authors: &BTreeSet<String>) -> String {
    codec::join_list(authors.iter().map(|a| codec::escape(Some(a))), codec::LEVEL2)
}

fn parse_authors(field: &str) -> StoreResult<BTreeSet<String>> {
    codec::split_list(field, codec::LEVEL2)
        .into_iter()
        .map(|a| codec::unescape_required(a).map_err(StoreError::from))
        .collect()
}

fn parse_number<T: std::str::FromStr>(field: &str, what: &str) -> StoreResult<T> {
    field
        .parse()
        .map_err(|_| malformed(ObjectKind::HistoryIndex, format!("invalid {what} {field:?}")))
}

fn parse_pair<'a>(field: &'a str, what: &str) -> StoreResult<(&'a str, &'a str)> {
    field
        .split_once(codec::LEVEL4)
        .ok_or_else(|| malformed(ObjectKind::HistoryIndex, format!("invalid {what} {field:?}")))
}

/// Leaf: `L/versionHash,.../author,.../time`.
/// Range: `R/firstHash:lastHash/author,.../size/height/minTime:maxTime/child1/child2`.
impl<V: ObjectData> ObjectData for HistoryIndexNode<V> {
    const KIND: ObjectKind = ObjectKind::HistoryIndex;

    fn serialize(&self) -> String {
        match self {
            Self::Leaf(leaf) => format!(
                "L{s}{}{s}{}{s}{}",
                codec::join_list(leaf.versions.iter().map(|v| v.hash().to_string()), codec::LEVEL2),
                authors_field(&leaf.authors),
                leaf.time,
                s = codec::LEVEL1,
            ),
            Self::Range(range) => format!(
                "R{s}{}{p}{}{s}{}{s}{}{s}{}{s}{}{p}{}{s}{}{s}{}",
                range.first.hash(),
                range.last.hash(),
                authors_field(&range.authors),
                range.size,
                range.height,
                range.min_time,
                range.max_time,
                range.child1.hash(),
                range.child2.hash(),
                s = codec::LEVEL1,
                p = codec::LEVEL4,
            ),
        }
    }

    fn deserialize(input: &str) -> StoreResult<Self> {
        let fields: Vec<&str> = input.split(codec::LEVEL1).collect();
        match fields.first().copied() {
            Some("L") if fields.len() == 4 => {
                let versions = codec::split_list(fields[1], codec::LEVEL2)
                    .into_iter()
                    .map(ObjectRef::parse)
                    .collect::<StoreResult<Vec<_>>>()?;
                if versions.is_empty() {
                    return Err(malformed(Self::KIND, "leaf without versions"));
                }
                Ok(Self::Leaf(HistoryLeaf {
                    versions,
                    authors: parse_authors(fields[2])?,
                    time: parse_number(fields[3], "time")?,
                }))
            }
            Some("R") if fields.len() == 8 => {
                let (first, last) = parse_pair(fields[1], "version pair")?;
                let (min_time, max_time) = parse_pair(fields[5], "time span")?;
                let range = HistoryRange {
                    first: ObjectRef::parse(first)?,
                    last: ObjectRef::parse(last)?,
                    authors: parse_authors(fields[2])?,
                    size: parse_number(fields[3], "size")?,
                    height: parse_number(fields[4], "height")?,
                    min_time: parse_number(min_time, "time")?,
                    max_time: parse_number(max_time, "time")?,
                    child1: ObjectRef::parse(fields[6])?,
                    child2: ObjectRef::parse(fields[7])?,
                };
                if range.child1.hash() == range.child2.hash() {
                    return Err(malformed(Self::KIND, "range with identical children"));
                }
                if range.min_time >= range.max_time || range.height < 2 || range.size < 2 {
                    return Err(malformed(
                        Self::KIND,
                        format!(
                            "inconsistent range: size {} height {} time {}..{}",
                            range.size, range.height, range.min_time, range.max_time
                        ),
                    ));
                }
                Ok(Self::Range(range))
            }
            _ => Err(malformed(Self::KIND, format!("unrecognized node {input:?}"))),
        }
    }

    /// Subranges only; versions are referenced, not owned.
    fn containment_refs(&self) -> Vec<ErasedRef> {
        match self {
            Self::Leaf(_) => Vec::new(),
            Self::Range(range) => vec![range.child1.erase(), range.child2.erase()],
        }
    }
}
