//! Core ID types for the scene graph.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a scene-graph node.
///
/// NodeIds are assigned by the graph owner and stay stable for the node's
/// lifetime. Most ids are [`NodeSymbol`] encodings, but any `u64` is valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create a new NodeId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// View this id as a symbol (category + index).
    pub fn symbol(self) -> NodeSymbol {
        NodeSymbol(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

const CATEGORY_BITS: u32 = 8;
const INDEX_BITS: u32 = u64::BITS - CATEGORY_BITS;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Structured 64-bit key: an ASCII category in the high byte and a 56-bit
/// category id (index) in the remaining bits.
///
/// Agent keyframes carry their frame number as the category id, which is
/// what the external frame-registration service expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeSymbol(u64);

impl NodeSymbol {
    pub fn new(category: char, index: u64) -> Self {
        let category = u64::from(u8::try_from(category).unwrap_or(b'?'));
        Self((category << INDEX_BITS) | (index & INDEX_MASK))
    }

    pub fn from_key(key: u64) -> Self {
        Self(key)
    }

    pub fn key(self) -> u64 {
        self.0
    }

    pub fn category(self) -> char {
        char::from((self.0 >> INDEX_BITS) as u8)
    }

    pub fn category_id(self) -> u64 {
        self.0 & INDEX_MASK
    }

    /// Human-readable label, e.g. `a(12)`.
    pub fn label(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NodeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.category(), self.category_id())
    }
}

impl From<NodeSymbol> for NodeId {
    fn from(symbol: NodeSymbol) -> Self {
        NodeId(symbol.0)
    }
}

/// Graph layers, ordered bottom-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerId {
    Objects,
    Agents,
    Places,
    Rooms,
    Buildings,
}

impl LayerId {
    pub const ALL: [LayerId; 5] = [
        LayerId::Objects,
        LayerId::Agents,
        LayerId::Places,
        LayerId::Rooms,
        LayerId::Buildings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayerId::Objects => "objects",
            LayerId::Agents => "agents",
            LayerId::Places => "places",
            LayerId::Rooms => "rooms",
            LayerId::Buildings => "buildings",
        }
    }

    /// Agent nodes are time-indexed; all other layers hold static nodes.
    pub fn is_dynamic(self) -> bool {
        matches!(self, LayerId::Agents)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
