use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MAIN_CHANNEL: &str = "main";

/// One outgoing edge of a source node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub node: String,
    pub channel: String,
    /// Output slot on the source node (outer array index on the wire).
    pub output: usize,
    /// Input index on the target node.
    pub port: usize,
}

impl ConnectionTarget {
    pub fn main(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            channel: MAIN_CHANNEL.to_string(),
            output: 0,
            port: 0,
        }
    }

    /// Edge identity: `(output, target, channel, port)` for a given source.
    fn same_edge(&self, other: &ConnectionTarget) -> bool {
        self.output == other.output
            && self.node == other.node
            && self.channel == other.channel
            && self.port == other.port
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub source: String,
    pub targets: Vec<ConnectionTarget>,
}

/// Directed edges keyed by source id.
///
/// Sources keep the order in which they were first added; targets keep the
/// order in which they were appended. No `(source, output, target, channel, port)`
/// tuple is ever stored twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMap {
    entries: Vec<SourceEntry>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.entries.iter().map(|e| e.targets.len()).sum()
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.source.as_str())
    }

    pub fn targets(&self, source: &str) -> &[ConnectionTarget] {
        self.entries
            .iter()
            .find(|e| e.source == source)
            .map(|e| e.targets.as_slice())
            .unwrap_or(&[])
    }

    /// Every edge as `(source, target)`, in map order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &ConnectionTarget)> {
        self.entries
            .iter()
            .flat_map(|e| e.targets.iter().map(move |t| (e.source.as_str(), t)))
    }

    /// Whether any edge (on any channel or port) runs from `source` to `target`.
    pub fn contains(&self, source: &str, target: &str) -> bool {
        self.targets(source).iter().any(|t| t.node == target)
    }

    pub fn has_outbound(&self, id: &str) -> bool {
        !self.targets(id).is_empty()
    }

    pub fn has_inbound(&self, id: &str) -> bool {
        self.edges().any(|(_, t)| t.node == id)
    }

    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        let mut preds: Vec<&str> = Vec::new();
        for (source, target) in self.edges() {
            if target.node == id && !preds.contains(&source) {
                preds.push(source);
            }
        }
        preds
    }

    /// The source entry added most recently.
    pub fn last_source(&self) -> Option<&str> {
        self.entries.last().map(|e| e.source.as_str())
    }

    /// Insert an edge. Returns `false` if the same edge already exists.
    pub fn insert(&mut self, source: &str, target: ConnectionTarget) -> bool {
        let entry = match self.entries.iter().position(|e| e.source == source) {
            Some(idx) => &mut self.entries[idx],
            None => {
                self.entries.push(SourceEntry {
                    source: source.to_string(),
                    targets: Vec::new(),
                });
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        };
        if entry.targets.iter().any(|t| t.same_edge(&target)) {
            return false;
        }
        entry.targets.push(target);
        true
    }

    /// Insert a `main` edge on output 0 / port 0.
    pub fn connect(&mut self, source: &str, target: &str) -> bool {
        self.insert(source, ConnectionTarget::main(target))
    }

    /// Remove every edge from `source` to `target`. Returns the number removed.
    pub fn remove_edge(&mut self, source: &str, target: &str) -> usize {
        let mut removed = 0;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.source == source) {
            let before = entry.targets.len();
            entry.targets.retain(|t| t.node != target);
            removed = before - entry.targets.len();
        }
        self.entries.retain(|e| !e.targets.is_empty());
        removed
    }

    /// Drop the node's outbound entry and every edge pointing at it.
    pub fn remove_node(&mut self, id: &str) {
        self.entries.retain(|e| e.source != id);
        for entry in &mut self.entries {
            entry.targets.retain(|t| t.node != id);
        }
        self.entries.retain(|e| !e.targets.is_empty());
    }
}

// ── Wire format ─────────────────────────────────────────────────
//
// { "<source>": { "<channel>": [ [ {"node", "type", "index"}, ... ], ... ] } }

#[derive(Serialize)]
struct WireTargetRef<'a> {
    node: &'a str,
    #[serde(rename = "type")]
    channel: &'a str,
    index: usize,
}

#[derive(Deserialize)]
struct WireTarget {
    node: String,
    #[serde(rename = "type", default)]
    channel: Option<String>,
    #[serde(default)]
    index: usize,
}

struct ChannelsRef<'a>(&'a [ConnectionTarget]);

impl Serialize for ChannelsRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut channels: Vec<(&str, Vec<Vec<WireTargetRef<'_>>>)> = Vec::new();
        for target in self.0 {
            let slot = match channels.iter().position(|(c, _)| *c == target.channel) {
                Some(slot) => slot,
                None => {
                    channels.push((target.channel.as_str(), Vec::new()));
                    channels.len() - 1
                }
            };
            let outputs = &mut channels[slot].1;
            if outputs.len() <= target.output {
                outputs.resize_with(target.output + 1, Vec::new);
            }
            outputs[target.output].push(WireTargetRef {
                node: &target.node,
                channel: &target.channel,
                index: target.port,
            });
        }
        let mut map = serializer.serialize_map(Some(channels.len()))?;
        for (channel, outputs) in &channels {
            map.serialize_entry(channel, outputs)?;
        }
        map.end()
    }
}

impl Serialize for ConnectionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.source, &ChannelsRef(&entry.targets))?;
        }
        map.end()
    }
}

/// Channels of one source, in document order.
struct WireChannels(Vec<(String, Vec<Option<Vec<WireTarget>>>)>);

impl<'de> Deserialize<'de> for WireChannels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChannelsVisitor;

        impl<'de> Visitor<'de> for ChannelsVisitor {
            type Value = WireChannels;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of channel name to output slots")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut channels = Vec::new();
                while let Some((channel, outputs)) =
                    access.next_entry::<String, Option<Vec<Option<Vec<WireTarget>>>>>()?
                {
                    channels.push((channel, outputs.unwrap_or_default()));
                }
                Ok(WireChannels(channels))
            }
        }

        deserializer.deserialize_map(ChannelsVisitor)
    }
}

impl<'de> Deserialize<'de> for ConnectionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ConnectionMapVisitor;

        impl<'de> Visitor<'de> for ConnectionMapVisitor {
            type Value = ConnectionMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of source node to channels")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = ConnectionMap::new();
                while let Some((source, channels)) = access.next_entry::<String, WireChannels>()? {
                    for (channel, outputs) in channels.0 {
                        for (output, slot) in outputs.into_iter().enumerate() {
                            for target in slot.unwrap_or_default() {
                                map.insert(
                                    &source,
                                    ConnectionTarget {
                                        node: target.node,
                                        channel: target.channel.unwrap_or_else(|| channel.clone()),
                                        output,
                                        port: target.index,
                                    },
                                );
                            }
                        }
                    }
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(ConnectionMapVisitor)
    }
}
