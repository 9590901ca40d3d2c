//! Source-location-aware configuration document
//!
//! The validator parses the configuration text twice from the same string:
//! once into a plain `serde_yaml` value tree (what gets validated), and once
//! into a marker-carrying node tree (where failures get mapped back to
//! lines). Keeping both derived from the identical text is what keeps line
//! numbers honest.

use anyhow::{anyhow, Result};
use marked_yaml::types::{MarkedScalarNode, Node};

/// A parsed configuration document that can resolve mapping paths to
/// 1-based source line numbers.
pub struct ConfigDocument {
    root: Node,
}

impl ConfigDocument {
    /// Parse `text` into a marker-carrying document tree.
    ///
    /// Syntax errors are fatal here; the underlying parser's message already
    /// carries line/column information.
    pub fn parse(text: &str) -> Result<Self> {
        let root = marked_yaml::parse_yaml(0, text)
            .map_err(|e| anyhow!("failed to parse YAML configuration: {e}"))?;
        Ok(Self { root })
    }

    /// Line of the node a mapping path points at.
    ///
    /// Walks mapping keys from the root. When a segment cannot be resolved,
    /// the deepest node reached so far supplies the line (the parent-node
    /// fallback for shape failures whose exact node is gone).
    pub fn line_of(&self, path: &[&str]) -> Option<usize> {
        let mut node = &self.root;
        let mut line = node_line(node);
        for segment in path {
            let Some(mapping) = node.as_mapping() else {
                return line;
            };
            let mut found = None;
            for (key, value) in mapping.iter() {
                if scalar_str(key) == *segment {
                    found = Some(value);
                    break;
                }
            }
            match found {
                Some(value) => {
                    node = value;
                    line = node_line(node).or(line);
                }
                None => return line,
            }
        }
        line
    }

    /// Line of the *key* scalar addressed by the last path segment.
    ///
    /// This is where diagnostics about an entry itself (unknown table,
    /// malformed event mapping) point, rather than at the entry's value.
    pub fn key_line_of(&self, path: &[&str]) -> Option<usize> {
        let (last, parents) = path.split_last()?;
        let mut node = &self.root;
        for segment in parents {
            node = node
                .as_mapping()?
                .iter()
                .find_map(|(key, value)| (scalar_str(key) == *segment).then_some(value))?;
        }
        let mapping = node.as_mapping()?;
        for (key, _) in mapping.iter() {
            if scalar_str(key) == *last {
                return key.span().start().map(|marker| marker.line());
            }
        }
        None
    }
}

// MarkedScalarNode derefs to str
fn scalar_str<'a>(node: &'a MarkedScalarNode) -> &'a str {
    node
}

fn node_line(node: &Node) -> Option<usize> {
    let span = match node {
        Node::Mapping(mapping) => mapping.span(),
        Node::Sequence(sequence) => sequence.span(),
        Node::Scalar(scalar) => scalar.span(),
    };
    span.start().map(|marker| marker.line())
}
