use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A dotted sequence of reference-field hops ending in a leaf field,
/// e.g. `alliance.owner.mobile`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Path(Vec<String>);

impl Path {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .map(str::trim)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of reference hops before the leaf.
    pub fn hop_count(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    pub fn is_direct(&self) -> bool {
        self.0.len() == 1
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The hop segments, i.e. the path without its leaf.
    pub fn prefix(&self) -> Option<Path> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Path(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The path relative to the entity reached by the first hop.
    pub fn tail(&self) -> Option<Path> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Path(self.0[1..].to_vec()))
    }

    /// Every proper prefix, shortest first: `a.b.c` yields `a` and `a.b`.
    pub fn hop_prefixes(&self) -> Vec<Path> {
        (1..self.0.len())
            .map(|len| Path(self.0[..len].to_vec()))
            .collect()
    }

    pub fn child(&self, segment: impl Into<String>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    pub fn flatten(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flatten())
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Path::parse(value)
    }
}

impl From<String> for Path {
    fn from(value: String) -> Self {
        Path::parse(&value)
    }
}

impl Serialize for Path {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.flatten())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Path::parse(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::Path;

    #[test]
    fn parses_and_flattens() {
        let path = Path::parse("alliance.owner.mobile");
        assert_eq!(path.len(), 3);
        assert_eq!(path.hop_count(), 2);
        assert_eq!(path.first(), Some("alliance"));
        assert_eq!(path.leaf(), Some("mobile"));
        assert_eq!(path.flatten(), "alliance.owner.mobile");
        assert_eq!(Path::parse(" a..b "), Path::new(["a", "b"]));
    }

    #[test]
    fn prefixes_and_tails() {
        let path = Path::parse("a.b.c");
        assert_eq!(path.prefix(), Some(Path::parse("a.b")));
        assert_eq!(path.tail(), Some(Path::parse("b.c")));
        assert_eq!(
            path.hop_prefixes(),
            vec![Path::parse("a"), Path::parse("a.b")]
        );
        assert!(path.starts_with(&Path::parse("a.b")));
        assert!(!path.starts_with(&Path::parse("b")));
        assert_eq!(Path::field("a").prefix(), None);
    }

    #[test]
    fn serializes_as_dotted_string() {
        let encoded = serde_json::to_string(&Path::parse("parent.name")).expect("encode");
        assert_eq!(encoded, "\"parent.name\"");
    }
}
