//! Structured cache keys.
//!
//! A [`CacheKey`] is an ordered tuple of primitive segments. Structural
//! equality addresses the same cache slot, and the derived lexicographic
//! ordering keeps every key sharing a prefix contiguous in an ordered map,
//! so prefix-scoped removal and invalidation are range scans rather than
//! string pattern matches.

use std::fmt;

/// A single key segment: a name or a numeric id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
  Text(String),
  Id(i64),
}

impl From<&str> for Segment {
  fn from(s: &str) -> Self {
    Segment::Text(s.to_string())
  }
}

impl From<String> for Segment {
  fn from(s: String) -> Self {
    Segment::Text(s)
  }
}

impl From<i64> for Segment {
  fn from(id: i64) -> Self {
    Segment::Id(id)
  }
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Segment::Text(s) => write!(f, "{}", s),
      Segment::Id(id) => write!(f, "{}", id),
    }
  }
}

/// An ordered tuple of segments identifying one cache slot.
///
/// Keys compare lexicographically segment by segment, so `["appointments"]`
/// sorts immediately before `["appointments", "user"]` and every key it
/// prefixes.
///
/// # Example
///
/// ```ignore
/// let user = CacheKey::new("user");
/// let user_appointments = CacheKey::new("appointments").join("user");
/// assert!(user_appointments.starts_with(&CacheKey::new("appointments")));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(Vec<Segment>);

impl CacheKey {
  /// Create a key with a single root segment.
  pub fn new(segment: impl Into<Segment>) -> Self {
    CacheKey(vec![segment.into()])
  }

  /// Extend the key with another segment.
  pub fn join(mut self, segment: impl Into<Segment>) -> Self {
    self.0.push(segment.into());
    self
  }

  /// The key's segments in order.
  pub fn segments(&self) -> &[Segment] {
    &self.0
  }

  /// Whether this key equals `prefix` or extends it.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, "/")?;
      }
      write!(f, "{}", segment)?;
    }
    Ok(())
  }
}

impl<S: Into<Segment>> FromIterator<S> for CacheKey {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    CacheKey(iter.into_iter().map(Into::into).collect())
  }
}
