use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one proxy instance.
///
/// Every record emitted by the same proxy carries the same id, which is how a
/// reader de-multiplexes interleaved lines from concurrently open streams.
/// Ids are issued from a process-wide counter and are never reused within a
/// process. Zero is reserved for "unknown" (e.g. a line whose id failed to
/// parse).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Issue a fresh id.
    pub fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }
}

impl Deref for InstanceId {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InstanceId {
    #[inline]
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl From<InstanceId> for u64 {
    #[inline]
    fn from(val: InstanceId) -> Self {
        val.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_next_is_unique_and_increasing() {
        let a = InstanceId::next();
        let b = InstanceId::next();
        assert!(b > a);
        assert!(!a.is_unknown());
    }

    #[test]
    fn test_next_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..100).map(|_| InstanceId::next()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 400);
    }

    #[test]
    fn test_display_debug() {
        let id = InstanceId(7);
        assert_eq!(format!("{}", id), "7");
        assert_eq!(format!("{:?}", id), "InstanceId(7)");
        assert_eq!(*id, 7);
    }

    #[test]
    fn test_default_is_unknown() {
        assert!(InstanceId::default().is_unknown());
    }

    #[test]
    fn test_serde_transparent() {
        let id = InstanceId(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let parsed: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
