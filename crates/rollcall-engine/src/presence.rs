use std::collections::HashSet;

/// Identities already marked present in the current run.
///
/// Grows monotonically; a new run starts with a fresh set.
#[derive(Debug, Default)]
pub struct PresenceSet {
    seen: HashSet<String>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity`. Returns `true` only the first time it is seen.
    pub fn mark(&mut self, identity: &str) -> bool {
        if self.seen.contains(identity) {
            return false;
        }
        self.seen.insert(identity.to_string())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_once() {
        let mut p = PresenceSet::new();
        assert!(p.mark("ada"));
        assert!(!p.mark("ada"));
        assert!(p.mark("grace"));
        assert_eq!(p.len(), 2);
        assert!(p.contains("ada"));
        assert!(!p.contains("linus"));
    }
}
