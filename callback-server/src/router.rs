//! Path routing for inbound notifications.
//!
//! Every device connection owns a unique callback path such as `/5f0c.../`. The
//! [`PrefixRouter`] maps request paths onto the owner of the longest registered
//! prefix.

/// Longest-prefix routing table keyed by callback path.
///
/// Prefixes are normalized to start and end with `/`, so `"/abc"` and `"/abc/"`
/// name the same route. A request path matches a prefix when it equals the prefix
/// or lies below it; `/abc` never matches a request for `/abcd`.
#[derive(Debug, Clone)]
pub struct PrefixRouter<T> {
    /// Sorted by prefix length, longest first
    routes: Vec<(String, T)>,
}

impl<T> Default for PrefixRouter<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> PrefixRouter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `prefix`, returning the value it replaced.
    pub fn insert(&mut self, prefix: &str, value: T) -> Option<T> {
        let prefix = normalize(prefix);
        if let Some(slot) = self.routes.iter_mut().find(|(p, _)| *p == prefix) {
            return Some(std::mem::replace(&mut slot.1, value));
        }

        let position = self
            .routes
            .iter()
            .position(|(p, _)| p.len() < prefix.len())
            .unwrap_or(self.routes.len());
        self.routes.insert(position, (prefix, value));
        None
    }

    /// Remove the route registered under `prefix`.
    pub fn remove(&mut self, prefix: &str) -> Option<T> {
        let prefix = normalize(prefix);
        let index = self.routes.iter().position(|(p, _)| *p == prefix)?;
        Some(self.routes.remove(index).1)
    }

    /// Find the value owning the longest prefix of `path`.
    pub fn route(&self, path: &str) -> Option<&T> {
        self.routes
            .iter()
            .find(|(prefix, _)| matches_prefix(prefix, path))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate over `(prefix, value)` pairs, longest prefix first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.routes.iter().map(|(p, v)| (p.as_str(), v))
    }
}

fn normalize(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

fn matches_prefix(prefix: &str, path: &str) -> bool {
    if path.starts_with(prefix) {
        return true;
    }
    // "/abc" is the same resource as "/abc/"
    prefix.len() > 1 && path.len() + 1 == prefix.len() && prefix.starts_with(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_route_exact_and_nested_paths() {
        let mut router = PrefixRouter::new();
        router.insert("/dev-a/", "a");

        assert_eq!(router.route("/dev-a/"), Some(&"a"));
        assert_eq!(router.route("/dev-a"), Some(&"a"));
        assert_eq!(router.route("/dev-a/service/1"), Some(&"a"));
        assert_eq!(router.route("/dev-ab/"), None);
        assert_eq!(router.route("/other"), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut router = PrefixRouter::new();
        router.insert("/", "root");
        router.insert("/events/", "events");
        router.insert("/events/dev-a/", "dev-a");

        assert_eq!(router.route("/events/dev-a/x"), Some(&"dev-a"));
        assert_eq!(router.route("/events/dev-b/x"), Some(&"events"));
        assert_eq!(router.route("/misc"), Some(&"root"));
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let mut router = PrefixRouter::new();
        assert_eq!(router.insert("/a", 1), None);
        assert_eq!(router.insert("/a/", 2), Some(1));
        assert_eq!(router.len(), 1);

        assert_eq!(router.remove("a"), Some(2));
        assert!(router.is_empty());
        assert_eq!(router.route("/a/"), None);
        assert_eq!(router.remove("/a/"), None);
    }

    proptest! {
        #[test]
        fn prop_route_returns_longest_matching_prefix(
            segments in proptest::collection::vec("[a-c]{1,3}", 1..5),
            depth in 0usize..5,
        ) {
            let mut router = PrefixRouter::new();
            let mut prefix = String::new();
            for (i, segment) in segments.iter().enumerate() {
                prefix.push('/');
                prefix.push_str(segment);
                router.insert(&prefix, i);
            }

            let depth = depth.min(segments.len() - 1);
            let path = format!("/{}/tail", segments[..=depth].join("/"));
            // the deepest registered prefix that the path extends
            let expected = (0..segments.len())
                .rev()
                .find(|&i| path.starts_with(&format!("/{}/", segments[..=i].join("/"))));
            prop_assert_eq!(router.route(&path).copied(), expected);
        }
    }
}
