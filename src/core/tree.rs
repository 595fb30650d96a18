//! Compressed radix tree with `{param}` path segments.
//!
//! Keys are URL patterns of the form `/api/foo/{resource}/{id}`. A literal
//! segment matches itself; a `{name}` segment matches exactly one incoming
//! segment and binds `name` to it. Lookups come in two flavours:
//! * [`PrefixTree::find`] — exact match honouring `{param}` wildcards,
//!   used for named routes.
//! * [`PrefixTree::find_longest_match`] — deepest stored key that is a
//!   prefix of the query, wildcards not honoured, used for services.
//!
//! The whole tree sits behind one `RwLock`: inserts happen at startup (and
//! rarely after), lookups happen per request and never mutate.

use std::sync::RwLock;

use thiserror::Error;

const SLASH: char = '/';
const CURLY_START: char = '{';
const CURLY_END: char = '}';

/// Errors returned by [`PrefixTree::insert`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    #[error("key is empty")]
    KeyEmpty,

    #[error("keys must start with a '/'")]
    MissingSlashPrefix,

    #[error("keys must not end with a '/'")]
    TrailingSlash,

    #[error("bad path param syntax in key")]
    BadParamSyntax,

    #[error("key is already stored or overlaps a stored pattern")]
    Duplicate,

    #[error("no common prefix with any stored key")]
    NoCommonPrefix,
}

/// A successful exact lookup: the stored value plus any `{name}` bindings
/// collected along the way, in pattern order.
#[derive(Debug, Clone)]
pub struct TreeMatch<V> {
    pub value: V,
    pub params: Vec<(String, String)>,
}

struct Node<V> {
    key: String,
    value: Option<V>,
    children: Vec<Node<V>>,
}

impl<V> Node<V> {
    fn new(key: &str, value: Option<V>) -> Self {
        Self {
            key: key.to_string(),
            value,
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.value.is_some()
    }
}

/// Key → value store with literal and `{param}` segments.
pub struct PrefixTree<V> {
    root: RwLock<Option<Node<V>>>,
}

impl<V: Clone> Default for PrefixTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> PrefixTree<V> {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(None),
        }
    }

    /// Store `value` under `key`.
    ///
    /// Fails with [`TreeError::Duplicate`] when the key is already present
    /// or when it would overlap a stored pattern so that some URL could
    /// match both (e.g. `/api/{x}/get` next to `/api/products/get`).
    pub fn insert(&self, key: &str, value: V) -> Result<(), TreeError> {
        if key.is_empty() {
            return Err(TreeError::KeyEmpty);
        }
        validate_key(key)?;

        let mut root = self.root.write().expect("tree lock poisoned");

        if let Some(existing) = root.as_ref() {
            let mut stored = Vec::new();
            collect_keys(existing, String::new(), &mut stored);
            for s in &stored {
                if patterns_overlap(key, s) {
                    return Err(TreeError::Duplicate);
                }
            }
        }

        match root.as_mut() {
            None => {
                *root = Some(Node::new(key, Some(value)));
                Ok(())
            }
            Some(r) => match insert_rec(r, key, value)? {
                None => Ok(()),
                Some(_) => Err(TreeError::NoCommonPrefix),
            },
        }
    }

    /// Exact lookup honouring `{param}` wildcards; binds params on success.
    pub fn find(&self, key: &str) -> Option<TreeMatch<V>> {
        if key.is_empty() {
            return None;
        }
        let root = self.root.read().expect("tree lock poisoned");
        let node = root.as_ref()?;
        let (value, stored_key) = find_rec(node, key, false, "")?;
        Some(TreeMatch {
            value,
            params: bind_params(&stored_key, key),
        })
    }

    /// Deepest stored key that is a prefix of `key`. Wildcards are treated
    /// as ordinary characters here, so only literal prefixes match.
    pub fn find_longest_match(&self, key: &str) -> Option<V> {
        if key.is_empty() {
            return None;
        }
        let root = self.root.read().expect("tree lock poisoned");
        find_longest_rec(root.as_ref()?, key)
    }

    /// Snapshot of every stored value.
    pub fn leaves(&self) -> Vec<V> {
        let root = self.root.read().expect("tree lock poisoned");
        let mut out = Vec::new();
        if let Some(r) = root.as_ref() {
            collect_leaves(r, &mut out);
        }
        out
    }

    /// Depth-first search for the first value satisfying `pred`.
    pub fn find_by<F>(&self, pred: F) -> Option<V>
    where
        F: Fn(&V) -> bool,
    {
        let root = self.root.read().expect("tree lock poisoned");
        root.as_ref().and_then(|r| find_by_rec(r, &pred))
    }
}

fn longest_common_prefix(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

/// Leading slash, no trailing slash, well-formed `{…}` groups with unique
/// names and no `/` inside.
fn validate_key(key: &str) -> Result<(), TreeError> {
    if !key.starts_with(SLASH) {
        return Err(TreeError::MissingSlashPrefix);
    }
    if key.ends_with(SLASH) {
        return Err(TreeError::TrailingSlash);
    }

    let mut inside = false;
    let mut name = String::new();
    let mut seen: Vec<String> = Vec::new();

    for c in key.chars() {
        match c {
            CURLY_START => {
                if inside {
                    return Err(TreeError::BadParamSyntax);
                }
                inside = true;
                name.clear();
            }
            CURLY_END => {
                if !inside || name.is_empty() {
                    return Err(TreeError::BadParamSyntax);
                }
                if seen.contains(&name) {
                    return Err(TreeError::BadParamSyntax);
                }
                seen.push(name.clone());
                inside = false;
            }
            SLASH if inside => return Err(TreeError::BadParamSyntax),
            _ if inside => name.push(c),
            _ => {}
        }
    }

    if inside {
        return Err(TreeError::BadParamSyntax);
    }
    Ok(())
}

/// Can some incoming segment match both pattern segments? A `{…}` group
/// consumes the rest of the incoming segment, so only the literal text
/// before the first `{` constrains the match — `abc{id}` collides with
/// `abc{other}` and with `abcde`, but not with `abx{id}`.
fn segments_overlap(a: &str, b: &str) -> bool {
    let (a_prefix, a_wild) = match a.find(CURLY_START) {
        Some(idx) => (&a[..idx], true),
        None => (a, false),
    };
    let (b_prefix, b_wild) = match b.find(CURLY_START) {
        Some(idx) => (&b[..idx], true),
        None => (b, false),
    };

    match (a_wild, b_wild) {
        (false, false) => a == b,
        (true, false) => b.starts_with(a_prefix),
        (false, true) => a.starts_with(b_prefix),
        (true, true) => a_prefix.starts_with(b_prefix) || b_prefix.starts_with(a_prefix),
    }
}

/// Two patterns overlap when some URL would match both: same segment count
/// and every segment pair is compatible, including `{` groups that start
/// mid-segment.
fn patterns_overlap(a: &str, b: &str) -> bool {
    if !a.contains(CURLY_START) && !b.contains(CURLY_START) {
        return false;
    }
    let sa: Vec<&str> = a.split(SLASH).collect();
    let sb: Vec<&str> = b.split(SLASH).collect();
    if sa.len() != sb.len() {
        return false;
    }
    sa.iter().zip(sb.iter()).all(|(x, y)| segments_overlap(x, y))
}

fn collect_keys<V>(n: &Node<V>, prefix: String, out: &mut Vec<String>) {
    let full = format!("{prefix}{}", n.key);
    if n.is_leaf() {
        out.push(full.clone());
    }
    for c in &n.children {
        collect_keys(c, full.clone(), out);
    }
}

/// Ok(None) = inserted somewhere below; Ok(Some(v)) = no common prefix on
/// this branch, the value is handed back so a sibling can take it.
fn insert_rec<V>(n: &mut Node<V>, key: &str, value: V) -> Result<Option<V>, TreeError> {
    let lcp = longest_common_prefix(&n.key, key);
    if lcp == 0 {
        return Ok(Some(value));
    }

    if lcp < n.key.len() {
        // Split: this node keeps the shared prefix, the old suffix moves
        // into a child next to the newly inserted suffix.
        let old = Node {
            key: n.key[lcp..].to_string(),
            value: n.value.take(),
            children: std::mem::take(&mut n.children),
        };
        n.key.truncate(lcp);

        if lcp == key.len() {
            n.value = Some(value);
            n.children = vec![old];
        } else {
            n.children = vec![old, Node::new(&key[lcp..], Some(value))];
        }
        return Ok(None);
    }

    // lcp == n.key.len()
    if lcp == key.len() {
        if n.is_leaf() {
            return Err(TreeError::Duplicate);
        }
        n.value = Some(value);
        return Ok(None);
    }

    let rem = &key[lcp..];
    let mut carry = value;
    for c in &mut n.children {
        match insert_rec(c, rem, carry)? {
            None => return Ok(None),
            Some(v) => carry = v,
        }
    }
    n.children.push(Node::new(rem, Some(carry)));
    Ok(None)
}

/// Walk `stored` against `query` tracking wildcard state. Returns how far
/// each side advanced and whether a `{…}` group is still open. Inside a
/// group the stored side advances alone; at `}` the query side skips to the
/// next `/` (the consumed span becomes the bound value).
fn wildcard_offsets(stored: &str, query: &str, mut in_wildcard: bool) -> (usize, usize, bool) {
    let s = stored.as_bytes();
    let q = query.as_bytes();
    let mut i = 0;
    let mut j = 0;

    while i < s.len() {
        if j >= q.len() && !in_wildcard {
            break;
        }
        match s[i] {
            b'{' => {
                in_wildcard = true;
                i += 1;
            }
            b'}' => {
                in_wildcard = false;
                let rem = &query[j..];
                j += rem.find(SLASH).unwrap_or(rem.len());
                i += 1;
            }
            _ if in_wildcard => i += 1,
            c => {
                if j >= q.len() || c != q[j] {
                    break;
                }
                i += 1;
                j += 1;
            }
        }
    }

    (i, j, in_wildcard)
}

/// Returns the matched value together with the full stored key, so the
/// caller can derive param bindings by zipping segments.
fn find_rec<V: Clone>(
    n: &Node<V>,
    key: &str,
    in_wildcard: bool,
    prefix: &str,
) -> Option<(V, String)> {
    let has_wildcard = n.key.contains(CURLY_START) || in_wildcard;

    if !has_wildcard {
        if key == n.key {
            return n.value.clone().map(|v| (v, format!("{prefix}{}", n.key)));
        }
        let lcp = longest_common_prefix(&n.key, key);
        if lcp < n.key.len() {
            return None;
        }
        let child_prefix = format!("{prefix}{}", n.key);
        for c in &n.children {
            if let Some(hit) = find_rec(c, &key[lcp..], false, &child_prefix) {
                return Some(hit);
            }
        }
        return None;
    }

    let (consumed_stored, consumed_query, still_wildcard) =
        wildcard_offsets(&n.key, key, in_wildcard);

    // The whole fragment must be consumed for this level to match.
    if consumed_stored != n.key.len() {
        return None;
    }

    let rem = &key[consumed_query..];
    if rem.is_empty() {
        return n.value.clone().map(|v| (v, format!("{prefix}{}", n.key)));
    }

    let child_prefix = format!("{prefix}{}", n.key);
    for c in &n.children {
        if let Some(hit) = find_rec(c, rem, still_wildcard, &child_prefix) {
            return Some(hit);
        }
    }
    None
}

/// Zip the stored pattern's segments with the query's; every `{name}`
/// group yields one binding. The group consumes the query segment's
/// remainder after the literal prefix, so `/abc{id}` against `/abc42`
/// binds `id` to `42`.
fn bind_params(stored: &str, query: &str) -> Vec<(String, String)> {
    if !stored.contains(CURLY_START) {
        return Vec::new();
    }
    stored
        .split(SLASH)
        .zip(query.split(SLASH))
        .filter_map(|(s, q)| {
            let start = s.find(CURLY_START)?;
            let end = s[start..].find(CURLY_END)? + start;
            let name = &s[start + 1..end];
            let value = q.get(start..).unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn find_longest_rec<V: Clone>(n: &Node<V>, key: &str) -> Option<V> {
    let lcp = longest_common_prefix(&n.key, key);
    if lcp == 0 || lcp != n.key.len() {
        return None;
    }

    let rem = &key[lcp..];
    for c in &n.children {
        if let Some(v) = find_longest_rec(c, rem) {
            return Some(v);
        }
    }

    // No deeper hit; this node counts only if something is stored here.
    n.value.clone()
}

fn collect_leaves<V: Clone>(n: &Node<V>, out: &mut Vec<V>) {
    for c in &n.children {
        collect_leaves(c, out);
    }
    if let Some(v) = &n.value {
        out.push(v.clone());
    }
}

fn find_by_rec<V: Clone, F>(n: &Node<V>, pred: &F) -> Option<V>
where
    F: Fn(&V) -> bool,
{
    if let Some(v) = &n.value {
        if pred(v) {
            return Some(v.clone());
        }
    }
    for c in &n.children {
        if let Some(v) = find_by_rec(c, pred) {
            return Some(v);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_bad_keys() {
        let tree: PrefixTree<u32> = PrefixTree::new();

        assert_eq!(tree.insert("", 1), Err(TreeError::KeyEmpty));
        assert_eq!(tree.insert("api/users", 1), Err(TreeError::MissingSlashPrefix));
        assert_eq!(tree.insert("/api/users/", 1), Err(TreeError::TrailingSlash));
        assert_eq!(tree.insert("/api/{id", 1), Err(TreeError::BadParamSyntax));
        assert_eq!(tree.insert("/api/id}", 1), Err(TreeError::BadParamSyntax));
        assert_eq!(tree.insert("/api/{{id}}", 1), Err(TreeError::BadParamSyntax));
        assert_eq!(tree.insert("/api/{a/b}", 1), Err(TreeError::BadParamSyntax));
        assert_eq!(tree.insert("/api/{x}/{x}", 1), Err(TreeError::BadParamSyntax));
    }

    #[test]
    fn insert_then_find_returns_value() {
        let tree = PrefixTree::new();
        tree.insert("/api/users", 1).unwrap();
        tree.insert("/api/products", 2).unwrap();
        tree.insert("/api/users-archive", 3).unwrap();

        assert_eq!(tree.find("/api/users").unwrap().value, 1);
        assert_eq!(tree.find("/api/products").unwrap().value, 2);
        assert_eq!(tree.find("/api/users-archive").unwrap().value, 3);
        assert!(tree.find("/api/user").is_none());
        assert!(tree.find("/api").is_none());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let tree = PrefixTree::new();
        tree.insert("/api/users", 1).unwrap();
        assert_eq!(tree.insert("/api/users", 2), Err(TreeError::Duplicate));
        // The original value survives the failed insert.
        assert_eq!(tree.find("/api/users").unwrap().value, 1);
    }

    #[test]
    fn split_preserves_existing_leaves() {
        let tree = PrefixTree::new();
        tree.insert("/api/users/all", 1).unwrap();
        tree.insert("/api/users", 2).unwrap();
        tree.insert("/api", 3).unwrap();

        assert_eq!(tree.find("/api/users/all").unwrap().value, 1);
        assert_eq!(tree.find("/api/users").unwrap().value, 2);
        assert_eq!(tree.find("/api").unwrap().value, 3);
    }

    #[test]
    fn wildcard_match_binds_params() {
        let tree = PrefixTree::new();
        tree.insert("/api/users/{id}/posts/{pid}", 1).unwrap();

        let hit = tree.find("/api/users/42/posts/hello").unwrap();
        assert_eq!(hit.value, 1);
        assert_eq!(
            hit.params,
            vec![
                ("id".to_string(), "42".to_string()),
                ("pid".to_string(), "hello".to_string()),
            ]
        );
    }

    #[test]
    fn wildcard_requires_full_segments() {
        let tree = PrefixTree::new();
        tree.insert("/api/users/{id}/posts", 1).unwrap();

        assert!(tree.find("/api/users/42/posts").is_some());
        assert!(tree.find("/api/users/42").is_none());
        assert!(tree.find("/api/users/42/comments").is_none());
    }

    #[test]
    fn wildcard_does_not_swallow_literal_mismatch() {
        let tree = PrefixTree::new();
        tree.insert("/abc{id}", 1).unwrap();

        assert!(tree.find("/abc42").is_some());
        assert!(tree.find("/axy").is_none());
    }

    #[test]
    fn ambiguous_patterns_are_rejected() {
        let tree = PrefixTree::new();
        tree.insert("/api/{resource}/get", 1).unwrap();

        assert_eq!(
            tree.insert("/api/products/get", 2),
            Err(TreeError::Duplicate)
        );
        // Different tail segment: no URL can match both, so it is fine.
        tree.insert("/api/products/get-all", 3).unwrap();
    }

    #[test]
    fn mid_segment_wildcard_collisions_are_rejected() {
        let tree = PrefixTree::new();
        tree.insert("/abc{id}", 1).unwrap();

        // Same literal prefix before the group: any /abc… URL would match
        // both, and the second leaf could never be reached.
        assert_eq!(tree.insert("/abc{other}", 2), Err(TreeError::Duplicate));
        // A longer literal is swallowed by the group just the same.
        assert_eq!(tree.insert("/abcde", 3), Err(TreeError::Duplicate));

        assert_eq!(tree.find("/abc42").unwrap().value, 1);
    }

    #[test]
    fn distinct_literal_prefixes_before_wildcards_coexist() {
        let tree = PrefixTree::new();
        tree.insert("/abc{id}", 1).unwrap();
        tree.insert("/abx{id}", 2).unwrap();

        assert_eq!(tree.find("/abc42").unwrap().value, 1);
        let hit = tree.find("/abx42").unwrap();
        assert_eq!(hit.value, 2);
        assert_eq!(hit.params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn longest_match_picks_deepest_leaf() {
        let tree = PrefixTree::new();
        tree.insert("/api/a", 1).unwrap();
        tree.insert("/api/a/b", 2).unwrap();

        assert_eq!(tree.find_longest_match("/api/a/b/x"), Some(2));
        assert_eq!(tree.find_longest_match("/api/a/c"), Some(1));
        assert_eq!(tree.find_longest_match("/api/a"), Some(1));
        assert_eq!(tree.find_longest_match("/other"), None);
    }

    #[test]
    fn longest_match_ignores_wildcards() {
        let tree = PrefixTree::new();
        tree.insert("/api/{id}", 1).unwrap();

        assert_eq!(tree.find_longest_match("/api/42"), None);
        assert_eq!(tree.find_longest_match("/api/{id}/x"), Some(1));
    }

    #[test]
    fn leaves_returns_every_inserted_value_once() {
        let tree = PrefixTree::new();
        tree.insert("/api/a", 1).unwrap();
        tree.insert("/api/a/b", 2).unwrap();
        tree.insert("/api/c", 3).unwrap();

        let mut all = tree.leaves();
        all.sort_unstable();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[test]
    fn find_by_walks_depth_first() {
        let tree = PrefixTree::new();
        tree.insert("/api/a", 10).unwrap();
        tree.insert("/api/b", 20).unwrap();

        assert_eq!(tree.find_by(|v| *v == 20), Some(20));
        assert_eq!(tree.find_by(|v| *v == 99), None);
    }
}
