//! Compound cache keys backed by an append-only node arena.
//!
//! A [`CompoundKey`] is a chain: a root key followed by zero or more sub-key parts. Each part
//! may be of a different type, so nested keys stay type-safe without a single monolithic key
//! enum. Nodes live in a per-cache [`KeyArena`] and refer to their parent by index, which keeps
//! the parent/child relationship a plain tree of owned nodes.
//!
//! Equality and hashing are structural over the whole chain. Sub-keys are interned, so building
//! the same chain twice reuses the same arena nodes.

use std::{
    any::{Any, TypeId},
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;

/// A single link of a compound key.
///
/// Implemented for every `Hash + Eq + Debug + Send + Sync + 'static` type, so strings, integers,
/// tuples and user-defined key structs can all be appended with [`CompoundKey::sub`].
pub trait KeyPart: Any + Send + Sync + fmt::Debug {
    /// Upcast for downcasting during comparison.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality against another part of any type.
    fn part_eq(&self, other: &dyn KeyPart) -> bool;

    /// Feed the part, including its type, into `state`.
    fn part_hash(&self, state: &mut dyn Hasher);
}

impl<T> KeyPart for T
where
    T: Any + Hash + Eq + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn part_eq(&self, other: &dyn KeyPart) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn part_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// Distinguishes independently created roots that share a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RootTag {
    name: &'static str,
    serial: u64,
}

static NEXT_ROOT: AtomicU64 = AtomicU64::new(0);

struct KeyNode {
    parent: Option<usize>,
    part: Box<dyn KeyPart>,
}

/// Append-only storage for the nodes of every key built from one cache.
pub struct KeyArena {
    nodes: boxcar::Vec<KeyNode>,
    /// (parent, part hash) -> node indices, used to intern sub-keys
    interned: DashMap<(Option<usize>, u64), Vec<usize>>,
}

impl KeyArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        KeyArena {
            nodes: boxcar::Vec::new(),
            interned: DashMap::new(),
        }
    }

    /// Number of distinct key nodes allocated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.count()
    }

    /// Returns `true` if no key was ever built from this arena.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node(&self, index: usize) -> &KeyNode {
        &self.nodes[index]
    }

    fn intern(&self, parent: Option<usize>, part: Box<dyn KeyPart>) -> usize {
        let mut hasher = DefaultHasher::new();
        part.part_hash(&mut hasher);
        let hash = hasher.finish();

        let mut candidates = self.interned.entry((parent, hash)).or_default();
        if let Some(existing) = candidates
            .iter()
            .copied()
            .find(|&index| self.node(index).part.part_eq(part.as_ref()))
        {
            return existing;
        }

        let index = self.nodes.push(KeyNode { parent, part });
        candidates.push(index);
        index
    }
}

impl Default for KeyArena {
    fn default() -> Self {
        Self::new()
    }
}

/// A structurally compared chain of key parts.
///
/// # Examples
///
/// ```rust
/// use modloader::cache::KeyedValueCache;
///
/// let cache: KeyedValueCache<String> = KeyedValueCache::new();
/// let proxies = cache.root("proxies");
///
/// let a = proxies.sub("com.example").sub(3_u32);
/// let b = proxies.sub("com.example").sub(3_u32);
/// assert_eq!(a, b);
/// assert!(a.is_equal_or_descendant_of(&proxies));
/// assert_ne!(a, proxies.sub("com.example").sub(4_u32));
/// ```
#[derive(Clone)]
pub struct CompoundKey {
    arena: Arc<KeyArena>,
    index: usize,
}

impl CompoundKey {
    /// Create a new root key in `arena`.
    ///
    /// Every call yields a distinct root, even for identical names.
    pub fn root(arena: &Arc<KeyArena>, name: &'static str) -> Self {
        let tag = RootTag {
            name,
            serial: NEXT_ROOT.fetch_add(1, Ordering::Relaxed),
        };
        let index = arena.intern(None, Box::new(tag));
        CompoundKey {
            arena: Arc::clone(arena),
            index,
        }
    }

    /// Append a sub-key part, yielding the child key.
    #[must_use]
    pub fn sub<P>(&self, part: P) -> CompoundKey
    where
        P: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        let index = self.arena.intern(Some(self.index), Box::new(part));
        CompoundKey {
            arena: Arc::clone(&self.arena),
            index,
        }
    }

    /// The key one level up, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<CompoundKey> {
        self.arena.node(self.index).parent.map(|index| CompoundKey {
            arena: Arc::clone(&self.arena),
            index,
        })
    }

    /// Number of sub-key parts below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.chain().count() - 1
    }

    /// The last part of the chain, if it is of type `P`.
    #[must_use]
    pub fn part<P: 'static>(&self) -> Option<&P> {
        self.arena.node(self.index).part.as_any().downcast_ref::<P>()
    }

    /// Returns `true` if `self` equals `ancestor` or lies below it.
    #[must_use]
    pub fn is_equal_or_descendant_of(&self, ancestor: &CompoundKey) -> bool {
        let mut current = Some(self.index);
        while let Some(index) = current {
            if self.nodes_equal(index, ancestor) {
                return true;
            }
            current = self.arena.node(index).parent;
        }
        false
    }

    fn chain(&self) -> impl Iterator<Item = &KeyNode> + '_ {
        let mut current = Some(self.index);
        std::iter::from_fn(move || {
            let node = self.arena.node(current?);
            current = node.parent;
            Some(node)
        })
    }

    fn nodes_equal(&self, index: usize, other: &CompoundKey) -> bool {
        if Arc::ptr_eq(&self.arena, &other.arena) && index == other.index {
            return true;
        }

        let mut left = Some(index);
        let mut right = Some(other.index);
        loop {
            match (left, right) {
                (None, None) => return true,
                (Some(l), Some(r)) => {
                    let l_node = self.arena.node(l);
                    let r_node = other.arena.node(r);
                    if !l_node.part.part_eq(r_node.part.as_ref()) {
                        return false;
                    }
                    left = l_node.parent;
                    right = r_node.parent;
                }
                _ => return false,
            }
        }
    }
}

impl PartialEq for CompoundKey {
    fn eq(&self, other: &Self) -> bool {
        self.nodes_equal(self.index, other)
    }
}

impl Eq for CompoundKey {}

impl Hash for CompoundKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for node in self.chain() {
            node.part.part_hash(state);
        }
    }
}

impl fmt::Debug for CompoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<_> = self.chain().collect();
        parts.reverse();
        let mut list = f.debug_list();
        for node in parts {
            list.entry(&node.part);
        }
        list.finish()
    }
}
