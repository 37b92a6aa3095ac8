//! Immutable ordered batches of output values.
//!
//! A [`Chunk`] is what one step of a pull emits. Consuming operations
//! (`split_off`, `append`) reuse the buffer; borrowing ones (`concat`,
//! `split_at`) leave their inputs untouched and need `O: Clone`.

use core::fmt;

/// An ordered, immutable batch of values.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Chunk<O> {
    items: Vec<O>,
}

impl<O> Chunk<O> {
    /// The empty chunk, identity of [`Chunk::concat`].
    #[must_use]
    pub const fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// A chunk holding exactly `value`.
    #[must_use]
    pub fn singleton(value: O) -> Self {
        Self { items: vec![value] }
    }

    /// Takes ownership of `items` in order.
    #[must_use]
    pub const fn from_vec(items: Vec<O>) -> Self {
        Self { items }
    }

    /// Number of elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Returns true for a chunk with no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Borrowing iterator in order.
    pub fn iter(&self) -> core::slice::Iter<'_, O> {
        self.items.iter()
    }

    /// Element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&O> {
        self.items.get(index)
    }

    /// Last element.
    #[must_use]
    pub fn last(&self) -> Option<&O> {
        self.items.last()
    }

    /// Elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[O] {
        &self.items
    }

    /// Consumes the chunk into its elements.
    #[must_use]
    pub fn into_vec(self) -> Vec<O> {
        self.items
    }

    /// Splits into the first `min(n, size)` elements and the rest.
    #[must_use]
    pub fn split_off(mut self, n: usize) -> (Self, Self) {
        let at = n.min(self.items.len());
        let rest = self.items.split_off(at);
        (self, Self { items: rest })
    }

    /// `self` followed by `other`.
    #[must_use]
    pub fn append(mut self, mut other: Self) -> Self {
        if self.items.is_empty() {
            return other;
        }
        self.items.append(&mut other.items);
        self
    }

    /// Applies `f` to every element, keeping order.
    #[must_use]
    pub fn map<P>(self, f: impl FnMut(O) -> P) -> Chunk<P> {
        Chunk {
            items: self.items.into_iter().map(f).collect(),
        }
    }

    /// Keeps the elements matching `pred`, keeping order.
    #[must_use]
    pub fn filter(self, mut pred: impl FnMut(&O) -> bool) -> Self {
        Self {
            items: self.items.into_iter().filter(|o| pred(o)).collect(),
        }
    }
}

impl<O: Clone> Chunk<O> {
    /// Copies `items` in order.
    #[must_use]
    pub fn from_slice(items: &[O]) -> Self {
        Self {
            items: items.to_vec(),
        }
    }

    /// A new chunk equal to `a` followed by `b`; neither input changes.
    #[must_use]
    pub fn concat(a: &Self, b: &Self) -> Self {
        let mut items = Vec::with_capacity(a.size() + b.size());
        items.extend_from_slice(&a.items);
        items.extend_from_slice(&b.items);
        Self { items }
    }

    /// Two chunks whose concatenation is `self`; the first has
    /// `min(n, size)` elements.
    #[must_use]
    pub fn split_at(&self, n: usize) -> (Self, Self) {
        let at = n.min(self.items.len());
        let (head, tail) = self.items.split_at(at);
        (Self::from_slice(head), Self::from_slice(tail))
    }

    /// Copies the elements out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<O> {
        self.items.clone()
    }
}

impl<O> Default for Chunk<O> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<O: fmt::Debug> fmt::Debug for Chunk<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Chunk").field(&self.items).finish()
    }
}

impl<O> From<Vec<O>> for Chunk<O> {
    fn from(items: Vec<O>) -> Self {
        Self::from_vec(items)
    }
}

impl<O> FromIterator<O> for Chunk<O> {
    fn from_iter<I: IntoIterator<Item = O>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<O> IntoIterator for Chunk<O> {
    type Item = O;
    type IntoIter = std::vec::IntoIter<O>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, O> IntoIterator for &'a Chunk<O> {
    type Item = &'a O;
    type IntoIter = core::slice::Iter<'a, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
