//! Ordered `(name, value)` lists
//!
//! Every multi-valued result in this crate, device properties, tags,
//! devlinks, enumeration results and hwdb lookups, is a [`List`].
//!
//! Lists are built once and never change afterwards, cloning one shares it.
//!
//! # Example
//!
//! Walking a list the cursor way
//!
//! ```rust
//! # use linudev::List;
//! let list: List = [("ID_BUS", Some("usb")), ("ID_MODEL", None)]
//!     .into_iter()
//!     .collect();
//! let mut entry = list.first();
//! while let Some(e) = entry {
//!     println!("{} = {:?}", e.name(), e.value());
//!     entry = e.next_entry();
//! }
//! assert_eq!(list.first().and_then(|e| e.by_name("ID_MODEL")).map(|e| e.index()), Some(1));
//! ```
use std::{collections::HashMap, fmt, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    value: Option<String>,
}

/// An immutable, ordered list of `(name, value)` pairs
///
/// Names are unique.
#[derive(Clone, PartialEq, Eq)]
pub struct List {
    entries: Arc<[Entry]>,
}

impl List {
    /// The head of the list, or [`None`] if it is empty
    pub fn first(&self) -> Option<ListEntry<'_>> {
        ListEntry::at(&self.entries, 0)
    }

    /// Entry named `name`
    pub fn get(&self, name: &str) -> Option<ListEntry<'_>> {
        self.first()?.by_name(name)
    }

    /// Value of the entry named `name`
    ///
    /// Returns [`None`] if there is no such entry, or it has no value.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name)?.value()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.first(),
        }
    }

    /// Names, in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

impl Default for List {
    fn default() -> Self {
        Self {
            entries: Vec::new().into(),
        }
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.name, &e.value)))
            .finish()
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = ListEntry<'a>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<N, V> FromIterator<(N, Option<V>)> for List
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, Option<V>)>>(iter: I) -> Self {
        let mut b = ListBuilder::new();
        for (n, v) in iter {
            b.insert(n, v);
        }
        b.build()
    }
}

/// A position in a [`List`]
#[derive(Clone, Copy)]
pub struct ListEntry<'a> {
    entries: &'a [Entry],
    index: usize,
}

impl<'a> ListEntry<'a> {
    fn at(entries: &'a [Entry], index: usize) -> Option<Self> {
        (index < entries.len()).then_some(Self { entries, index })
    }

    fn entry(&self) -> &'a Entry {
        &self.entries[self.index]
    }

    pub fn name(&self) -> &'a str {
        &self.entry().name
    }

    /// Value, absent for name-only entries such as tags
    pub fn value(&self) -> Option<&'a str> {
        self.entry().value.as_deref()
    }

    /// Position of this entry in its list
    pub fn index(&self) -> usize {
        self.index
    }

    /// The following entry, or [`None`] at the end of the list
    pub fn next_entry(&self) -> Option<ListEntry<'a>> {
        Self::at(self.entries, self.index + 1)
    }

    /// First entry named exactly `name`, starting at this one
    pub fn by_name(&self, name: &str) -> Option<ListEntry<'a>> {
        self.entries[self.index..]
            .iter()
            .position(|e| e.name == name)
            .map(|i| Self {
                entries: self.entries,
                index: self.index + i,
            })
    }
}

impl fmt::Debug for ListEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListEntry")
            .field("name", &self.name())
            .field("value", &self.value())
            .finish()
    }
}

/// Iterator over [`ListEntry`]s
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    next: Option<ListEntry<'a>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = ListEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        self.next = cur.next_entry();
        Some(cur)
    }
}

/// Builds a [`List`], keeping insertion order
///
/// Inserting an existing name replaces its value in place.
#[derive(Debug, Default)]
pub(crate) struct ListBuilder {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N, V>(&mut self, name: N, value: Option<V>) -> &mut Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.map(Into::into);
        match self.index.get(&name) {
            Some(&i) => self.entries[i].value = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push(Entry { name, value });
            }
        }
        self
    }

    /// Insert a name-only entry
    pub fn name<N: Into<String>>(&mut self, name: N) -> &mut Self {
        self.insert(name, None::<String>)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(name)
            .and_then(|&i| self.entries[i].value.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn build(self) -> List {
        List {
            entries: self.entries.into(),
        }
    }
}
