use std::fmt;

/// Generation-checked handle to a slab entry.
///
/// A token outlives the entry it names: once the entry is removed and its
/// slot reused, lookups with the old token return `None` instead of the new
/// occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    index: usize,
    generation: u32,
}

impl Token {
    /// The slot index, shared by every generation of the slot.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Bounded slot storage with generation-checked tokens.
pub(crate) struct Slab<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    len: usize,
    limit: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    /// Stores `value`, or hands it back if the slab is at its limit.
    pub(crate) fn insert(&mut self, value: T) -> Result<Token, T> {
        if self.is_full() {
            return Err(value);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Entry::Vacant { generation: 0 });
                self.entries.len() - 1
            }
        };

        let generation = match self.entries[index] {
            Entry::Vacant { generation } => generation,
            Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
        };

        self.entries[index] = Entry::Occupied { generation, value };
        self.len += 1;

        Ok(Token { index, generation })
    }

    pub(crate) fn get(&self, token: Token) -> Option<&T> {
        match self.entries.get(token.index)? {
            Entry::Occupied { generation, value } if *generation == token.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        match self.entries.get_mut(token.index)? {
            Entry::Occupied { generation, value } if *generation == token.generation => Some(value),
            _ => None,
        }
    }

    /// Takes the entry out; the slot's next occupant gets a new generation.
    pub(crate) fn remove(&mut self, token: Token) -> Option<T> {
        let entry = self.entries.get_mut(token.index)?;

        match entry {
            Entry::Occupied { generation, .. } if *generation == token.generation => {}
            _ => return None,
        }

        let next = Entry::Vacant {
            generation: token.generation.wrapping_add(1),
        };

        match std::mem::replace(entry, next) {
            Entry::Occupied { value, .. } => {
                self.free.push(token.index);
                self.len -= 1;
                Some(value)
            }
            Entry::Vacant { .. } => None,
        }
    }
}
