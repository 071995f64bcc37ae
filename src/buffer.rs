//! Fixed-capacity byte buffer with edge-triggered transitions.
//!
//! A [`Buffer`] knows nothing about descriptors or reactors. It only counts
//! the bytes placed into its storage and reports, for every [`appended`] or
//! [`removed`] call, which state changes that call caused. Each reported
//! [`Transition`] is a genuine edge (empty to non-empty, full to non-full...),
//! never a level, so the consumer can treat it as a command.
//!
//! [`appended`]: Buffer::appended
//! [`removed`]: Buffer::removed

use crate::error::BufferError;

use std::fmt;

/// A state change reported by a [`Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Data filled the last free byte.
    Full,
    /// The buffer went from empty to holding data.
    NonEmpty,
    /// End of stream was recorded for the first time.
    Eof,
    /// New data landed (reported on every non-empty append).
    Data,
    /// The last stored byte was removed.
    Empty,
    /// Room was freed in a previously full buffer.
    NonFull,
}

impl Transition {
    /// Firing order. `appended` only reports the first four and `removed`
    /// only the last two, so one order serves both.
    const ORDER: [Transition; 6] = [
        Transition::Full,
        Transition::NonEmpty,
        Transition::Eof,
        Transition::Data,
        Transition::Empty,
        Transition::NonFull,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// The ordered set of transitions produced by one buffer operation.
///
/// Iterating yields the transitions in their fixed firing order.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Transitions(u8);

impl Transitions {
    /// A set with no transitions.
    pub const fn none() -> Self {
        Self(0)
    }

    fn insert(&mut self, transition: Transition) {
        self.0 |= transition.bit();
    }

    /// Returns `true` if `transition` was reported.
    pub fn contains(&self, transition: Transition) -> bool {
        self.0 & transition.bit() != 0
    }

    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over the reported transitions in firing order.
    pub fn iter(&self) -> Iter {
        Iter {
            set: *self,
            next: 0,
        }
    }
}

impl IntoIterator for Transitions {
    type Item = Transition;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

/// Iterator over a [`Transitions`] set, in firing order.
pub struct Iter {
    set: Transitions,
    next: usize,
}

impl Iterator for Iter {
    type Item = Transition;

    fn next(&mut self) -> Option<Transition> {
        while let Some(&transition) = Transition::ORDER.get(self.next) {
            self.next += 1;
            if self.set.contains(transition) {
                return Some(transition);
            }
        }
        None
    }
}

impl fmt::Debug for Transitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A fixed-capacity byte region with a length counter and an end-of-stream
/// flag.
///
/// Stored bytes always form a contiguous prefix of the storage: data is
/// appended at [`len`](Self::len) and removed from the front, the remainder
/// being moved back to offset zero.
///
/// The buffer never grows. Its only mutators are [`appended`](Self::appended)
/// and [`removed`](Self::removed) (plus the copying helper
/// [`extend_from_slice`](Self::extend_from_slice)); they validate the caller's
/// byte counts and leave the state untouched on error.
pub struct Buffer {
    /// Backing storage, exactly `capacity` bytes.
    storage: Box<[u8]>,

    /// Number of stored bytes, always `<= storage.len()`.
    len: usize,

    /// Set once, never cleared.
    eof: bool,
}

impl Buffer {
    /// Creates a zeroed buffer of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_storage(vec![0; capacity].into_boxed_slice())
    }

    /// Creates a buffer over caller-provided storage.
    ///
    /// The capacity is the storage length; the previous contents are ignored
    /// and the buffer starts empty.
    ///
    /// # Panics
    ///
    /// Panics if `storage` is empty.
    pub fn from_storage(storage: Box<[u8]>) -> Self {
        assert!(!storage.is_empty(), "buffer capacity must be > 0");

        Self {
            storage,
            len: 0,
            eof: false,
        }
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of bytes currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if no free byte is left.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Number of free bytes after the stored prefix.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Returns `true` once end of stream has been recorded.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// The stored bytes.
    pub fn filled(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// The free tail of the storage, where the next bytes must be placed
    /// before calling [`appended`](Self::appended).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.len..]
    }

    /// Records that `n` bytes were placed at the start of the spare region.
    ///
    /// `n == 0` records end of stream. Transitions are reported in the order
    /// `Full`, `NonEmpty`, `Eof`, `Data`, each only when it is a genuine state
    /// change; calling `appended(0)` again after end of stream reports
    /// nothing.
    ///
    /// # Errors
    ///
    /// - [`BufferError::Overflow`] if `n` exceeds [`remaining`](Self::remaining).
    /// - [`BufferError::AfterEndOfStream`] if `n > 0` and end of stream was
    ///   already recorded.
    pub fn appended(&mut self, n: usize) -> Result<Transitions, BufferError> {
        if n > self.remaining() {
            return Err(BufferError::Overflow {
                requested: n,
                available: self.remaining(),
            });
        }
        if n > 0 && self.eof {
            return Err(BufferError::AfterEndOfStream { requested: n });
        }

        let was_empty = self.len == 0;
        let was_eof = self.eof;

        self.len += n;
        if n == 0 {
            self.eof = true;
        }

        let mut transitions = Transitions::none();

        if n > 0 && self.is_full() {
            transitions.insert(Transition::Full);
        }
        if was_empty && self.len > 0 {
            transitions.insert(Transition::NonEmpty);
        }
        if self.eof && !was_eof {
            transitions.insert(Transition::Eof);
        }
        if n > 0 {
            transitions.insert(Transition::Data);
        }

        Ok(transitions)
    }

    /// Records that `n` bytes were consumed from the front.
    ///
    /// The remaining bytes are moved to offset zero. Reports `Empty` then
    /// `NonFull`, each only on a genuine state change.
    ///
    /// # Errors
    ///
    /// [`BufferError::Underflow`] if `n` exceeds [`len`](Self::len).
    pub fn removed(&mut self, n: usize) -> Result<Transitions, BufferError> {
        if n > self.len {
            return Err(BufferError::Underflow {
                requested: n,
                length: self.len,
            });
        }

        let was_full = self.is_full();
        let old_len = self.len;

        self.storage.copy_within(n..old_len, 0);
        self.len = old_len - n;

        let mut transitions = Transitions::none();

        if old_len > 0 && self.len == 0 {
            transitions.insert(Transition::Empty);
        }
        if was_full && self.len < self.capacity() {
            transitions.insert(Transition::NonFull);
        }

        Ok(transitions)
    }

    /// Copies `bytes` into the spare region and records them.
    ///
    /// All or nothing: if `bytes` does not fit, nothing is copied. An empty
    /// slice records nothing; it is not an end-of-stream signal.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<Transitions, BufferError> {
        if bytes.is_empty() {
            return Ok(Transitions::none());
        }
        if bytes.len() > self.remaining() {
            return Err(BufferError::Overflow {
                requested: bytes.len(),
                available: self.remaining(),
            });
        }
        if self.eof {
            return Err(BufferError::AfterEndOfStream {
                requested: bytes.len(),
            });
        }

        self.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        self.appended(bytes.len())
    }
}

impl From<Vec<u8>> for Buffer {
    /// Uses the vector's length as capacity; its contents are ignored.
    fn from(storage: Vec<u8>) -> Self {
        Self::from_storage(storage.into_boxed_slice())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("eof", &self.eof)
            .finish()
    }
}
