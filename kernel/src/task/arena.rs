//! Generational slot arena backing thread and wait-list handles.
//!
//! A [`Key`] names a slot in one kernel session. Freeing a slot bumps its
//! generation, and every `init` starts a new session, so a stale handle
//! never aliases a newer object; lookups simply fail.

use alloc::vec::Vec;

/// Packed handle: session (16 bits), index (16 bits), generation (32 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    session: u16,
    index: u16,
    generation: u32,
}

impl Key {
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Never zero: generations start at 1.
    pub fn to_bits(self) -> u64 {
        ((self.session as u64) << 48) | ((self.index as u64) << 32) | self.generation as u64
    }

    pub fn from_bits(bits: u64) -> Key {
        Key {
            session: (bits >> 48) as u16,
            index: (bits >> 32) as u16,
            generation: bits as u32,
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    session: u16,
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
}

impl<T> Arena<T> {
    pub fn new(session: u16) -> Self {
        Self {
            session,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> Key {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                kassert!(self.slots.len() < u16::MAX as usize, "kernel object table is full");
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u16
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slot.value = Some(value);
        Key {
            session: self.session,
            index,
            generation: slot.generation,
        }
    }

    fn slot(&self, key: Key) -> Option<&Slot<T>> {
        if key.session != self.session {
            return None;
        }
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        self.slot(key).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.slot(key)?;
        self.slots[key.index as usize].value.as_mut()
    }

    pub fn remove(&mut self, key: Key) -> Option<T> {
        self.slot(key)?;
        let value = self.slots[key.index as usize].value.take()?;
        self.free.push(key.index);
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> + '_ {
        let session = self.session;
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Key {
                        session,
                        index: index as u16,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.slots.iter_mut().filter_map(|slot| slot.value.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_keys_do_not_resolve() {
        let mut arena = Arena::new(1);
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");
        assert_eq!(a.index(), b.index());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn keys_from_another_session_are_rejected() {
        let mut first = Arena::new(1);
        let mut second = Arena::new(2);
        let key = first.insert(7);
        second.insert(9);
        assert_eq!(second.get(key), None);
    }

    #[test]
    fn bits_round_trip_and_are_nonzero() {
        let mut arena = Arena::new(0);
        let key = arena.insert(());
        assert_ne!(key.to_bits(), 0);
        assert_eq!(Key::from_bits(key.to_bits()), key);
    }
}
