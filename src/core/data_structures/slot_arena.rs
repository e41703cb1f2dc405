/*!
 * Generational Slot Arena
 * Index-based storage with O(1) insert/remove and stale-key detection
 */

use serde::{Deserialize, Serialize};

/// Key into a [`SlotArena`]
///
/// The generation is bumped every time a slot is vacated, so a key held past
/// removal never resolves to the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub index: u32,
    pub generation: u32,
}

impl SlotKey {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

#[derive(Debug)]
enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Arena of `T` addressed by generation-checked indices
///
/// Vacated slots form a LIFO free list threaded through the vacant entries,
/// so the most recently released slot is reused first.
#[derive(Debug)]
pub struct SlotArena<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied slots
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots ever created (occupied + vacant)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, value: T) -> SlotKey {
        self.len += 1;

        if let Some(index) = self.free_head {
            let entry = &mut self.entries[index as usize];
            let (generation, next_free) = match *entry {
                Entry::Vacant {
                    generation,
                    next_free,
                } => (generation, next_free),
                Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *entry = Entry::Occupied { generation, value };
            self.free_head = next_free;
            return SlotKey::new(index, generation);
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        SlotKey::new(index, 0)
    }

    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        let entry = self.entries.get_mut(key.index as usize)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }

        let vacant = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let Entry::Occupied { value, .. } = std::mem::replace(entry, vacant) else {
            return None;
        };

        self.free_head = Some(key.index);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn get(&self, key: SlotKey) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, key: SlotKey) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => {
                    Some((SlotKey::new(index as u32, *generation), value))
                }
                Entry::Vacant { .. } => None,
            })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.free_head = None;
        self.len = 0;
    }
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
