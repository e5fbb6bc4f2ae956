// File: src/playback/queue.rs

use std::collections::VecDeque;

use tunebot_common::models::Track;

use crate::Error;

/// Ordered track list of one chat plus the play cursor.
///
/// Positions are 1-based at the public boundary and 0-based internally.
/// Finished entries leave the list and are kept in a bounded history;
/// the cursor then lands on whatever followed them.
#[derive(Debug, Clone)]
pub struct TrackQueue {
    entries: Vec<Track>,
    current: Option<usize>,
    history: VecDeque<Track>,
    max_len: usize,
    max_history: usize,
}

impl TrackQueue {
    pub fn new(max_len: usize, max_history: usize) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            history: VecDeque::new(),
            max_len,
            max_history,
        }
    }

    /// Appends a track and returns its 1-based position.
    pub fn enqueue(&mut self, track: Track) -> Result<usize, Error> {
        if self.entries.len() >= self.max_len {
            return Err(Error::QueueFull(self.max_len));
        }
        self.entries.push(track);
        Ok(self.entries.len())
    }

    /// Removes the entry at a 1-based position.
    ///
    /// Removing the current entry unloads the cursor; deciding what plays
    /// next is up to the caller.
    pub fn remove_at(&mut self, position: usize) -> Result<Track, Error> {
        let idx = self.index_of(position)?;
        let removed = self.entries.remove(idx);
        self.current = match self.current {
            Some(c) if idx < c => Some(c - 1),
            Some(c) if idx == c => None,
            other => other,
        };
        Ok(removed)
    }

    /// Moves one entry; the cursor keeps following the same track.
    pub fn reorder(&mut self, from_position: usize, to_position: usize) -> Result<(), Error> {
        let from = self.index_of(from_position)?;
        let to = self.index_of(to_position)?;
        if from == to {
            return Ok(());
        }

        let track = self.entries.remove(from);
        self.entries.insert(to, track);

        if let Some(c) = self.current {
            self.current = Some(if c == from {
                to
            } else if from < c && c <= to {
                c - 1
            } else if to <= c && c < from {
                c + 1
            } else {
                c
            });
        }
        Ok(())
    }

    /// Track that would play after the current one, without touching state.
    ///
    /// Past the end of the list this wraps to the head, so entries moved in
    /// front of the playing one still get their turn.
    pub fn peek_next(&self) -> Option<&Track> {
        match self.current {
            Some(c) => self
                .entries
                .get(c + 1)
                .or_else(|| if c > 0 { self.entries.first() } else { None }),
            None => self.entries.first(),
        }
    }

    /// Empties the queue and unloads the cursor. History is kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }

    /// Points the cursor at `index`. Out of range unloads the cursor.
    pub fn start_at(&mut self, index: usize) -> Option<Track> {
        if index < self.entries.len() {
            self.current = Some(index);
            Some(self.entries[index].clone())
        } else {
            self.current = None;
            None
        }
    }

    /// Moves the current entry into history and returns the index the next
    /// candidate now occupies (the head when nothing was loaded).
    pub fn retire_current(&mut self) -> usize {
        match self.current.take() {
            Some(c) => {
                let finished = self.entries.remove(c);
                self.push_history(finished);
                c
            }
            None => 0,
        }
    }

    /// Like `start_at`, but an index past the end wraps to the head.
    /// `None` only when the queue is empty.
    pub fn start_from(&mut self, index: usize) -> Option<Track> {
        let index = if index < self.entries.len() { index } else { 0 };
        self.start_at(index)
    }

    /// `retire_current` followed by `start_from`; yields what `peek_next` showed.
    pub fn advance(&mut self) -> Option<Track> {
        let next = self.retire_current();
        self.start_from(next)
    }

    /// Unloads the cursor but keeps the entry queued.
    pub fn reset_cursor(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.and_then(|c| self.entries.get(c))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// 1-based position of the current entry.
    pub fn current_position(&self) -> Option<usize> {
        self.current.map(|c| c + 1)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finished tracks, oldest first.
    pub fn history(&self) -> Vec<Track> {
        self.history.iter().cloned().collect()
    }

    fn push_history(&mut self, track: Track) {
        if self.max_history == 0 {
            return;
        }
        self.history.push_back(track);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    fn index_of(&self, position: usize) -> Result<usize, Error> {
        if position == 0 || position > self.entries.len() {
            return Err(Error::InvalidPosition {
                position,
                len: self.entries.len(),
            });
        }
        Ok(position - 1)
    }
}
