use std::collections::VecDeque;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Undo/redo history with a bounded past. Pushing a new entry drops the
/// redo stack; the oldest entries fall off once `limit` is exceeded.
#[derive(Debug, Clone)]
pub struct History<T> {
    past: VecDeque<T>,
    present: Option<T>,
    future: Vec<T>,
    limit: usize,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl<T> History<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            past: VecDeque::new(),
            present: None,
            future: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, item: T) {
        if let Some(previous) = self.present.replace(item) {
            self.past.push_back(previous);
            while self.past.len() > self.limit {
                self.past.pop_front();
            }
        }
        self.future.clear();
    }

    pub fn undo(&mut self) -> Option<&T> {
        let previous = self.past.pop_back()?;
        if let Some(current) = self.present.replace(previous) {
            self.future.push(current);
        }
        self.present.as_ref()
    }

    pub fn redo(&mut self) -> Option<&T> {
        let next = self.future.pop()?;
        if let Some(current) = self.present.replace(next) {
            self.past.push_back(current);
        }
        self.present.as_ref()
    }

    /// Forget past and future; the present entry stays.
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    pub fn present(&self) -> Option<&T> {
        self.present.as_ref()
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_redo() {
        let mut h = History::new(20);
        h.push(1);
        h.push(2);
        h.push(3);
        assert_eq!(h.undo(), Some(&2));
        assert_eq!(h.undo(), Some(&1));
        assert_eq!(h.undo(), None);
        assert_eq!(h.redo(), Some(&2));
        assert_eq!(h.present(), Some(&2));
    }

    #[test]
    fn test_push_drops_future() {
        let mut h = History::new(20);
        h.push("a");
        h.push("b");
        h.undo();
        h.push("c");
        assert!(!h.can_redo());
        assert_eq!(h.undo(), Some(&"a"));
    }

    #[test]
    fn test_limit_bounds_past() {
        let mut h = History::new(3);
        for i in 0..10 {
            h.push(i);
        }
        let mut undone = Vec::new();
        while let Some(v) = h.undo() {
            undone.push(*v);
        }
        assert_eq!(undone, vec![8, 7, 6]);
    }

    #[test]
    fn test_clear_keeps_present() {
        let mut h = History::new(20);
        h.push(1);
        h.push(2);
        h.clear();
        assert!(!h.can_undo());
        assert_eq!(h.present(), Some(&2));
    }
}
