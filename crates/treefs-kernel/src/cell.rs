//! Undo-capable field holder.

/// A mutable field that can be set speculatively and restored exactly.
///
/// Holds the current value and at most one pending previous value. A unit of
/// work calls [`set`](TxCell::set) before persisting, then either
/// [`commit`](TxCell::commit) once the backend accepted the change or
/// [`undo`](TxCell::undo) when it did not. History never grows past one step,
/// so a long-lived node does not accumulate old values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxCell<T> {
    current: T,
    previous: Option<T>,
}

impl<T> TxCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: value,
            previous: None,
        }
    }

    pub fn get(&self) -> &T {
        &self.current
    }

    /// Make `value` current, remembering the old value for [`undo`](TxCell::undo).
    ///
    /// A second `set` before `commit`/`undo` keeps the oldest remembered value,
    /// so undo always returns to the last committed state.
    pub fn set(&mut self, value: T) {
        let old = std::mem::replace(&mut self.current, value);
        if self.previous.is_none() {
            self.previous = Some(old);
        }
    }

    /// Restore the remembered value. Returns the discarded value, or `None`
    /// when there is nothing to undo.
    pub fn undo(&mut self) -> Option<T> {
        let previous = self.previous.take()?;
        Some(std::mem::replace(&mut self.current, previous))
    }

    /// Forget the remembered value; the current value is now the baseline.
    pub fn commit(&mut self) {
        self.previous = None;
    }

    /// True while a speculative value awaits commit or undo.
    pub fn is_pending(&self) -> bool {
        self.previous.is_some()
    }
}

impl<T: Default> Default for TxCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Display> std::fmt::Display for TxCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.current.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_undo_restores() {
        let mut cell = TxCell::new("docs".to_string());
        cell.set("notes".into());
        assert_eq!(cell.get(), "notes");
        assert!(cell.is_pending());

        assert_eq!(cell.undo().as_deref(), Some("notes"));
        assert_eq!(cell.get(), "docs");
        assert!(!cell.is_pending());
    }

    #[test]
    fn test_undo_without_set_is_noop() {
        let mut cell = TxCell::new(3u64);
        assert_eq!(cell.undo(), None);
        assert_eq!(*cell.get(), 3);
    }

    #[test]
    fn test_commit_makes_value_baseline() {
        let mut cell = TxCell::new(1);
        cell.set(2);
        cell.commit();
        assert_eq!(cell.undo(), None);
        assert_eq!(*cell.get(), 2);
    }

    #[test]
    fn test_double_set_undoes_to_committed() {
        let mut cell = TxCell::new('a');
        cell.set('b');
        cell.set('c');
        assert_eq!(cell.undo(), Some('c'));
        assert_eq!(*cell.get(), 'a');
    }
}
