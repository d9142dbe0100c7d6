//! Named registries of interchangeable strategy objects.

use thiserror::Error;

/// Raised when pipeline configuration references an id that was never
/// registered. Selection fails before any state is mutated.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown {kind} `{id}`")]
    UnknownId { kind: &'static str, id: String },
}

/// An id-keyed collection of interchangeable implementations with exactly one
/// active selection.
///
/// The active entry is always a member of the collection: a registry is
/// constructed with its first entry already active, and `select` rejects
/// unknown ids without touching the current selection. Switching is O(1) and
/// never constructs or destroys instances.
pub struct Registry<T> {
    kind: &'static str,
    entries: Vec<(String, T)>,
    active: usize,
}

impl<T> Registry<T> {
    /// Creates a registry seeded with one entry, which becomes active.
    /// `kind` names the strategy family in error messages.
    pub fn new(kind: &'static str, id: impl Into<String>, instance: T) -> Self {
        Self {
            kind,
            entries: vec![(id.into(), instance)],
            active: 0,
        }
    }

    /// Adds an entry. Registering an existing id replaces the instance in
    /// place, keeping its registration position (and active status).
    pub fn register(&mut self, id: impl Into<String>, instance: T) {
        let id = id.into();
        match self.position(&id) {
            Some(idx) => self.entries[idx].1 = instance,
            None => self.entries.push((id, instance)),
        }
    }

    /// Switches the active entry. Fails fast on an unknown id; the current
    /// selection is untouched in that case.
    pub fn select(&mut self, id: &str) -> Result<(), ConfigurationError> {
        match self.position(id) {
            Some(idx) => {
                self.active = idx;
                Ok(())
            }
            None => Err(ConfigurationError::UnknownId {
                kind: self.kind,
                id: id.to_string(),
            }),
        }
    }

    /// The active entry's id.
    pub fn active_id(&self) -> &str {
        &self.entries[self.active].0
    }

    /// The active id and instance.
    pub fn current(&self) -> (&str, &T) {
        let (id, instance) = &self.entries[self.active];
        (id, instance)
    }

    /// The active id and instance, mutably.
    pub fn current_mut(&mut self) -> (&str, &mut T) {
        let (id, instance) = &mut self.entries[self.active];
        (id, instance)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.position(id).map(|idx| &self.entries[idx].1)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.position(id).map(|idx| &mut self.entries[idx].1)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Entries in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> + '_ {
        self.entries.iter_mut().map(|(id, instance)| (id.as_str(), instance))
    }

    /// Builds the error `select` would return for `id`, for callers that
    /// resolve entries through `get`/`get_mut`.
    pub fn missing(&self, id: &str) -> ConfigurationError {
        ConfigurationError::UnknownId {
            kind: self.kind,
            id: id.to_string(),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|(entry_id, _)| entry_id == id)
    }
}
