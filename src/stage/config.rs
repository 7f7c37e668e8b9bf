//! Stage configuration.

/// Configuration shared by stages, compositions and routers.
#[derive(Clone)]
pub struct StageConfig {
    /// Name used in logs, metrics and error messages
    pub name: String,
    /// Number of pending writes at which `write` starts signalling congestion;
    /// also the capacity of the readable side
    pub high_water_mark: usize,
    /// Number of undelivered events retained per event subscriber
    pub event_capacity: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: "stage".to_string(),
            high_water_mark: 16,
            event_capacity: 64,
        }
    }
}

impl std::fmt::Debug for StageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageConfig")
            .field("name", &self.name)
            .field("high_water_mark", &self.high_water_mark)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

impl StageConfig {
    /// Create a configuration with the given name and default limits
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self::default().name(name)
    }

    /// Set the name
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Set the high-water mark
    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Set the event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
