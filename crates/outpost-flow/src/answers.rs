//! Answer table: the values submitted for each stage kind

use std::collections::HashMap;
use std::fmt;

use outpost_protocol::StageKind;
use secrecy::{ExposeSecret, SecretString};

/// Values the executor answers challenges with, one per stage kind
#[derive(Default)]
pub struct Answers {
    values: HashMap<StageKind, SecretString>,
}

impl Answers {
    /// Create an empty answer table
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`Answers::insert`]
    pub fn with(mut self, stage: StageKind, value: impl Into<String>) -> Self {
        self.insert(stage, value);
        self
    }

    /// Set the answer for a stage, replacing any previous one
    pub fn insert(&mut self, stage: StageKind, value: impl Into<String>) {
        self.values.insert(stage, SecretString::from(value.into()));
    }

    /// Answer for a stage. Missing entries yield an empty string.
    pub fn answer(&self, stage: &StageKind) -> &str {
        self.values
            .get(stage)
            .map(|v| v.expose_secret())
            .unwrap_or("")
    }

    /// Whether an answer is set for a stage
    pub fn contains(&self, stage: &StageKind) -> bool {
        self.values.contains_key(stage)
    }

    /// Number of stages with an answer
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no answers are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V: Into<String>> FromIterator<(StageKind, V)> for Answers {
    fn from_iter<I: IntoIterator<Item = (StageKind, V)>>(iter: I) -> Self {
        let mut answers = Answers::new();
        for (stage, value) in iter {
            answers.insert(stage, value);
        }
        answers
    }
}

impl fmt::Debug for Answers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stages: Vec<&str> = self.values.keys().map(|k| k.component()).collect();
        stages.sort_unstable();
        f.debug_struct("Answers").field("stages", &stages).finish()
    }
}
