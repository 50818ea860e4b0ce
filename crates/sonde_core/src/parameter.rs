//! Stage Parameters
//!
//! A [`Parameter`] is a named, bounded numeric control owned by exactly one
//! command instance. Values are stored as `f32` bits in an `AtomicU32` and
//! accessed with `Relaxed` ordering: a control thread may change a value
//! while the render thread reads it mid-cycle. Each access sees a whole
//! value, and no ordering with other memory is implied.
//!
//! `min`/`max` describe the intended range for editors. `set_value` does not
//! clamp; stages clamp where an out-of-range value would be unsafe.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use crate::error::ParameterError;

/// Shape of a parameter's value space
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    /// Continuous value between `min` and `max`
    Range,
    /// Index into a list of named choices
    Items(Vec<String>),
}

/// A named numeric control
pub struct Parameter {
    name: String,
    description: String,
    min: f32,
    max: f32,
    kind: ParameterKind,
    value: AtomicU32,
    /// Position inside the owning command, assigned once at registration
    index: OnceLock<usize>,
}

impl Parameter {
    /// Continuous parameter
    pub fn range(name: &str, description: &str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            min,
            max,
            kind: ParameterKind::Range,
            value: AtomicU32::new(default.to_bits()),
            index: OnceLock::new(),
        }
    }

    /// Choice parameter; the value is the index of the selected item
    pub fn items(name: &str, description: &str, items: &[&str], default: usize) -> Self {
        let max = items.len().saturating_sub(1) as f32;
        Self {
            name: name.to_string(),
            description: description.to_string(),
            min: 0.0,
            max,
            kind: ParameterKind::Items(items.iter().map(|s| s.to_string()).collect()),
            value: AtomicU32::new((default as f32).min(max).to_bits()),
            index: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }

    #[inline]
    pub fn value(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_value(&self, value: f32) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Value rounded to the nearest non-negative integer
    pub fn as_index(&self) -> usize {
        self.value().round().max(0.0) as usize
    }

    /// Label of the selected item, for choice parameters
    pub fn selected_item(&self) -> Option<&str> {
        match &self.kind {
            ParameterKind::Items(items) => items
                .get(self.as_index().min(items.len().saturating_sub(1)))
                .map(String::as_str),
            ParameterKind::Range => None,
        }
    }

    /// Select a choice by label
    pub fn select(&self, item: &str) -> Result<(), ParameterError> {
        match &self.kind {
            ParameterKind::Items(items) => {
                let position = items
                    .iter()
                    .position(|candidate| candidate.eq_ignore_ascii_case(item))
                    .ok_or_else(|| ParameterError::UnknownName(item.to_string()))?;
                self.set_value(position as f32);
                Ok(())
            }
            ParameterKind::Range => Err(ParameterError::UnknownName(item.to_string())),
        }
    }

    /// Registration index, if the parameter belongs to a command
    pub fn index(&self) -> Option<usize> {
        self.index.get().copied()
    }

    /// Assign the registration index
    ///
    /// Registering again at the same index is a no-op; a different index
    /// is rejected.
    pub fn register(&self, index: usize) -> Result<(), ParameterError> {
        let existing = *self.index.get_or_init(|| index);
        if existing != index {
            return Err(ParameterError::IndexConflict {
                name: self.name.clone(),
                existing,
                requested: index,
            });
        }
        Ok(())
    }

    fn copy_at(&self, index: usize) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            min: self.min,
            max: self.max,
            kind: self.kind.clone(),
            value: AtomicU32::new(self.value.load(Ordering::Relaxed)),
            index: OnceLock::from(index),
        }
    }
}

/// Copies the definition and current value into independent storage. The
/// copy is unregistered.
impl Clone for Parameter {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            min: self.min,
            max: self.max,
            kind: self.kind.clone(),
            value: AtomicU32::new(self.value.load(Ordering::Relaxed)),
            index: OnceLock::new(),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("min", &self.min)
            .field("max", &self.max)
            .field("index", &self.index())
            .finish()
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selected_item() {
            Some(item) => write!(f, "{} = {}", self.name, item),
            None => write!(f, "{} = {:.2} [{}, {}]", self.name, self.value(), self.min, self.max),
        }
    }
}

/// The ordered parameters of one command instance
pub struct ParameterSet {
    parameters: Vec<Parameter>,
}

impl ParameterSet {
    /// Set without parameters
    pub const fn empty() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    /// Copy `templates` into private storage, registering each at its
    /// position
    pub fn new(templates: &[Parameter]) -> Self {
        Self {
            parameters: templates
                .iter()
                .enumerate()
                .map(|(index, template)| template.copy_at(index))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.parameters.iter()
    }

    pub fn get(&self, index: usize) -> Result<&Parameter, ParameterError> {
        self.parameters
            .get(index)
            .ok_or(ParameterError::UnknownIndex(index))
    }

    pub fn by_name(&self, name: &str) -> Result<&Parameter, ParameterError> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ParameterError::UnknownName(name.to_string()))
    }

    /// Value of the parameter at `index`
    ///
    /// Stages read their own parameters through this with indices they
    /// registered themselves; an unknown index reads as 0.
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        self.parameters.get(index).map_or(0.0, Parameter::value)
    }

    pub fn set_value(&self, index: usize, value: f32) -> Result<(), ParameterError> {
        self.get(index)?.set_value(value);
        Ok(())
    }

    pub fn set_by_name(&self, name: &str, value: f32) -> Result<(), ParameterError> {
        self.by_name(name)?.set_value(value);
        Ok(())
    }

    /// Snapshot of every value, in registration order
    pub fn values(&self) -> Vec<f32> {
        self.parameters.iter().map(Parameter::value).collect()
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for ParameterSet {
    fn clone(&self) -> Self {
        Self::new(&self.parameters)
    }
}

impl fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.parameters.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.parameters.iter()
    }
}
