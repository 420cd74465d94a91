//! The ordered record of values bound during one render.

use minijinja::Value;

/// One bound value, recorded where its marker was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// Index of this capture in its [`CaptureList`].
    pub position: usize,
    /// Best-effort name for the value, usually the source variable name.
    pub name_hint: Option<String>,
    /// The value to bind at execution time.
    pub value: Value,
}

/// Append-only list of captures, in evaluation order.
///
/// Under loops entries follow iteration order; branches that are not taken
/// contribute nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureList {
    entries: Vec<Capture>,
}

impl CaptureList {
    /// Creates an empty capture list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value and returns its position.
    pub fn push(&mut self, name_hint: Option<String>, value: Value) -> usize {
        let position = self.entries.len();
        self.entries.push(Capture {
            position,
            name_hint,
            value,
        });
        position
    }

    /// Returns the capture at `position`.
    pub fn get(&self, position: usize) -> Option<&Capture> {
        self.entries.get(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Capture> {
        self.entries.iter()
    }

    /// Returns the captured values in order.
    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|c| c.value.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a CaptureList {
    type Item = &'a Capture;
    type IntoIter = std::slice::Iter<'a, Capture>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_assigns_positions_in_order() {
        let mut captures = CaptureList::new();
        assert_eq!(captures.push(Some("a".into()), Value::from(1)), 0);
        assert_eq!(captures.push(None, Value::from(2)), 1);

        assert_eq!(captures.len(), 2);
        assert_eq!(captures.get(1).unwrap().name_hint, None);
        assert_eq!(captures.values(), vec![Value::from(1), Value::from(2)]);
    }
}
