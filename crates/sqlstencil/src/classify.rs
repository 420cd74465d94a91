//! Value classification: inline SQL text versus bound parameter.
//!
//! Every value written into a query is either [`ClassifiedValue::Raw`], already
//! safe SQL text such as a quoted identifier, or [`ClassifiedValue::Parameter`],
//! which is replaced by a placeholder and bound at execution time.
//!
//! Inside the template engine the tag travels with the value itself:
//!
//! - `Raw` is a MiniJinja safe string (what `identifier`, `sqlsafe` and `safe` produce)
//! - `Parameter` with a name hint is a [`BoundValue`] object (what `bind(name)` produces)
//! - any other value is a `Parameter` without a hint
//!
//! Registered filters receive and return [`ClassifiedValue`], so a filter that
//! does not reclassify its input keeps the tag it was given.

use std::sync::Arc;

use minijinja::value::{Enumerator, Object, ObjectRepr};
use minijinja::Value;

/// A value tagged with how it is written into the query.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedValue {
    /// Safe SQL text, written verbatim.
    Raw(String),
    /// A value bound as a parameter.
    Parameter {
        value: Value,
        name_hint: Option<String>,
    },
}

impl ClassifiedValue {
    /// Creates a `Raw` value.
    pub fn raw(text: impl Into<String>) -> Self {
        ClassifiedValue::Raw(text.into())
    }

    /// Creates a `Parameter` without a name hint.
    pub fn parameter(value: impl Into<Value>) -> Self {
        ClassifiedValue::Parameter {
            value: value.into(),
            name_hint: None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ClassifiedValue::Raw(_))
    }

    /// Sets the name hint of a parameter. Raw values are returned unchanged.
    pub fn with_name_hint(self, hint: impl Into<String>) -> Self {
        match self {
            ClassifiedValue::Parameter { value, .. } => ClassifiedValue::Parameter {
                value,
                name_hint: Some(hint.into()),
            },
            raw => raw,
        }
    }

    /// Converts back into an engine value that carries the same tag.
    pub fn into_value(self) -> Value {
        match self {
            ClassifiedValue::Raw(text) => Value::from_safe_string(text),
            ClassifiedValue::Parameter {
                value,
                name_hint: None,
            } => value,
            ClassifiedValue::Parameter {
                value,
                name_hint: Some(name_hint),
            } => Value::from_object(BoundValue { value, name_hint }),
        }
    }
}

impl From<Value> for ClassifiedValue {
    fn from(value: Value) -> Self {
        classify(value)
    }
}

/// Tags an engine value.
pub fn classify(value: Value) -> ClassifiedValue {
    if let Some(bound) = value.downcast_object_ref::<BoundValue>() {
        return ClassifiedValue::Parameter {
            value: bound.value.clone(),
            name_hint: Some(bound.name_hint.clone()),
        };
    }
    if value.is_safe() {
        if let Some(text) = value.as_str() {
            return ClassifiedValue::Raw(text.to_string());
        }
    }
    ClassifiedValue::Parameter {
        value,
        name_hint: None,
    }
}

/// A parameter value with an explicit name hint, as produced by `bind(name)`.
#[derive(Debug)]
pub struct BoundValue {
    pub value: Value,
    pub name_hint: String,
}

impl Object for BoundValue {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }
}

/// A sequence whose elements are bound one parameter each, as produced by `inclause`.
#[derive(Debug)]
pub struct ParameterList {
    pub items: Vec<Value>,
}

impl Object for ParameterList {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Seq
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.items.get(key.as_usize()?).cloned()
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Seq(self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_values_are_parameters() {
        assert_eq!(classify(Value::from(5)), ClassifiedValue::parameter(5));
        assert_eq!(
            classify(Value::from("O'Brien")),
            ClassifiedValue::parameter("O'Brien")
        );
    }

    #[test]
    fn test_safe_strings_are_raw() {
        let value = Value::from_safe_string("\"users\"".to_string());
        assert_eq!(classify(value), ClassifiedValue::raw("\"users\""));
    }

    #[test]
    fn test_bound_value_keeps_hint_through_engine_value() {
        let tagged = ClassifiedValue::parameter(7).with_name_hint("limit");
        let round_tripped = classify(tagged.clone().into_value());
        assert_eq!(round_tripped, tagged);
    }

    #[test]
    fn test_raw_ignores_name_hint() {
        let raw = ClassifiedValue::raw("now()").with_name_hint("ts");
        assert_eq!(raw, ClassifiedValue::raw("now()"));
        assert!(raw.is_raw());
    }

    #[test]
    fn test_parameter_list_is_a_sequence() {
        let list = Value::from_object(ParameterList {
            items: vec![Value::from(1), Value::from(2)],
        });
        assert_eq!(list.len(), Some(2));
        assert_eq!(list.get_item(&Value::from(1)).unwrap(), Value::from(2));
    }
}
