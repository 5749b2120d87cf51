use crate::key;
use serde_yaml::{Mapping, Value};

/// Uniform view over the two physical encodings CWL allows for keyed
/// collections: a mapping from identifier to entry, or a sequence of objects
/// each carrying the identifier in a distinguished field.
///
/// `inputs`, `outputs`, `steps` and step `in` blocks key on `id`,
/// `requirements` and `hints` key on `class`.
///
/// # Examples
///
/// ```
/// use cwl_doc::IdMap;
/// use serde_yaml::Value;
///
/// let mut inputs: Value = serde_yaml::from_str("{x: string, y: int}").unwrap();
/// let map = IdMap::new(&mut inputs);
/// assert_eq!(map.keys(), vec!["x".to_string(), "y".to_string()]);
/// ```
pub struct IdMap<'a> {
    value: &'a mut Value,
    id_field: &'a str,
}

impl<'a> IdMap<'a> {
    /// A view keyed on the default `id` field.
    pub fn new(value: &'a mut Value) -> Self {
        Self { value, id_field: "id" }
    }

    /// A view keyed on a custom identifier field (`class` for requirements).
    pub fn keyed_on(value: &'a mut Value, id_field: &'a str) -> Self {
        Self { value, id_field }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match &*self.value {
            Value::Mapping(map) => map.get(&key(name)),
            Value::Sequence(seq) => seq.iter().find(|entry| self.matches(entry, name)),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let id_field = self.id_field;
        match self.value {
            Value::Mapping(map) => map.get_mut(&key(name)),
            Value::Sequence(seq) => seq
                .iter_mut()
                .find(|entry| entry.get(id_field).and_then(Value::as_str) == Some(name)),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Identifiers in declaration order. Sequence entries without the
    /// identifier field are skipped.
    pub fn keys(&self) -> Vec<String> {
        match &*self.value {
            Value::Mapping(map) => map.keys().filter_map(|k| k.as_str().map(str::to_string)).collect(),
            Value::Sequence(seq) => seq
                .iter()
                .filter_map(|entry| entry.get(self.id_field).and_then(Value::as_str).map(str::to_string))
                .collect(),
            _ => vec![],
        }
    }

    /// Appends a new entry. In sequence form the identifier field is attached
    /// to (a copy of) the entry; mapping form stores the entry as given.
    pub fn add(&mut self, name: &str, entry: Value) {
        match &mut *self.value {
            Value::Mapping(map) => {
                map.insert(key(name), entry);
            }
            Value::Sequence(seq) => seq.push(with_id(self.id_field, name, entry)),
            other => {
                let mut map = Mapping::new();
                map.insert(key(name), entry);
                *other = Value::Mapping(map);
            }
        }
    }

    /// Replaces the named entry, appending it if not present.
    pub fn set(&mut self, name: &str, entry: Value) {
        let replacement = if matches!(&*self.value, Value::Sequence(_)) {
            with_id(self.id_field, name, entry)
        } else {
            entry
        };
        if let Some(slot) = self.get_mut(name) {
            *slot = replacement;
        } else if let Value::Sequence(seq) = self.value {
            seq.push(replacement);
        } else {
            self.add(name, replacement);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let id_field = self.id_field;
        match self.value {
            Value::Mapping(map) => map.remove(&key(name)),
            Value::Sequence(seq) => {
                let index = seq
                    .iter()
                    .position(|entry| entry.get(id_field).and_then(Value::as_str) == Some(name))?;
                Some(seq.remove(index))
            }
            _ => None,
        }
    }

    /// Lifts the mapping form into the sequence-of-objects form. Scalar
    /// entries are wrapped as `{ <secondary>: scalar }` before the identifier
    /// field is attached. Sequence form is left untouched.
    pub fn to_array(&mut self, secondary: &str) {
        if !matches!(&*self.value, Value::Mapping(_)) {
            return;
        }
        let map = match std::mem::take(self.value) {
            Value::Mapping(map) => map,
            other => {
                *self.value = other;
                return;
            }
        };

        let mut entries = Vec::with_capacity(map.len());
        for (k, v) in map {
            let name = k.as_str().unwrap_or_default().to_string();
            let entry = match v {
                Value::Mapping(_) => v,
                scalar => {
                    let mut wrapped = Mapping::new();
                    wrapped.insert(key(secondary), scalar);
                    Value::Mapping(wrapped)
                }
            };
            entries.push(with_id(self.id_field, &name, entry));
        }
        *self.value = Value::Sequence(entries);
    }

    fn matches(&self, entry: &Value, name: &str) -> bool {
        entry.get(self.id_field).and_then(Value::as_str) == Some(name)
    }
}

/// Builds a sequence entry with the identifier field in leading position.
fn with_id(id_field: &str, name: &str, entry: Value) -> Value {
    let mut result = Mapping::new();
    result.insert(key(id_field), key(name));
    if let Value::Mapping(map) = entry {
        for (k, v) in map {
            if k.as_str() != Some(id_field) {
                result.insert(k, v);
            }
        }
    }
    Value::Mapping(result)
}
