use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Variable binding table: name -> value, iterated in name order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    vars: BTreeMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name`, silently overwriting any previous value.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Updates an existing binding.
    ///
    /// Returns [`VMError::UndeclaredVariable`] if `name` was never declared.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), VMError> {
        match self.vars.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VMError::UndeclaredVariable {
                name: name.to_string(),
            }),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Value, VMError> {
        self.vars.get(name).ok_or_else(|| VMError::UndeclaredVariable {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_pairs(&self) -> Vec<(String, Value)> {
        self.vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl FromIterator<(String, Value)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Renders as `{a: 1, b: "x"}`.
impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.vars.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_overwrites_silently() {
        let mut b = Bindings::new();
        b.declare("x", Value::Int(1));
        b.declare("x", Value::Int(2));
        assert_eq!(b.get("x").unwrap(), &Value::Int(2));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn assign_requires_declaration() {
        let mut b = Bindings::new();
        assert_eq!(
            b.assign("y", Value::Int(1)),
            Err(VMError::UndeclaredVariable { name: "y".into() })
        );
        assert!(b.is_empty());
        b.declare("y", Value::Undefined);
        b.assign("y", Value::Int(1)).unwrap();
        assert_eq!(b.get("y").unwrap(), &Value::Int(1));
    }

    #[test]
    fn iteration_follows_name_order() {
        let mut b = Bindings::new();
        b.declare("zeta", Value::Int(1));
        b.declare("alpha", Value::Int(2));
        let names: Vec<&str> = b.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(b.to_string(), "{alpha: 2, zeta: 1}");
    }

    #[test]
    fn pairs_round_trip() {
        let mut b = Bindings::new();
        b.declare("s", Value::from("v"));
        let rebuilt: Bindings = b.to_pairs().into_iter().collect();
        assert_eq!(rebuilt, b);
    }
}
