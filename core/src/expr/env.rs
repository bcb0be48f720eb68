// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::value::Value;
use std::collections::HashMap;

/// Name bindings for one evaluation. Most variables carry a spelled-out name
/// and a terse alias (`VELOCITY` / `v`), so [Env::bind] takes a slice.
#[derive(Clone, Debug, Default)]
pub struct Env {
    vars: HashMap<String, Value>,
}
impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, names: &[&str], value: Value) -> &mut Self {
        for name in names {
            self.vars.insert((*name).to_string(), value.clone());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_share_a_value() {
        let mut env = Env::new();
        env.bind(&["VELOCITY", "v"], Value::Int(99));
        assert_eq!(env.get("VELOCITY"), Some(&Value::Int(99)));
        assert_eq!(env.get("v"), Some(&Value::Int(99)));
        assert_eq!(env.get("w"), None);
    }
}
