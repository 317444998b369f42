//! Native functions callable from bytecode with `CallForeign`

use crate::value::Value;
use crate::{VmError, VmResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Signature of a native function
pub type ForeignFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// Registry of native functions by name
#[derive(Clone, Default)]
pub struct ForeignRegistry {
    functions: HashMap<String, Arc<ForeignFn>>,
}

impl ForeignRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing any previous entry
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Check whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Call `name` with `args`
    pub fn call(&self, name: &str, args: &[Value]) -> VmResult<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| VmError::UnknownForeign(name.to_string()))?;
        function(args).map_err(|message| VmError::Foreign {
            name: name.to_string(),
            message,
        })
    }
}

impl fmt::Debug for ForeignRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("ForeignRegistry")
            .field("functions", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_call() {
        let mut registry = ForeignRegistry::new();
        registry.register("double", |args| match args {
            [Value::Int(n)] => Ok(Value::Int(n * 2)),
            _ => Err("expected one int".to_string()),
        });

        assert!(registry.contains("double"));
        assert_eq!(registry.call("double", &[Value::Int(4)]).unwrap(), Value::Int(8));
        assert!(matches!(
            registry.call("double", &[]),
            Err(VmError::Foreign { message, .. }) if message == "expected one int"
        ));
        assert!(matches!(
            registry.call("missing", &[]),
            Err(VmError::UnknownForeign(name)) if name == "missing"
        ));
    }
}
