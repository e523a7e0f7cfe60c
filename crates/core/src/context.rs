//! Variable scopes.
//!
//! A [`Context`] holds the ordinary variables of one flow or branch frame
//! plus a read-only view of the "magic" (global) variables every branch can
//! see. Cloning a context is a deep copy: a branch that mutates its context
//! never affects its parent or siblings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Name → value mapping used for variables, outputs and system properties.
pub type Variables = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    variables: Variables,
    #[serde(default)]
    magic_variables: Variables,
}

impl Context {
    pub fn new(variables: Variables) -> Self {
        Self {
            variables,
            magic_variables: Variables::new(),
        }
    }

    pub fn with_magic_variables(variables: Variables, magic_variables: Variables) -> Self {
        Self {
            variables,
            magic_variables,
        }
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn put_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn put_variables(&mut self, variables: Variables) {
        self.variables.extend(variables);
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    /// Ordinary variables of this frame.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Global constants shared (by copy) with every branch.
    pub fn magic_variables(&self) -> &Variables {
        &self.magic_variables
    }

    /// Look a name up in the ordinary variables first, then the globals.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables
            .get(name)
            .or_else(|| self.magic_variables.get(name))
    }
}
