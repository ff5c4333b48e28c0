//! Value Scope
//!
//! Every activity instance owns a fixed vector of slots, one per variable the
//! linker found in its definition (params, then location params, then locals).
//! A slot either holds a value of its own or aliases a slot owned by a caller:
//!
//! - input params bound to a bare caller variable are read-only aliases, so the
//!   callee always reads the caller's current value
//! - location params are writable aliases; writes land in the caller's slot
//!
//! Aliases always point at the ultimate owner slot, never at another alias,
//! so reads and writes resolve in one hop.

use serde::{Deserialize, Serialize};

use super::errors::{self, ErrorInfo};
use super::types::Val;

pub type InstanceId = usize;

/// Address of a slot inside a specific instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    pub instance: InstanceId,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "t")]
pub enum Slot {
    /// Declared but never assigned
    #[default]
    Unbound,
    Value { v: Val },
    Alias { target: SlotRef, writable: bool },
}

/// The slot vector of one instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    slots: Vec<Slot>,
}

impl Scope {
    /// A scope with `len` unbound slots
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: vec![Slot::Unbound; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, slot: u32) -> Result<&Slot, ErrorInfo> {
        self.slots.get(slot as usize).ok_or_else(|| {
            ErrorInfo::internal(format!("slot {} out of range ({} slots)", slot, self.slots.len()))
        })
    }

    pub fn set(&mut self, slot: u32, value: Slot) -> Result<(), ErrorInfo> {
        let len = self.slots.len();
        let entry = self
            .slots
            .get_mut(slot as usize)
            .ok_or_else(|| ErrorInfo::internal(format!("slot {} out of range ({} slots)", slot, len)))?;
        *entry = value;
        Ok(())
    }

    /// Reset a local slot to `Unbound` or a fresh value (used by `var`)
    pub fn declare(&mut self, slot: u32, value: Option<Val>) -> Result<(), ErrorInfo> {
        let fresh = match value {
            Some(v) => Slot::Value { v },
            None => Slot::Unbound,
        };
        self.set(slot, fresh)
    }
}

/// Read a slot that is known to be owned (not an alias)
pub(crate) fn read_owned(slot: &Slot, name: &str) -> Result<Val, ErrorInfo> {
    match slot {
        Slot::Value { v } => Ok(v.clone()),
        Slot::Unbound => Err(ErrorInfo::new(
            errors::UNBOUND_VARIABLE,
            format!("Variable '{}' is read before it is bound", name),
        )),
        Slot::Alias { .. } => Err(ErrorInfo::internal(format!(
            "alias chain detected while reading '{}'",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_resets_slot() {
        let mut scope = Scope::with_len(2);
        scope.declare(1, Some(Val::Num(3.0))).unwrap();
        assert_eq!(scope.slot(1).unwrap(), &Slot::Value { v: Val::Num(3.0) });

        scope.declare(1, None).unwrap();
        assert_eq!(scope.slot(1).unwrap(), &Slot::Unbound);
    }

    #[test]
    fn test_unbound_read_is_scope_error() {
        let err = read_owned(&Slot::Unbound, "speed").unwrap_err();
        assert_eq!(err.code, errors::UNBOUND_VARIABLE);
        assert!(err.message.contains("speed"));
    }

    #[test]
    fn test_out_of_range_slot() {
        let scope = Scope::with_len(1);
        assert_eq!(scope.slot(4).unwrap_err().code, errors::INTERNAL_ERROR);
    }
}
