//! Activity instances
//!
//! Instances live in an arena indexed by `InstanceId`. Released ids are reused,
//! so an id is only meaningful while its owner frame is alive.

use serde::{Deserialize, Serialize};

use super::defer::DeferStack;
use super::errors::{self, ErrorInfo};
use super::scope::{read_owned, InstanceId, Scope, Slot, SlotRef};
use super::types::ast::DefId;
use super::types::Val;

/// One activation record of a running activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub def: DefId,
    pub parent: Option<InstanceId>,
    /// Root is depth 0
    pub depth: usize,
    pub scope: Scope,
    pub defers: DeferStack,
    /// Set by `return`/`exit`
    pub result: Val,
    /// Slot names, for error messages
    #[serde(skip)]
    pub names: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InstanceArena {
    entries: Vec<Option<Instance>>,
    free: Vec<usize>,
}

impl InstanceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, instance: Instance) -> InstanceId {
        match self.free.pop() {
            Some(id) => {
                self.entries[id] = Some(instance);
                id
            }
            None => {
                self.entries.push(Some(instance));
                self.entries.len() - 1
            }
        }
    }

    pub fn release(&mut self, id: InstanceId) -> Option<Instance> {
        let taken = self.entries.get_mut(id).and_then(Option::take);
        if taken.is_some() {
            self.free.push(id);
        }
        taken
    }

    pub fn get(&self, id: InstanceId) -> Result<&Instance, ErrorInfo> {
        self.entries
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| ErrorInfo::internal(format!("instance {} is not alive", id)))
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Result<&mut Instance, ErrorInfo> {
        self.entries
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| ErrorInfo::internal(format!("instance {} is not alive", id)))
    }

    /// Number of live instances
    pub fn live(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
    }

    fn name_of(&self, r: SlotRef) -> String {
        self.get(r.instance)
            .ok()
            .and_then(|i| i.names.get(r.slot as usize).cloned())
            .unwrap_or_else(|| format!("#{}", r.slot))
    }

    /// Follow an alias to the owning slot; the bool says whether writes are allowed
    pub fn resolve(&self, instance: InstanceId, slot: u32) -> Result<(SlotRef, bool), ErrorInfo> {
        match self.get(instance)?.scope.slot(slot)? {
            Slot::Alias { target, writable } => Ok((*target, *writable)),
            _ => Ok((SlotRef { instance, slot }, true)),
        }
    }

    pub fn read(&self, instance: InstanceId, slot: u32) -> Result<Val, ErrorInfo> {
        let (owner, _) = self.resolve(instance, slot)?;
        let value = self.get(owner.instance)?.scope.slot(owner.slot)?;
        read_owned(value, &self.name_of(owner))
    }

    pub fn write(&mut self, instance: InstanceId, slot: u32, value: Val) -> Result<(), ErrorInfo> {
        let (owner, writable) = self.resolve(instance, slot)?;
        if !writable {
            return Err(ErrorInfo::new(
                errors::READ_ONLY_BINDING,
                format!(
                    "Cannot assign to input parameter '{}'",
                    self.name_of(SlotRef { instance, slot })
                ),
            ));
        }
        self.write_ref(owner, value)
    }

    /// Write directly to an owner slot resolved earlier (location outputs)
    pub fn write_ref(&mut self, owner: SlotRef, value: Val) -> Result<(), ErrorInfo> {
        self.get_mut(owner.instance)?
            .scope
            .set(owner.slot, Slot::Value { v: value })
    }

    /// Alias to bind a callee location parameter to the caller's `slot`
    pub fn location_alias(&self, caller: InstanceId, slot: u32) -> Result<Slot, ErrorInfo> {
        let (target, writable) = self.resolve(caller, slot)?;
        if !writable {
            return Err(ErrorInfo::new(
                errors::READ_ONLY_BINDING,
                format!(
                    "Input parameter '{}' cannot be passed as a location",
                    self.name_of(SlotRef {
                        instance: caller,
                        slot
                    })
                ),
            ));
        }
        Ok(Slot::Alias {
            target,
            writable: true,
        })
    }

    /// Read-through alias for an input parameter bound to the caller's `slot`
    pub fn input_alias(&self, caller: InstanceId, slot: u32) -> Result<Slot, ErrorInfo> {
        let (target, _) = self.resolve(caller, slot)?;
        Ok(Slot::Alias {
            target,
            writable: false,
        })
    }
}
