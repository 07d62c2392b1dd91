//! Analysis database
//!
//! Functions keyed by entry address and the cross-references between them.
//! All mutation goes through [`AnalysisMutation`]: each one is validated
//! against the current state before anything is changed, so a mutation is
//! either fully applied or not applied at all. Mutations are idempotent,
//! which lets a flush safely re-run entries retained by an earlier failure.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::BincoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub addr: u64,
    pub size: u64,
}

impl Function {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr - self.addr < self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XRefKind {
    Call,
    Jump,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct XRef {
    pub from: u64,
    pub to: u64,
    pub kind: XRefKind,
}

/// One analysis-database change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AnalysisMutation {
    /// Ensure a function exists at `addr` with the given bounds and name
    AddFunction { addr: u64, size: u64, name: String },
    /// Rename the function starting at `addr`
    RenameFunction { addr: u64, name: String },
    /// Record a reference whose target lies inside a known function
    AddXref { from: u64, to: u64, kind: XRefKind },
    /// Drop the function at `addr` and every reference into it
    RemoveFunction { addr: u64 },
}

/// Why a mutation was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("function name must not be empty")]
    EmptyName,
    #[error("function at {0:#x} has zero size")]
    ZeroSize(u64),
    #[error("no function starts at {0:#x}")]
    NoFunctionAt(u64),
    #[error("reference target {0:#x} is not inside any function")]
    TargetOutsideFunctions(u64),
}

impl Rejection {
    /// Error for a mutation applied directly by the primary task
    pub fn into_direct_error(self) -> BincoreError {
        match self {
            Rejection::NoFunctionAt(address) => BincoreError::FunctionNotFound { address },
            other => BincoreError::MalformedMutation {
                seq: 0,
                reason: other.to_string(),
            },
        }
    }

    /// Error for the queued mutation with sequence number `seq`
    pub fn into_queued_error(self, seq: u64) -> BincoreError {
        BincoreError::MalformedMutation {
            seq,
            reason: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisDb {
    functions: BTreeMap<u64, Function>,
    xrefs: BTreeSet<XRef>,
}

impl AnalysisDb {
    /// Check a mutation against the current state without applying it
    pub fn validate(&self, mutation: &AnalysisMutation) -> Result<(), Rejection> {
        match mutation {
            AnalysisMutation::AddFunction { addr, size, name } => {
                if name.is_empty() {
                    return Err(Rejection::EmptyName);
                }
                if *size == 0 {
                    return Err(Rejection::ZeroSize(*addr));
                }
                Ok(())
            }
            AnalysisMutation::RenameFunction { addr, name } => {
                if name.is_empty() {
                    return Err(Rejection::EmptyName);
                }
                if !self.functions.contains_key(addr) {
                    return Err(Rejection::NoFunctionAt(*addr));
                }
                Ok(())
            }
            AnalysisMutation::AddXref { to, .. } => {
                if self.function_containing(*to).is_none() {
                    return Err(Rejection::TargetOutsideFunctions(*to));
                }
                Ok(())
            }
            AnalysisMutation::RemoveFunction { .. } => Ok(()),
        }
    }

    /// Validate, then apply
    pub fn apply(&mut self, mutation: &AnalysisMutation) -> Result<(), Rejection> {
        self.validate(mutation)?;
        match mutation {
            AnalysisMutation::AddFunction { addr, size, name } => {
                self.functions.insert(
                    *addr,
                    Function {
                        name: name.clone(),
                        addr: *addr,
                        size: *size,
                    },
                );
            }
            AnalysisMutation::RenameFunction { addr, name } => {
                if let Some(function) = self.functions.get_mut(addr) {
                    function.name = name.clone();
                }
            }
            AnalysisMutation::AddXref { from, to, kind } => {
                self.xrefs.insert(XRef {
                    from: *from,
                    to: *to,
                    kind: *kind,
                });
            }
            AnalysisMutation::RemoveFunction { addr } => {
                if let Some(removed) = self.functions.remove(addr) {
                    self.xrefs.retain(|x| !removed.contains(x.to));
                }
            }
        }
        Ok(())
    }

    pub fn function_at(&self, addr: u64) -> Option<&Function> {
        self.functions.get(&addr)
    }

    /// The function whose range covers `addr`
    pub fn function_containing(&self, addr: u64) -> Option<&Function> {
        self.functions
            .range(..=addr)
            .rev()
            .map(|(_, f)| f)
            .find(|f| f.contains(addr))
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn xrefs_to(&self, addr: u64) -> Vec<XRef> {
        self.xrefs.iter().filter(|x| x.to == addr).copied().collect()
    }

    pub fn xrefs_from(&self, addr: u64) -> Vec<XRef> {
        self.xrefs.iter().filter(|x| x.from == addr).copied().collect()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn xref_count(&self) -> usize {
        self.xrefs.len()
    }
}
