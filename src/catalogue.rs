//! The gadget catalogue: an append-only, deduplicated,
//! queryable store.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::arch::RegisterId;
use crate::error::RopError;
use crate::gadget::{ArithOp, Gadget, Variant};

/// On-disk representation of one gadget, used by [`Catalogue::to_string`]
/// / [`Catalogue::from_string`]. Kept separate from [`Gadget`] so the
/// cache format is explicit and self-describing — enough that a stored
/// file can be reloaded under a different base address — rather than
/// relying on `Gadget`'s in-memory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedGadget {
    address: u64,
    variant: String,
    inputs: Vec<RegisterId>,
    output: Option<RegisterId>,
    params: Vec<i64>,
    clobbers: Vec<RegisterId>,
    stack_offset: u64,
    ip_in_stack_offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    base_address: u64,
    gadgets: Vec<CachedGadget>,
}

const CACHE_VERSION: u32 = 1;

fn variant_tag(v: Variant) -> String {
    match v {
        Variant::LoadConst => "LoadConst".into(),
        Variant::MoveReg => "MoveReg".into(),
        Variant::LoadMem => "LoadMem".into(),
        Variant::StoreMem => "StoreMem".into(),
        Variant::LoadMemJump => "LoadMemJump".into(),
        Variant::Jump => "Jump".into(),
        Variant::Arith(op) => format!("Arith:{op:?}"),
        Variant::LoadArith(op) => format!("LoadArith:{op:?}"),
        Variant::StoreArith(op) => format!("StoreArith:{op:?}"),
    }
}

fn parse_variant(tag: &str) -> Option<Variant> {
    use ArithOp::*;
    let parse_op = |s: &str| match s {
        "Add" => Some(Add),
        "Sub" => Some(Sub),
        "Mul" => Some(Mul),
        "And" => Some(And),
        "Or" => Some(Or),
        "Xor" => Some(Xor),
        _ => None,
    };
    if let Some((family, op)) = tag.split_once(':') {
        let op = parse_op(op)?;
        return match family {
            "Arith" => Some(Variant::Arith(op)),
            "LoadArith" => Some(Variant::LoadArith(op)),
            "StoreArith" => Some(Variant::StoreArith(op)),
            _ => None,
        };
    }
    match tag {
        "LoadConst" => Some(Variant::LoadConst),
        "MoveReg" => Some(Variant::MoveReg),
        "LoadMem" => Some(Variant::LoadMem),
        "StoreMem" => Some(Variant::StoreMem),
        "LoadMemJump" => Some(Variant::LoadMemJump),
        "Jump" => Some(Variant::Jump),
        _ => None,
    }
}

/// Element-wise optional match: `None` matches anything; `Some(x)`
/// requires exact equality with `x`.
pub type Filter<T> = Option<T>;

/// Append-only, deduplicated gadget store.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    gadgets: Vec<Gadget>,
    seen: HashSet<(Variant, Vec<RegisterId>, Option<RegisterId>, Vec<i64>, u64)>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    fn dedupe_key(g: &Gadget) -> (Variant, Vec<RegisterId>, Option<RegisterId>, Vec<i64>, u64) {
        (g.variant, g.inputs.clone(), g.output, g.params.clone(), g.address)
    }

    /// Insert a gadget, deduplicating by `(variant, inputs, output,
    /// params, address)`. Returns `true` if it was newly inserted.
    pub fn insert(&mut self, gadget: Gadget) -> bool {
        let key = Self::dedupe_key(&gadget);
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key);
        self.gadgets.push(gadget);
        true
    }

    pub fn len(&self) -> usize {
        self.gadgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
    }

    /// Iterate all gadgets in insertion order.
    pub fn for_each(&self) -> impl Iterator<Item = &Gadget> {
        self.gadgets.iter()
    }

    /// Iterate all gadgets of a given variant, in insertion order.
    pub fn for_each_of(&self, variant: Variant) -> impl Iterator<Item = &Gadget> {
        self.gadgets.iter().filter(move |g| g.variant == variant)
    }

    /// Best (lowest-complexity, ties broken by lower address) gadget
    /// matching all supplied constraints.
    pub fn find(
        &self,
        variant: Variant,
        inputs_filter: &[Filter<RegisterId>],
        output_filter: Filter<RegisterId>,
        no_clobber: &BTreeSet<RegisterId>,
    ) -> Option<&Gadget> {
        self.gadgets
            .iter()
            .filter(|g| g.variant == variant)
            .filter(|g| {
                if let Some(out) = output_filter {
                    if g.output != Some(out) {
                        return false;
                    }
                }
                true
            })
            .filter(|g| {
                if inputs_filter.is_empty() {
                    return true;
                }
                if g.inputs.len() < inputs_filter.len() {
                    return false;
                }
                inputs_filter
                    .iter()
                    .zip(g.inputs.iter())
                    .all(|(f, actual)| f.map(|expected| expected == *actual).unwrap_or(true))
            })
            .filter(|g| !g.clobbers_any_of(&no_clobber.iter().copied().collect::<Vec<_>>()))
            .min_by_key(|g| (g.complexity(), g.address))
    }

    /// Best `LoadMem` gadget with base = `SP` and `output = reg`.
    /// Lowest-complexity match wins, ties broken by lowest address,
    /// applied uniformly rather than picking the highest-complexity
    /// match by accident.
    pub fn find_load_stack(&self, sp: RegisterId, reg: RegisterId, no_clobber: &BTreeSet<RegisterId>) -> Option<&Gadget> {
        self.find(Variant::LoadMem, &[Some(sp)], Some(reg), no_clobber)
    }

    /// Best `LoadConst` gadget matching `reg` and `const`.
    pub fn find_load_const(&self, reg: RegisterId, constant: i64, no_clobber: &BTreeSet<RegisterId>) -> Option<&Gadget> {
        self.gadgets
            .iter()
            .filter(|g| g.variant == Variant::LoadConst && g.output == Some(reg) && g.params.first() == Some(&constant))
            .filter(|g| !g.clobbers_any_of(&no_clobber.iter().copied().collect::<Vec<_>>()))
            .min_by_key(|g| (g.complexity(), g.address))
    }

    /// Serialise to a deterministic, self-describing string.
    pub fn to_string_cached(&self, base_address: u64) -> Result<String, RopError> {
        let gadgets = self
            .gadgets
            .iter()
            .map(|g| CachedGadget {
                address: g.address,
                variant: variant_tag(g.variant),
                inputs: g.inputs.clone(),
                output: g.output,
                params: g.params.clone(),
                clobbers: g.clobbers.iter().copied().collect(),
                stack_offset: g.stack_offset,
                ip_in_stack_offset: g.ip_in_stack_offset,
            })
            .collect();
        let file = CacheFile { version: CACHE_VERSION, base_address, gadgets };
        Ok(serde_json::to_string(&file)?)
    }

    /// Parse a cache previously produced by [`Self::to_string_cached`],
    /// rebasing every gadget's address by `new_base - file.base_address`
    /// so a cache built against one load address can be reused after the
    /// binary relocates.
    pub fn from_string(data: &str, new_base: u64) -> Result<Self, RopError> {
        let file: CacheFile = serde_json::from_str(data)?;
        if file.version != CACHE_VERSION {
            return Err(RopError::CacheFormat(format!("unsupported cache version {}", file.version)));
        }
        let delta = new_base.wrapping_sub(file.base_address);
        let mut catalogue = Catalogue::new();
        for cg in file.gadgets {
            let variant = parse_variant(&cg.variant)
                .ok_or_else(|| RopError::CacheFormat(format!("unknown variant tag {}", cg.variant)))?;
            let gadget = Gadget {
                address: cg.address.wrapping_add(delta),
                variant,
                inputs: cg.inputs,
                output: cg.output,
                params: cg.params,
                clobbers: cg.clobbers.into_iter().collect(),
                stack_offset: cg.stack_offset,
                ip_in_stack_offset: cg.ip_in_stack_offset,
            };
            catalogue.insert(gadget);
        }
        Ok(catalogue)
    }
}
