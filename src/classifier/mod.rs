//! Gadget classifier.
//!
//! The classifier does not symbolically execute; it runs the IR
//! concretely on randomised seeds, observes the input→output relation,
//! and enumerates every algebraic relation the observed values could
//! witness (a [`Fact`]). False positives are eliminated by repeating with
//! fresh seeds and intersecting the candidate sets structurally across
//! [`crate::consts::NUM_VALIDATIONS`] rounds.

mod eval;

use std::collections::HashSet;

use strum::IntoEnumIterator;

use crate::arch::{Arch, RegisterId};
use crate::consts::{MAX_DISPLACEMENT, NUM_VALIDATIONS, STACK_FRAME_RANGE};
use crate::finder::Candidate;
use crate::gadget::{ArithOp, Gadget, Variant};
use crate::ir::Lifter;

use eval::RoundState;

/// A structurally-comparable observation from one round of emulation —
/// "this byte window could be the gadget `(variant, inputs, output,
/// params)`". Values, not objects: equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fact {
    variant: Variant,
    inputs: Vec<RegisterId>,
    output: Option<RegisterId>,
    params: Vec<i64>,
}

fn disp_plausible(disp: i64) -> bool {
    disp.unsigned_abs() <= MAX_DISPLACEMENT
}

fn read_acceptable(addr: u64, state: &RoundState, arch: &Arch) -> bool {
    let sp = state.sp_input;
    if addr.abs_diff(sp) <= STACK_FRAME_RANGE {
        return true;
    }
    let _ = arch;
    state.input_regs.values().any(|&v| disp_plausible(addr.wrapping_sub(v) as i64))
}

fn write_acceptable(addr: u64, val: u64, state: &RoundState) -> bool {
    for (&base_id, &base_val) in &state.input_regs {
        let disp = addr.wrapping_sub(base_val) as i64;
        if !disp_plausible(disp) {
            continue;
        }
        let _ = base_id;
        if state.input_regs.values().any(|&v| v == val) {
            return true;
        }
        if let Some(&old) = state.input_mem.get(&addr) {
            for &other in state.input_regs.values() {
                if ArithOp::iter().any(|op| op.apply(old, other) == val) {
                    return true;
                }
            }
        }
    }
    false
}

/// Enumerate every candidate fact the observed state could witness, or
/// `None` if the window touched memory in an inexplicable way (spec
/// §4.2's acceptable-memory-access table; any disqualifying access
/// rejects the whole candidate).
fn enumerate_facts(state: &RoundState, arch: &Arch) -> Option<Vec<Fact>> {
    for &addr in state.input_mem.keys() {
        if !read_acceptable(addr, state, arch) {
            return None;
        }
    }
    for (&addr, &val) in &state.output_mem {
        if !write_acceptable(addr, val, state) {
            return None;
        }
    }

    let mut facts = Vec::new();

    for (&o, &vo) in &state.output_regs {
        facts.push(Fact { variant: Variant::LoadConst, inputs: vec![], output: Some(o), params: vec![vo as i64] });

        for (&i, &vi) in &state.input_regs {
            if vo == vi {
                facts.push(Fact { variant: Variant::MoveReg, inputs: vec![i], output: Some(o), params: vec![] });
            }
            if o == arch.ip {
                let delta = vo.wrapping_sub(vi) as i64;
                facts.push(Fact { variant: Variant::Jump, inputs: vec![i], output: Some(arch.ip), params: vec![delta] });
            }
        }

        if let Some(&vi) = state.input_regs.get(&o) {
            for (&j, &vj) in &state.input_regs {
                if j == o {
                    continue;
                }
                for op in ArithOp::iter() {
                    if op.apply(vi, vj) == vo {
                        facts.push(Fact { variant: Variant::Arith(op), inputs: vec![o, j], output: Some(o), params: vec![] });
                    }
                }
            }
        }

        for (&addr, &vm) in &state.input_mem {
            for (&i, &vi) in &state.input_regs {
                let disp = addr.wrapping_sub(vi) as i64;
                if !disp_plausible(disp) {
                    continue;
                }
                if vo == vm {
                    facts.push(Fact { variant: Variant::LoadMem, inputs: vec![i], output: Some(o), params: vec![disp] });
                }
                if let Some(&acc_in) = state.input_regs.get(&o) {
                    for op in ArithOp::iter() {
                        if op.apply(acc_in, vm) == vo {
                            facts.push(Fact {
                                variant: Variant::LoadArith(op),
                                inputs: vec![o, i],
                                output: Some(o),
                                params: vec![disp],
                            });
                        }
                    }
                }
            }
        }
    }

    for (&addr, &val) in &state.output_mem {
        for (&ibase, &vbase) in &state.input_regs {
            let disp = addr.wrapping_sub(vbase) as i64;
            if !disp_plausible(disp) {
                continue;
            }
            for (&ival, &vval) in &state.input_regs {
                if ival == ibase {
                    continue;
                }
                if val == vval {
                    facts.push(Fact {
                        variant: Variant::StoreMem,
                        inputs: vec![ibase, ival],
                        output: None,
                        params: vec![disp],
                    });
                }
            }
            if let Some(&old) = state.input_mem.get(&addr) {
                for (&ival, &vval) in &state.input_regs {
                    for op in ArithOp::iter() {
                        if op.apply(old, vval) == val {
                            facts.push(Fact {
                                variant: Variant::StoreArith(op),
                                inputs: vec![ibase, ival],
                                output: None,
                                params: vec![disp],
                            });
                        }
                    }
                }
            }
        }
    }

    Some(facts)
}

/// Classify one candidate window, returning every gadget variant it
/// faithfully implements (possibly none).
pub fn classify(candidate: &Candidate, arch: &Arch, lifter: &dyn Lifter) -> Vec<Gadget> {
    let mut intersected: Option<HashSet<Fact>> = None;
    let mut stack_offset: Option<u64> = None;
    let mut last_written: HashSet<RegisterId> = HashSet::new();

    for round in 0..NUM_VALIDATIONS {
        let block = match lifter.lift(&candidate.bytes, candidate.address, arch.name) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(address = candidate.address, %e, "lift failure, discarding candidate");
                return Vec::new();
            }
        };
        let state = match eval::run_round(&block, arch, candidate.address, round) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(address = candidate.address, %e, "unsupported IR, discarding candidate");
                return Vec::new();
            }
        };

        let sp_after = state.output_regs.get(&arch.sp).copied().unwrap_or(state.sp_input);
        let signed_delta = sp_after as i64 - state.sp_input as i64;
        if signed_delta < 0 {
            tracing::debug!(address = candidate.address, "stack pointer decreased, discarding candidate");
            return Vec::new();
        }
        let this_offset = signed_delta as u64;
        match stack_offset {
            None => stack_offset = Some(this_offset),
            Some(prev) if prev != this_offset => {
                tracing::debug!(address = candidate.address, "stack offset disagreement across rounds");
                return Vec::new();
            }
            _ => {}
        }

        last_written = state.output_regs.keys().copied().collect();

        let facts = match enumerate_facts(&state, arch) {
            Some(f) => f,
            None => return Vec::new(),
        };
        let set: HashSet<Fact> = facts.into_iter().collect();
        intersected = Some(match intersected {
            None => set,
            Some(prev) => prev.intersection(&set).cloned().collect(),
        });
        if intersected.as_ref().map(HashSet::is_empty).unwrap_or(true) {
            return Vec::new();
        }
    }

    let facts = intersected.unwrap_or_default();
    let stack_offset = stack_offset.unwrap_or(0);
    post_classify(facts, stack_offset, &last_written, arch)
}

fn clobbers_for(output: Option<RegisterId>, written: &HashSet<RegisterId>, arch: &Arch) -> std::collections::BTreeSet<RegisterId> {
    written
        .iter()
        .copied()
        .filter(|&r| Some(r) != output && r != arch.ip && r != arch.sp && !arch.is_ignored(r))
        .collect()
}

/// Spec §4.2's post-classification filter: drop bare IP-output facts,
/// find each real candidate's terminator (stack-popped or
/// register-jumped), upgrade `LoadMem` to `LoadMemJump` where
/// appropriate, then reject anything violating the §3 invariants.
fn post_classify(facts: HashSet<Fact>, stack_offset: u64, written: &HashSet<RegisterId>, arch: &Arch) -> Vec<Gadget> {
    let ip_in_stack_offset = facts
        .iter()
        .find(|f| f.variant == Variant::LoadMem && f.output == Some(arch.ip) && f.inputs == [arch.sp])
        .map(|f| f.params[0] as u64);

    let ip_from_reg = facts
        .iter()
        .find(|f| f.variant == Variant::MoveReg && f.output == Some(arch.ip))
        .map(|f| f.inputs[0]);

    let mut gadgets = Vec::new();

    for fact in &facts {
        if fact.variant == Variant::Jump {
            let g = Gadget {
                address: 0,
                variant: Variant::Jump,
                inputs: fact.inputs.clone(),
                output: Some(arch.ip),
                params: fact.params.clone(),
                clobbers: clobbers_for(Some(arch.ip), written, arch),
                stack_offset,
                ip_in_stack_offset: None,
            };
            gadgets.push(g);
            continue;
        }

        if fact.output == Some(arch.ip) {
            continue;
        }

        let (variant, inputs, ip_off) = if let Some(off) = ip_in_stack_offset {
            (fact.variant, fact.inputs.clone(), Some(off))
        } else if let Some(r) = ip_from_reg {
            if fact.variant == Variant::LoadMem && fact.params.first().is_some_and(|&d| (d as u64) < stack_offset) {
                let mut inputs = fact.inputs.clone();
                inputs.push(r);
                (Variant::LoadMemJump, inputs, None)
            } else {
                continue;
            }
        } else {
            continue;
        };

        let g = Gadget {
            address: 0,
            variant,
            inputs,
            output: fact.output,
            params: fact.params.clone(),
            clobbers: clobbers_for(fact.output, written, arch),
            stack_offset,
            ip_in_stack_offset: ip_off,
        };
        gadgets.push(g);
    }

    gadgets.into_iter().filter(|g| validate_for_post_filter(g, arch).is_ok()).collect()
}

fn validate_for_post_filter(g: &Gadget, arch: &Arch) -> Result<(), crate::gadget::GadgetError> {
    if g.variant == Variant::LoadMemJump {
        // Terminates via register jump, not a stack-consumed next address;
        // exempted from the ip_in_stack_offset requirement alongside Jump.
        return Ok(());
    }
    g.validate(arch)
}

/// Classify every candidate the [`crate::finder`] produces for a segment,
/// inserting the results into `catalogue`, stamping in each gadget's real
/// address as it is inserted.
pub fn classify_all(
    candidates: impl Iterator<Item = Candidate>,
    arch: &Arch,
    lifter: &dyn Lifter,
    catalogue: &mut crate::catalogue::Catalogue,
) {
    for candidate in candidates {
        for mut gadget in classify(&candidate, arch, lifter) {
            gadget.address = candidate.address;
            catalogue.insert(gadget);
        }
    }
}
