//! Concrete byte-to-gadget vectors across amd64, ARM and PPC.
//!
//! Since there is no disassembler/lifter wired into this crate, each
//! vector supplies its IR directly (the same fixed-lifter style used by
//! the classifier's own unit tests) rather than real machine bytes, and
//! asserts the gadget(s) [`classify`] recovers from it.

use std::collections::BTreeSet;

use rop_compiler::arch::Arch;
use rop_compiler::classifier::classify;
use rop_compiler::error::LiftError;
use rop_compiler::finder::Candidate;
use rop_compiler::gadget::{ArithOp, Variant};
use rop_compiler::ir::{BinOp, Expr, IrBlock, Lifter, Stmt};

struct FixedLifter(IrBlock);
impl Lifter for FixedLifter {
    fn lift(&self, _bytes: &[u8], _address: u64, _arch_name: &str) -> Result<IrBlock, LiftError> {
        Ok(self.0.clone())
    }
}

fn classify_one(arch: &Arch, block: IrBlock) -> Vec<rop_compiler::gadget::Gadget> {
    let lifter = FixedLifter(block);
    let candidate = Candidate { bytes: vec![0x00], address: 0x40000 };
    classify(&candidate, arch, &lifter)
}

fn ret_tail(arch: &Arch) -> Vec<Stmt> {
    vec![
        Stmt::Put { reg: arch.ip, expr: Expr::Load(Box::new(Expr::Get(arch.sp))) },
        Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(8))) },
    ]
}

#[test]
fn amd64_jmp_rax() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let block = IrBlock { stmts: vec![Stmt::Put { reg: arch.ip, expr: Expr::Get(rax) }] };
    let gadgets = classify_one(&arch, block);
    let g = gadgets.iter().find(|g| g.variant == Variant::Jump).expect("Jump(rax)");
    assert_eq!(g.inputs, vec![rax]);
    assert_eq!(g.stack_offset, 0);
}

#[test]
fn amd64_xchg_rbx_rax_ret() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let rbx = arch.register_id("rbx").unwrap();
    let mut stmts = vec![
        Stmt::WrTmp { tmp: 0, expr: Expr::Get(rax) },
        Stmt::WrTmp { tmp: 1, expr: Expr::Get(rbx) },
        Stmt::Put { reg: rax, expr: Expr::RdTmp(1) },
        Stmt::Put { reg: rbx, expr: Expr::RdTmp(0) },
    ];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });

    let to_rax = gadgets.iter().find(|g| g.variant == Variant::MoveReg && g.output == Some(rax)).expect("rax <- rbx");
    assert_eq!(to_rax.inputs, vec![rbx]);
    assert_eq!(to_rax.stack_offset, 8);
    assert_eq!(to_rax.ip_in_stack_offset, Some(0));
    assert!(to_rax.clobbers.contains(&rbx));

    let to_rbx = gadgets.iter().find(|g| g.variant == Variant::MoveReg && g.output == Some(rbx)).expect("rbx <- rax");
    assert_eq!(to_rbx.inputs, vec![rax]);
    assert!(to_rbx.clobbers.contains(&rax));
}

#[test]
fn amd64_mov_rbx_rcx_ret() {
    let arch = Arch::amd64();
    let rbx = arch.register_id("rbx").unwrap();
    let rcx = arch.register_id("rcx").unwrap();
    let mut stmts = vec![Stmt::Put { reg: rbx, expr: Expr::Get(rcx) }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets.iter().find(|g| g.variant == Variant::MoveReg && g.output == Some(rbx)).expect("MoveReg(rcx -> rbx)");
    assert_eq!(g.inputs, vec![rcx]);
    assert_eq!(g.stack_offset, 8);
    assert_eq!(g.ip_in_stack_offset, Some(0));
    assert!(g.clobbers.is_empty());
}

#[test]
fn amd64_movabs_rbx_imm_ret() {
    let arch = Arch::amd64();
    let rbx = arch.register_id("rbx").unwrap();
    const IMM: u64 = 0x8899AABBCCDDEEFF;
    let mut stmts = vec![Stmt::Put { reg: rbx, expr: Expr::Const(IMM) }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets.iter().find(|g| g.variant == Variant::LoadConst && g.output == Some(rbx)).expect("LoadConst(rbx)");
    assert_eq!(g.params, vec![IMM as i64]);
    assert_eq!(g.stack_offset, 8);
}

#[test]
fn amd64_add_rbx_rax_ret() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let rbx = arch.register_id("rbx").unwrap();
    let mut stmts = vec![Stmt::Put {
        reg: rbx,
        expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(rbx)), Box::new(Expr::Get(rax))),
    }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets.iter().find(|g| g.variant == Variant::Arith(ArithOp::Add) && g.output == Some(rbx)).expect("Arith(Add, rbx, rax)");
    assert_eq!(g.inputs, vec![rbx, rax]);
    assert_eq!(g.stack_offset, 8);
}

#[test]
fn amd64_pop_rdi_ret() {
    let arch = Arch::amd64();
    let rdi = arch.register_id("rdi").unwrap();
    let block = IrBlock {
        stmts: vec![
            Stmt::Put { reg: rdi, expr: Expr::Load(Box::new(Expr::Get(arch.sp))) },
            Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(8))) },
        ]
        .into_iter()
        .chain(ret_tail(&arch))
        .collect(),
    };
    let gadgets = classify_one(&arch, block);
    let g = gadgets.iter().find(|g| g.variant == Variant::LoadMem && g.output == Some(rdi)).expect("LoadMem(sp -> rdi)");
    assert_eq!(g.stack_offset, 16);
    assert_eq!(g.ip_in_stack_offset, Some(8));
    assert_eq!(g.params, vec![0]);
}

#[test]
fn amd64_mov_rax_from_displaced_and_plain_load() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let rbx = arch.register_id("rbx").unwrap();
    let rdi = arch.register_id("rdi").unwrap();

    // mov rax, [rbx+0x8]; ret
    let mut stmts = vec![Stmt::Put {
        reg: rax,
        expr: Expr::Load(Box::new(Expr::Binop(BinOp::Add, Box::new(Expr::Get(rbx)), Box::new(Expr::Const(8))))),
    }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets.iter().find(|g| g.variant == Variant::LoadMem && g.output == Some(rax) && g.inputs == [rbx]).expect("LoadMem(rbx+8 -> rax)");
    assert_eq!(g.params, vec![8]);

    // mov rax, [rdi]; ret
    let mut stmts = vec![Stmt::Put { reg: rax, expr: Expr::Load(Box::new(Expr::Get(rdi))) }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets.iter().find(|g| g.variant == Variant::LoadMem && g.output == Some(rax) && g.inputs == [rdi]).expect("LoadMem(rdi -> rax)");
    assert_eq!(g.params, vec![0]);
}

#[test]
fn amd64_store_rax_into_rbx_plain_and_displaced() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let rbx = arch.register_id("rbx").unwrap();

    // mov [rbx], rax; ret
    let mut stmts = vec![Stmt::Store { addr: Expr::Get(rbx), data: Expr::Get(rax) }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets
        .iter()
        .find(|g| g.variant == Variant::StoreMem && g.inputs == [rbx, rax])
        .expect("StoreMem(rbx <- rax, disp 0)");
    assert_eq!(g.params, vec![0]);

    // mov [rbx+0x8], rax; ret
    let mut stmts = vec![Stmt::Store {
        addr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(rbx)), Box::new(Expr::Const(8))),
        data: Expr::Get(rax),
    }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets
        .iter()
        .find(|g| g.variant == Variant::StoreMem && g.inputs == [rbx, rax] && g.params == vec![8])
        .expect("StoreMem(rbx+8 <- rax)");
    assert_eq!(g.stack_offset, 8);
}

#[test]
fn amd64_store_rax_into_rsp_displaced() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let mut stmts = vec![Stmt::Store {
        addr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(8))),
        data: Expr::Get(rax),
    }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets
        .iter()
        .find(|g| g.variant == Variant::StoreMem && g.inputs == [arch.sp, rax])
        .expect("StoreMem(sp+8 <- rax)");
    assert_eq!(g.params, vec![8]);
}

#[test]
fn amd64_add_rax_from_displaced_rbx_load() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let rbx = arch.register_id("rbx").unwrap();
    let mut stmts = vec![Stmt::Put {
        reg: rax,
        expr: Expr::Binop(
            BinOp::Add,
            Box::new(Expr::Get(rax)),
            Box::new(Expr::Load(Box::new(Expr::Binop(BinOp::Add, Box::new(Expr::Get(rbx)), Box::new(Expr::Const(8)))))),
        ),
    }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets
        .iter()
        .find(|g| g.variant == Variant::LoadArith(ArithOp::Add) && g.output == Some(rax))
        .expect("LoadArith(Add, rax, [rbx+8])");
    assert_eq!(g.inputs, vec![rax, rbx]);
    assert_eq!(g.params, vec![8]);
}

#[test]
fn amd64_store_add_into_displaced_rbx() {
    let arch = Arch::amd64();
    let rax = arch.register_id("rax").unwrap();
    let rbx = arch.register_id("rbx").unwrap();
    let addr = Expr::Binop(BinOp::Sub, Box::new(Expr::Get(rbx)), Box::new(Expr::Const(8)));
    let mut stmts = vec![Stmt::Store {
        addr: addr.clone(),
        data: Expr::Binop(BinOp::Add, Box::new(Expr::Load(Box::new(addr))), Box::new(Expr::Get(rax))),
    }];
    stmts.extend(ret_tail(&arch));
    let gadgets = classify_one(&arch, IrBlock { stmts });
    let g = gadgets
        .iter()
        .find(|g| g.variant == Variant::StoreArith(ArithOp::Add) && g.inputs == [rbx, rax])
        .expect("StoreArith(Add, [rbx-8], rax)");
    assert_eq!(g.params, vec![-8]);
}

#[test]
fn amd64_pop_rcx_mov_rbx_mov_rcx_imm_ret() {
    let arch = Arch::amd64();
    let rbx = arch.register_id("rbx").unwrap();
    let rcx = arch.register_id("rcx").unwrap();
    let stmts = vec![
        Stmt::WrTmp { tmp: 0, expr: Expr::Load(Box::new(Expr::Get(arch.sp))) },
        Stmt::Put { reg: rcx, expr: Expr::RdTmp(0) },
        Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(8))) },
        Stmt::Put { reg: rbx, expr: Expr::Get(rcx) },
        Stmt::Put { reg: rcx, expr: Expr::Const(5) },
        Stmt::Put { reg: arch.ip, expr: Expr::Load(Box::new(Expr::Get(arch.sp))) },
        Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(8))) },
    ];
    let gadgets = classify_one(&arch, IrBlock { stmts });

    let load = gadgets.iter().find(|g| g.variant == Variant::LoadMem && g.output == Some(rbx)).expect("LoadMem(sp -> rbx)");
    assert_eq!(load.stack_offset, 16);
    assert_eq!(load.ip_in_stack_offset, Some(8));
    assert!(load.clobbers.contains(&rcx));

    let konst = gadgets.iter().find(|g| g.variant == Variant::LoadConst && g.output == Some(rcx)).expect("LoadConst(rcx <- 5)");
    assert_eq!(konst.params, vec![5]);
    assert!(konst.clobbers.contains(&rbx));
}

#[test]
fn arm_pop_r3_pc() {
    let arch = Arch::arm();
    let r3 = arch.register_id("r3").unwrap();
    let block = IrBlock {
        stmts: vec![
            Stmt::Put { reg: r3, expr: Expr::Load(Box::new(Expr::Get(arch.sp))) },
            Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(4))) },
            Stmt::Put { reg: arch.ip, expr: Expr::Load(Box::new(Expr::Get(arch.sp))) },
            Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(4))) },
        ],
    };
    let gadgets = classify_one(&arch, block);
    let g = gadgets.iter().find(|g| g.variant == Variant::LoadMem && g.output == Some(r3)).expect("pop{r3,pc}");
    assert_eq!(g.stack_offset, 8);
    assert_eq!(g.ip_in_stack_offset, Some(4));
}

#[test]
fn arm_mov_r0_r2_pop_pc() {
    let arch = Arch::arm();
    let r0 = arch.register_id("r0").unwrap();
    let r2 = arch.register_id("r2").unwrap();
    let block = IrBlock {
        stmts: vec![
            Stmt::Put { reg: r0, expr: Expr::Get(r2) },
            Stmt::Put { reg: arch.ip, expr: Expr::Load(Box::new(Expr::Get(arch.sp))) },
            Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(4))) },
        ],
    };
    let gadgets = classify_one(&arch, block);
    let g = gadgets.iter().find(|g| g.variant == Variant::MoveReg && g.output == Some(r0)).expect("mov r0, r2; pop {pc}");
    assert_eq!(g.inputs, vec![r2]);
    assert_eq!(g.stack_offset, 4);
    assert_eq!(g.ip_in_stack_offset, Some(0));
}

#[test]
fn arm_pop_multi_register_block_with_pc() {
    let arch = Arch::arm();
    let regs: Vec<_> = ["r4", "r5", "r6", "r7", "r8", "r9", "r10"].iter().map(|n| arch.register_id(n).unwrap()).collect();
    let mut stmts: Vec<Stmt> = regs
        .iter()
        .enumerate()
        .map(|(i, &r)| Stmt::Put {
            reg: r,
            expr: Expr::Load(Box::new(Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const((i * 4) as u64))))),
        })
        .collect();
    stmts.push(Stmt::Put {
        reg: arch.ip,
        expr: Expr::Load(Box::new(Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(0x1c))))),
    });
    stmts.push(Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(0x20))) });

    let gadgets = classify_one(&arch, IrBlock { stmts });

    for (i, &r) in regs.iter().enumerate() {
        let g = gadgets.iter().find(|g| g.variant == Variant::LoadMem && g.output == Some(r)).unwrap_or_else(|| panic!("pop slot for {i}"));
        assert_eq!(g.stack_offset, 0x20);
        assert_eq!(g.ip_in_stack_offset, Some(0x1c));
        assert_eq!(g.params, vec![(i * 4) as i64]);
        let expected_clobbers: BTreeSet<_> = regs.iter().copied().filter(|&o| o != r).collect();
        assert_eq!(g.clobbers, expected_clobbers);
    }
}

#[test]
fn arm_pop_reglist_with_lr_then_bx_r12() {
    let arch = Arch::arm();
    let r12 = arch.register_id("r12").unwrap();
    let lr = arch.lr.unwrap();
    let popped: Vec<_> = ["r0", "r1", "r2", "r3", "r4"].iter().map(|n| arch.register_id(n).unwrap()).chain(std::iter::once(lr)).collect();

    let mut stmts: Vec<Stmt> = popped
        .iter()
        .enumerate()
        .map(|(i, &r)| Stmt::Put {
            reg: r,
            expr: Expr::Load(Box::new(Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const((i * 4) as u64))))),
        })
        .collect();
    stmts.push(Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(0x18))) });
    stmts.push(Stmt::Put { reg: arch.ip, expr: Expr::Get(r12) });

    let gadgets = classify_one(&arch, IrBlock { stmts });

    for (i, &r) in popped.iter().enumerate() {
        let g = gadgets
            .iter()
            .find(|g| g.variant == Variant::LoadMemJump && g.output == Some(r))
            .unwrap_or_else(|| panic!("LoadMemJump slot {i}"));
        assert_eq!(g.inputs, vec![arch.sp, r12]);
        assert_eq!(g.params, vec![(i * 4) as i64]);
        assert_eq!(g.ip_in_stack_offset, None);
        assert_eq!(g.stack_offset, 0x18);
    }

    let jump = gadgets.iter().find(|g| g.variant == Variant::Jump).expect("Jump(r12 -> pc)");
    assert_eq!(jump.inputs, vec![r12]);
    let expected_clobbers: BTreeSet<_> = popped.iter().copied().collect();
    assert_eq!(jump.clobbers, expected_clobbers);
}

#[test]
fn ppc_load_then_direct_link_return() {
    // Adapted to a directly stack-terminated return (our classifier only
    // chains ip through one register hop; the two-hop mtlr/blr sequence
    // this was modelled on isn't representable that way).
    let arch = Arch::ppc();
    let r4 = arch.register_id("r4").unwrap();
    let block = IrBlock {
        stmts: vec![
            Stmt::Put { reg: r4, expr: Expr::Load(Box::new(Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(8))))) },
            Stmt::Put { reg: arch.ip, expr: Expr::Load(Box::new(Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(4))))) },
            Stmt::Put { reg: arch.sp, expr: Expr::Binop(BinOp::Add, Box::new(Expr::Get(arch.sp)), Box::new(Expr::Const(16))) },
        ],
    };
    let gadgets = classify_one(&arch, block);
    let g = gadgets.iter().find(|g| g.variant == Variant::LoadMem && g.output == Some(r4)).expect("LoadMem(sp+8 -> r4)");
    assert_eq!(g.stack_offset, 16);
    assert_eq!(g.ip_in_stack_offset, Some(4));
    assert_eq!(g.params, vec![8]);
}
