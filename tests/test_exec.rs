use ooosim::{
    inst::ArchReg,
    mem::{Addr, DataMemory},
    parse_and_exec,
    regs::PRF_SLOTS,
};

const BUDGET: u64 = 10_000;

#[test]
fn test_roundtrip() {
    let engine = parse_and_exec("roundtrip", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R1), 5);
    assert_eq!(engine.arch_reg(ArchReg::R2), 10);
}

#[test]
fn test_memory_ordering() {
    // The load must observe the just-stored value, never the stale word,
    // even though both go through the pooled integer unit first.
    let engine = parse_and_exec("memory", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R3), 42);
    assert_eq!(engine.mem().read(Addr(10)), 42);
}

#[test]
fn test_branch_discard() {
    // Wrong-path instructions between the taken BZ and its resolution leave
    // no architectural trace.
    let engine = parse_and_exec("branch", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R1), 0);
    assert_eq!(engine.arch_reg(ArchReg::R2), 0);
}

#[test]
fn test_counted_loop() {
    let engine = parse_and_exec("loop", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R1), 15);
    assert_eq!(engine.arch_reg(ArchReg::R2), 0);
}

#[test]
fn test_forwarding_chain() {
    let engine = parse_and_exec("chain", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R4), 4);
    // Each link waits one cycle on its producer at most; anything slower
    // means a value failed to forward and limped in through commit.
    assert!(engine.cycles() < 40, "took {} cycles", engine.cycles());
}

#[test]
fn test_jump() {
    let engine = parse_and_exec("jump", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R3), 0);
    assert_eq!(engine.arch_reg(ArchReg::R4), 7);
}

#[test]
fn test_jal_link_value() {
    let engine = parse_and_exec("jal", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R2), 4008);
    assert_eq!(engine.arch_reg(ArchReg::R5), 8016);
    assert_eq!(engine.arch_reg(ArchReg::R3), 0);
}

#[test]
fn test_register_pressure() {
    // 65 renames against 40 slots: completes only if commit and flush give
    // slots back.
    let engine = parse_and_exec("pressure", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R9), 10);
    assert_eq!(engine.arch_reg(ArchReg::R2), 0);

    // Flush completeness: once halted, every slot is either free or still
    // backing a rename-map entry.
    assert_eq!(
        engine.free_phys_slots() + engine.referenced_phys_slots(),
        PRF_SLOTS
    );
}

#[test]
fn test_mul_serializes() {
    let engine = parse_and_exec("mul", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R3), 42);
    assert_eq!(engine.arch_reg(ArchReg::R4), 252);
    assert_eq!(engine.arch_reg(ArchReg::R5), 294);
}

#[test]
fn test_store_value_arrives_late() {
    let engine = parse_and_exec("store_late_value", DataMemory::new(), BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.mem().read(Addr(5)), 15);
    assert_eq!(engine.arch_reg(ArchReg::R4), 15);
}

#[test]
fn test_initial_memory_image() {
    let mut mem = DataMemory::new();
    mem.write(Addr(7), 123);

    let engine = parse_and_exec("init_mem", mem, BUDGET);
    assert!(engine.is_halted());
    assert_eq!(engine.arch_reg(ArchReg::R1), 123);
}

#[test]
fn test_retire_counts() {
    // Wrong-path work never counts as retired.
    let engine = parse_and_exec("branch", DataMemory::new(), BUDGET);
    assert_eq!(engine.insts_retired(), 3); // MOVC, BZ, HALT

    let engine = parse_and_exec("roundtrip", DataMemory::new(), BUDGET);
    assert_eq!(engine.insts_retired(), 3);
}
