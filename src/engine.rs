use hashbrown::HashMap;

use crate::{
    epoch::{Epoch, EpochTracker},
    fu::{alu, FuncUnit},
    fwd::ForwardBus,
    inst::{ArchReg, FuClass, Inst, Opcode, Tag},
    iq::{IqEntry, IssueQueue, IQ_SLOTS},
    lsq::{LoadStoreQueue, LsqEntry, LSQ_SLOTS},
    mem::{Addr, DataMemory},
    program::{Program, INST_BYTES, PC_BASE},
    regs::{PhysReg, PrfEntry, RegFile, Rollback},
    rob::{ReorderBuffer, RobStatus, ROB_SLOTS},
};

/// A source value as seen by an in-flight instruction. `Absent` operands
/// (a MOVC literal slot, a branch's unused side) are trivially ready.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operand {
    Absent,
    Ready { val: i32, zero: bool },
    Pending(PhysReg),
}

impl Operand {
    pub fn is_ready(&self) -> bool {
        !matches!(self, Operand::Pending(_))
    }

    pub fn value(&self) -> i32 {
        match self {
            Operand::Ready { val, .. } => *val,
            _ => 0,
        }
    }

    pub fn zero_flag(&self) -> bool {
        matches!(self, Operand::Ready { zero: true, .. })
    }

    /// Snoop the bus for a pending value; fall back to the register file,
    /// whose slot goes valid once the producer commits.
    fn refresh(&mut self, bus: &ForwardBus, regs: &RegFile) {
        if let Operand::Pending(phys) = *self {
            if let Some(b) = bus.probe(phys) {
                *self = Operand::Ready {
                    val: b.val,
                    zero: b.zero,
                };
            } else if let PrfEntry::Ready { val, zero } = regs.read(phys) {
                *self = Operand::Ready { val, zero };
            }
        }
    }
}

/// The mutable per-instruction record threaded through every structure.
/// IQ/LSQ/ROB entries refer to it by tag; this is the only copy.
#[derive(Debug, Clone)]
pub struct Instance {
    pub tag: Tag,
    pub pc: u32,
    pub inst: Inst,
    pub epoch: Epoch,
    /// For control transfers, the generation this instruction opened at
    /// rename; everything tagged at or above it is flushed on a taken
    /// transfer.
    pub flush_epoch: Option<Epoch>,
    pub dst: Option<PhysReg>,
    pub rollback: Rollback,
    pub src1: Operand,
    pub src2: Operand,
    pub result: Option<i32>,
    pub mem_addr: Option<Addr>,
    /// Conditional branches hold the flag-mapping pin from rename until they
    /// resolve or are annulled.
    pub holds_flag_pin: bool,
}

#[derive(Debug, Copy, Clone)]
struct Redirect {
    target: u32,
    epoch: Epoch,
}

/// One retirement waiting to land in the back rename map next cycle.
#[derive(Debug, Copy, Clone)]
struct MirrorOp {
    rd: ArchReg,
    slot: PhysReg,
    moves_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub insts_retired: u64,
    pub halted: bool,
}

#[derive(Debug, Clone)]
pub struct Engine {
    prog: Program,
    mem: DataMemory,
    regs: RegFile,
    iq: IssueQueue,
    lsq: LoadStoreQueue,
    rob: ReorderBuffer,
    bus: ForwardBus,
    epochs: EpochTracker,
    mul_unit: FuncUnit,
    mem_unit: FuncUnit,
    insts: HashMap<Tag, Instance>,
    fetch_pc: u32,
    fetch_latch: Option<(u32, Inst)>,
    decode_latch: Option<Tag>,
    redirect: Option<Redirect>,
    pending_mirror: Vec<MirrorOp>,
    halted: bool,
    next_tag: u64,
    cycle: u64,
    retired: u64,
}

impl Engine {
    pub fn new(prog: Program) -> Self {
        Self::with_memory(prog, DataMemory::new())
    }

    pub fn with_memory(prog: Program, mem: DataMemory) -> Self {
        Self {
            prog,
            mem,
            regs: RegFile::new(),
            iq: IssueQueue::new(IQ_SLOTS),
            lsq: LoadStoreQueue::new(LSQ_SLOTS),
            rob: ReorderBuffer::new(ROB_SLOTS),
            bus: ForwardBus::new(),
            epochs: EpochTracker::new(),
            mul_unit: FuncUnit::new(),
            mem_unit: FuncUnit::new(),
            insts: HashMap::new(),
            fetch_pc: PC_BASE,
            fetch_latch: None,
            decode_latch: None,
            redirect: None,
            pending_mirror: Vec::new(),
            halted: false,
            next_tag: 0,
            cycle: 0,
            retired: 0,
        }
    }

    /// Advance until HALT retires (and the memory unit drains) or the cycle
    /// budget is spent.
    pub fn run(&mut self, max_cycles: u64) -> RunSummary {
        while self.cycle < max_cycles && !(self.halted && !self.mem_unit.is_busy()) {
            self.step();

            if std::env::var("SINGLE_STEP").is_ok() {
                self.dump();
                let _ = std::io::stdin().read_line(&mut String::new());
            }
        }

        // Land retirements still waiting on the back-map mirror.
        self.mirror_retirements();

        RunSummary {
            cycles: self.cycle,
            insts_retired: self.retired,
            halted: self.halted,
        }
    }

    /// One cycle, as a fixed sequence of sub-steps. The order determines
    /// same-cycle forwarding visibility and must not be permuted.
    pub fn step(&mut self) {
        self.cycle += 1;

        self.mirror_retirements();
        self.stage_commit();
        self.stage_mem_unit();
        self.stage_int_unit();
        self.stage_mul_unit();
        if let Some(redirect) = self.redirect.take() {
            self.apply_redirect(redirect);
        }
        self.stage_dispatch();
        self.refresh_operands();
        self.stage_decode();
        self.stage_fetch();

        debug_assert!(
            self.regs.maps_consistent(),
            "rename map references a free slot"
        );
    }

    /// Retirements from the previous cycle become visible in the back map;
    /// the slots they displace return to the free pool once unreferenced.
    fn mirror_retirements(&mut self) {
        for op in std::mem::take(&mut self.pending_mirror) {
            for freed in self.regs.mirror(op.rd, op.slot, op.moves_flag) {
                self.bus.invalidate(freed);
            }
        }
    }

    /// Retire up to two ready entries from the ROB head, strictly in order.
    fn stage_commit(&mut self) {
        for _ in 0..2 {
            let Some(head) = self.rob.head().copied() else {
                break;
            };
            if head.status != RobStatus::Ready {
                break;
            }

            let tag = head.tag;
            let op = self
                .insts
                .get(&tag)
                .expect("ROB head not in flight")
                .inst
                .op;

            if op == Opcode::Halt {
                let _ = self.rob.pop_head();
                let _ = self.insts.remove(&tag);
                self.retired += 1;
                self.halted = true;
                self.halt_flush();
                break;
            }

            let _ = self.rob.pop_head();
            let inst = self.insts.get(&tag).cloned().expect("ROB head not in flight");

            if let Some(dst) = inst.dst {
                let val = inst.result.expect("committed without result");
                self.regs.set_ready(dst, val, val == 0);
                self.pending_mirror.push(MirrorOp {
                    rd: inst.inst.rd.expect("destination without arch register"),
                    slot: dst,
                    moves_flag: inst.inst.op.sets_flag(),
                });
            }

            // A store's record stays alive until its memory write drains.
            let keep = op.is_store()
                && (self.lsq.contains(tag) || self.mem_unit.occupant() == Some(tag));
            if !keep {
                let _ = self.insts.remove(&tag);
            }
            self.retired += 1;
        }
    }

    /// The memory unit drains the LSQ head, never out of order. The first
    /// occupied cycle touches memory; the second completes the operation.
    fn stage_mem_unit(&mut self) {
        if self.mem_unit.is_busy() {
            if let Some(tag) = self.mem_unit.tick() {
                let is_load = self
                    .insts
                    .get(&tag)
                    .map(|i| i.inst.op.is_load())
                    .unwrap_or(false);

                if is_load {
                    let inst = &self.insts[&tag];
                    let val = inst.result.expect("load completed without result");
                    let dst = inst.dst.expect("load without destination");
                    let _ = self.rob.mark_ready(tag);
                    self.bus.publish(dst, val, val == 0);
                } else if !self.rob.contains(tag) {
                    // Store that already committed; its write landed on the
                    // first occupied cycle.
                    let _ = self.insts.remove(&tag);
                }
            }
            return;
        }

        let Some(head) = self.lsq.head().copied() else {
            return;
        };
        let (addr, value_ready, value) = match self.insts.get(&head.tag) {
            Some(i) => (i.mem_addr, i.src1.is_ready(), i.src1.value()),
            None => return,
        };
        let Some(addr) = addr else {
            return;
        };
        if head.is_store && !value_ready {
            return;
        }

        let _ = self.lsq.pop_head();
        if head.is_store {
            self.mem.write(addr, value);
        } else {
            let val = self.mem.read(addr);
            if let Some(inst) = self.insts.get_mut(&head.tag) {
                inst.result = Some(val);
            }
        }
        self.mem_unit.begin(head.tag, head.epoch, 1);
    }

    /// Single-cycle integer unit: arithmetic, address generation for memory
    /// operations, and control-transfer resolution.
    fn stage_int_unit(&mut self) {
        let insts = &self.insts;
        let selected = self.iq.select(FuClass::Int, self.cycle, |tag| {
            let inst = &insts[&tag];
            match inst.inst.op {
                // A store issues on its address operand alone; the value may
                // arrive later, while it waits in the LSQ.
                Opcode::Store => inst.src2.is_ready(),
                _ => inst.src1.is_ready() && inst.src2.is_ready(),
            }
        });
        let Some(tag) = selected else {
            return;
        };
        self.iq.remove(tag);

        let inst = self.insts.get(&tag).cloned().expect("issued unknown instruction");
        let imm = inst.inst.imm.0;

        match inst.inst.op {
            Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Addl
            | Opcode::Subl
            | Opcode::Movc => {
                let val = alu(inst.inst.op, inst.src1.value(), inst.src2.value(), imm);
                if let Some(entry) = self.insts.get_mut(&tag) {
                    entry.result = Some(val);
                }
                let _ = self.rob.mark_ready(tag);

                let dst = inst.dst.expect("result with no destination");
                self.bus.publish(dst, val, val == 0);
            }
            Opcode::Load => {
                // Address generation only; the memory unit produces the
                // value and readies the ROB entry.
                let addr = Addr::compute(inst.src1.value(), imm);
                if let Some(entry) = self.insts.get_mut(&tag) {
                    entry.mem_addr = Some(addr);
                }
            }
            Opcode::Store => {
                let addr = Addr::compute(inst.src2.value(), imm);
                if let Some(entry) = self.insts.get_mut(&tag) {
                    entry.mem_addr = Some(addr);
                }
                let _ = self.rob.mark_ready(tag);
            }
            Opcode::Jump => {
                let target = inst.src1.value().wrapping_add(imm) as u32;
                let _ = self.rob.mark_ready(tag);
                self.raise_redirect(&inst, target);
            }
            Opcode::Jal => {
                let target = inst.src1.value().wrapping_add(imm) as u32;
                let link = inst.pc.wrapping_add(INST_BYTES) as i32;
                if let Some(entry) = self.insts.get_mut(&tag) {
                    entry.result = Some(link);
                }
                let _ = self.rob.mark_ready(tag);
                self.raise_redirect(&inst, target);
            }
            Opcode::Bz | Opcode::Bnz => {
                let zero = inst.src1.zero_flag();
                self.regs.cond_branch_resolved();
                if let Some(entry) = self.insts.get_mut(&tag) {
                    entry.holds_flag_pin = false;
                }
                let _ = self.rob.mark_ready(tag);

                let taken = if inst.inst.op == Opcode::Bz { zero } else { !zero };
                if taken {
                    let target = (inst.pc as i32).wrapping_add(imm) as u32;
                    self.raise_redirect(&inst, target);
                }
            }
            op => unimplemented!("{:?} issued to the integer unit", op),
        }
    }

    fn stage_mul_unit(&mut self) {
        if self.mul_unit.is_busy() {
            if let Some(tag) = self.mul_unit.tick() {
                if let Some(inst) = self.insts.get(&tag) {
                    let val = inst.result.expect("multiply completed without result");
                    let dst = inst.dst.expect("multiply without destination");
                    let _ = self.rob.mark_ready(tag);
                    self.bus.publish(dst, val, val == 0);
                }
            }
            return;
        }

        let insts = &self.insts;
        let selected = self.iq.select(FuClass::Mul, self.cycle, |tag| {
            let inst = &insts[&tag];
            inst.src1.is_ready() && inst.src2.is_ready()
        });
        let Some(tag) = selected else {
            return;
        };
        self.iq.remove(tag);

        let (epoch, val) = {
            let inst = &self.insts[&tag];
            let val = alu(
                Opcode::Mul,
                inst.src1.value(),
                inst.src2.value(),
                inst.inst.imm.0,
            );
            (inst.epoch, val)
        };
        if let Some(entry) = self.insts.get_mut(&tag) {
            entry.result = Some(val);
        }
        self.mul_unit.begin(tag, epoch, 1);
    }

    fn raise_redirect(&mut self, inst: &Instance, target: u32) {
        debug_assert!(self.redirect.is_none());
        self.redirect = Some(Redirect {
            target,
            epoch: inst
                .flush_epoch
                .expect("control transfer without a flush epoch"),
        });
    }

    /// Annul everything at or above the flushed epoch, rewind the rename
    /// state, and point fetch at the redirect target.
    fn apply_redirect(&mut self, redirect: Redirect) {
        let epoch = redirect.epoch;

        let _ = self.iq.flush_from(epoch);
        let _ = self.lsq.flush_from(epoch);
        self.mul_unit.kill_from(epoch);
        self.mem_unit.kill_from(epoch);

        // Youngest first: the instruction mid-decode, then the ROB from the
        // tail, so each restore lands the next-older mapping.
        if let Some(tag) = self.decode_latch.take() {
            self.annul(tag);
        }
        for tag in self.rob.flush_from(epoch) {
            self.annul(tag);
        }

        self.fetch_latch = None;
        self.epochs.rewind(epoch);
        self.fetch_pc = redirect.target;
    }

    /// Discard one speculative instruction: unwind its rename and drop its
    /// record.
    fn annul(&mut self, tag: Tag) {
        let Some(inst) = self.insts.remove(&tag) else {
            return;
        };

        if inst.holds_flag_pin {
            self.regs.cond_branch_resolved();
        }

        if let (Some(dst), Some(rd)) = (inst.dst, inst.inst.rd) {
            if let Some(freed) = self.regs.rollback(rd, dst, inst.rollback) {
                self.bus.invalidate(freed);
            }
        }
    }

    /// HALT reached the ROB head: freeze the front end and discard every
    /// in-flight structure. The LSQ resets to empty rather than being
    /// epoch-scanned; the memory unit alone is left to drain.
    fn halt_flush(&mut self) {
        let _ = self.iq.clear();
        let _ = self.lsq.clear();
        self.bus.clear();
        self.mul_unit.kill();
        self.redirect = None;

        if let Some(tag) = self.decode_latch.take() {
            self.annul(tag);
        }
        for tag in self.rob.drain_all() {
            self.annul(tag);
        }
        self.fetch_latch = None;
        self.regs.reset_cond_branches();
        self.insts.clear();
    }

    /// Move the renamed instruction from the previous decode into the
    /// issue-side structures.
    fn stage_dispatch(&mut self) {
        let Some(tag) = self.decode_latch.take() else {
            return;
        };
        let (op, epoch) = {
            let inst = &self.insts[&tag];
            (inst.inst.op, inst.epoch)
        };

        if op == Opcode::Halt {
            // HALT bypasses the issue queue; it is committable on arrival.
            self.rob.push(tag, epoch, true);
            return;
        }

        self.iq.insert(IqEntry {
            tag,
            epoch,
            class: op.fu_class(),
            cycle: self.cycle,
        });
        self.rob.push(tag, epoch, false);
        if op.is_mem_access() {
            self.lsq.push(LsqEntry {
                tag,
                epoch,
                is_store: op.is_store(),
            });
        }
    }

    /// Every waiting entry with an unresolved operand probes the bus.
    fn refresh_operands(&mut self) {
        let tags: Vec<Tag> = self
            .iq
            .iter()
            .map(|e| e.tag)
            .chain(self.lsq.iter().map(|e| e.tag))
            .collect();

        for tag in tags {
            if let Some(inst) = self.insts.get_mut(&tag) {
                inst.src1.refresh(&self.bus, &self.regs);
                inst.src2.refresh(&self.bus, &self.regs);
            }
        }
    }

    /// Bind sources, allocate the destination, record rollback state. The
    /// instruction is held (and retried next cycle) when any downstream
    /// structure lacks room.
    fn stage_decode(&mut self) {
        if self.halted || self.decode_latch.is_some() {
            return;
        }
        let Some((pc, inst)) = self.fetch_latch.clone() else {
            return;
        };

        if inst.op == Opcode::Nop {
            self.fetch_latch = None;
            return;
        }

        let admit = match inst.op {
            Opcode::Halt => !self.rob.is_full(),
            op => {
                !self.rob.is_full()
                    && !self.iq.is_full()
                    && (!op.is_mem_access() || self.lsq.has_space())
                    && (!op.has_dest() || self.regs.can_allocate())
            }
        };
        if !admit {
            return;
        }

        let tag = Tag(self.next_tag);
        self.next_tag += 1;

        let epoch = self.epochs.current();
        let flush_epoch = inst.op.is_control().then(|| self.epochs.open());

        // Sources read the pre-rename mappings, so an instruction naming its
        // own destination sees the prior value.
        let (src1, src2) = match inst.op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor => (
                self.read_operand(inst.rs1.expect("missing rs1")),
                self.read_operand(inst.rs2.expect("missing rs2")),
            ),
            Opcode::Addl | Opcode::Subl | Opcode::Load | Opcode::Jump | Opcode::Jal => (
                self.read_operand(inst.rs1.expect("missing rs1")),
                Operand::Absent,
            ),
            Opcode::Store => (
                self.read_operand(inst.rs1.expect("missing rs1")),
                self.read_operand(inst.rs2.expect("missing rs2")),
            ),
            Opcode::Bz | Opcode::Bnz => (self.read_flag_operand(), Operand::Absent),
            Opcode::Movc | Opcode::Halt | Opcode::Nop => (Operand::Absent, Operand::Absent),
        };

        let mut instance = Instance {
            tag,
            pc,
            inst: inst.clone(),
            epoch,
            flush_epoch,
            dst: None,
            rollback: Rollback::default(),
            src1,
            src2,
            result: None,
            mem_addr: None,
            holds_flag_pin: false,
        };

        if inst.op.has_dest() {
            let move_flag = inst.op.sets_flag() && !self.regs.flag_pinned();
            let (slot, rollback) = self
                .regs
                .allocate_dest(inst.rd.expect("missing rd"), move_flag)
                .expect("register pool exhausted past the admission check");
            instance.dst = Some(slot);
            instance.rollback = rollback;
        }

        if inst.op.is_cond_branch() {
            self.regs.cond_branch_opened();
            instance.holds_flag_pin = true;
        }

        let _ = self.insts.insert(tag, instance);
        self.decode_latch = Some(tag);
        self.fetch_latch = None;
    }

    fn stage_fetch(&mut self) {
        if self.halted || self.fetch_latch.is_some() {
            return;
        }

        if let Some(inst) = self.prog.fetch(self.fetch_pc) {
            self.fetch_latch = Some((self.fetch_pc, inst.clone()));
            self.fetch_pc += INST_BYTES;
        }
    }

    /// Read an architectural source through the front map: the register
    /// file's value when the slot has one, otherwise the bus, otherwise the
    /// bare slot to be filled in by forwarding.
    fn read_operand(&self, reg: ArchReg) -> Operand {
        match self.regs.lookup(reg) {
            None => Operand::Ready {
                val: 0,
                zero: false,
            },
            Some(phys) => self.read_phys_operand(phys),
        }
    }

    /// The zero flag travels the same paths as a register source, through
    /// the dedicated flag mapping.
    fn read_flag_operand(&self) -> Operand {
        match self.regs.flag_slot() {
            None => Operand::Ready {
                val: 0,
                zero: false,
            },
            Some(phys) => self.read_phys_operand(phys),
        }
    }

    fn read_phys_operand(&self, phys: PhysReg) -> Operand {
        match self.regs.read(phys) {
            PrfEntry::Ready { val, zero } => Operand::Ready { val, zero },
            _ => match self.bus.probe(phys) {
                Some(b) => Operand::Ready {
                    val: b.val,
                    zero: b.zero,
                },
                None => Operand::Pending(phys),
            },
        }
    }

    pub fn arch_reg(&self, reg: ArchReg) -> i32 {
        self.regs.arch_value(reg).unwrap_or(0)
    }

    pub fn arch_snapshot(&self) -> Vec<(ArchReg, Option<i32>)> {
        self.regs.arch_snapshot()
    }

    pub fn mem(&self) -> &DataMemory {
        &self.mem
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn insts_retired(&self) -> u64 {
        self.retired
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn free_phys_slots(&self) -> usize {
        self.regs.free_slots()
    }

    pub fn referenced_phys_slots(&self) -> usize {
        self.regs.referenced_slots()
    }

    /// Per-cycle structure dump for external debug tooling.
    pub fn dump(&self) {
        dbg!(&self.regs);
        dbg!(&self.iq);
        dbg!(&self.lsq);
        dbg!(&self.rob);
        dbg!(&self.bus);
        dbg!(&self.insts);
        dbg!(&self.fetch_latch);
        dbg!(&self.decode_latch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_idles() {
        let prog: Program = "".parse().unwrap();
        let mut engine = Engine::new(prog);
        let res = engine.run(10);
        assert_eq!(res.cycles, 10);
        assert!(!res.halted);
        assert_eq!(res.insts_retired, 0);
    }

    #[test]
    fn halt_only() {
        let prog: Program = "HALT".parse().unwrap();
        let mut engine = Engine::new(prog);
        let res = engine.run(100);
        assert!(res.halted);
        assert_eq!(res.insts_retired, 1);
        assert!(res.cycles < 100);
    }

    #[test]
    fn program_without_halt_runs_out_the_budget() {
        let prog: Program = "MOVC R1,#5".parse().unwrap();
        let mut engine = Engine::new(prog);
        let res = engine.run(50);
        assert!(!res.halted);
        assert_eq!(res.cycles, 50);
        assert_eq!(engine.arch_reg(ArchReg::R1), 5);
    }
}
