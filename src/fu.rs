use crate::{
    epoch::Epoch,
    inst::{Opcode, Tag},
};

/// Occupant of a multi-cycle unit. `cycles_left` counts the cycles after the
/// one that started the operation.
#[derive(Debug, Copy, Clone)]
pub struct InFlight {
    pub tag: Tag,
    pub epoch: Epoch,
    cycles_left: u8,
}

/// A single-slot functional unit with a busy/latency counter. The integer
/// unit is combinational and never parks work here; the multiply and memory
/// units occupy their slot for one extra cycle.
#[derive(Debug, Clone, Default)]
pub struct FuncUnit {
    slot: Option<InFlight>,
}

impl FuncUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_some()
    }

    pub fn occupant(&self) -> Option<Tag> {
        self.slot.map(|f| f.tag)
    }

    pub fn begin(&mut self, tag: Tag, epoch: Epoch, extra_cycles: u8) {
        debug_assert!(!self.is_busy());
        self.slot = Some(InFlight {
            tag,
            epoch,
            cycles_left: extra_cycles,
        });
    }

    /// Advance one cycle. Returns the occupant's tag on the cycle it drains.
    pub fn tick(&mut self) -> Option<Tag> {
        let inflight = self.slot.as_mut()?;
        inflight.cycles_left = inflight.cycles_left.saturating_sub(1);

        if inflight.cycles_left == 0 {
            return self.slot.take().map(|f| f.tag);
        }

        None
    }

    /// Annul the occupant if it belongs to a flushed generation.
    pub fn kill_from(&mut self, epoch: Epoch) {
        if self.slot.map(|f| f.epoch >= epoch).unwrap_or(false) {
            self.slot = None;
        }
    }

    pub fn kill(&mut self) {
        self.slot = None;
    }
}

/// Result of a one-pass integer or multiply operation.
pub fn alu(op: Opcode, src1: i32, src2: i32, imm: i32) -> i32 {
    match op {
        Opcode::Add => src1.wrapping_add(src2),
        Opcode::Sub => src1.wrapping_sub(src2),
        Opcode::Mul => src1.wrapping_mul(src2),
        Opcode::And => src1 & src2,
        Opcode::Or => src1 | src2,
        Opcode::Xor => src1 ^ src2,
        Opcode::Addl => src1.wrapping_add(imm),
        Opcode::Subl => src1.wrapping_sub(imm),
        Opcode::Movc => imm,
        _ => unimplemented!("{:?}", op),
    }
}
