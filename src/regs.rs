use hashbrown::HashMap;
use strum::IntoEnumIterator;

use crate::inst::ArchReg;

pub const PRF_SLOTS: usize = 40;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PhysReg(u8);

impl From<usize> for PhysReg {
    fn from(slot: usize) -> Self {
        debug_assert!(slot < PRF_SLOTS);
        PhysReg(slot as u8)
    }
}

impl From<PhysReg> for usize {
    fn from(reg: PhysReg) -> Self {
        reg.0 as usize
    }
}

/// State of one physical register slot. `Pending` means a rename owns the
/// slot but its value has not been produced; the value arrives at commit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PrfEntry {
    Free,
    Pending,
    Ready { val: i32, zero: bool },
}

/// Architectural register to physical slot mapping, plus the one extra slot
/// that tracks the condition flag's most recent producer.
#[derive(Debug, Clone, Default)]
pub struct RenameMap {
    regs: HashMap<ArchReg, PhysReg>,
    flag: Option<PhysReg>,
}

impl RenameMap {
    pub fn get(&self, reg: ArchReg) -> Option<PhysReg> {
        self.regs.get(&reg).copied()
    }

    pub fn set(&mut self, reg: ArchReg, phys: PhysReg) {
        let _ = self.regs.insert(reg, phys);
    }

    pub fn unset(&mut self, reg: ArchReg) {
        let _ = self.regs.remove(&reg);
    }

    pub fn flag(&self) -> Option<PhysReg> {
        self.flag
    }

    pub fn set_flag(&mut self, phys: Option<PhysReg>) {
        self.flag = phys;
    }

    pub fn references(&self, phys: PhysReg) -> bool {
        self.flag == Some(phys) || self.regs.values().any(|&p| p == phys)
    }
}

/// What rename must remember to unwind one instruction: the mapping its
/// destination displaced, and the flag mapping if this instruction moved it.
#[derive(Debug, Default, Copy, Clone)]
pub struct Rollback {
    pub prev_dst: Option<PhysReg>,
    pub prev_flag: Option<Option<PhysReg>>,
}

#[derive(Debug, Clone)]
pub struct RegFile {
    prf: Vec<PrfEntry>,
    front: RenameMap,
    back: RenameMap,
    cond_branches: u32,
}

impl Default for RegFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegFile {
    pub fn new() -> Self {
        Self {
            prf: vec![PrfEntry::Free; PRF_SLOTS],
            front: RenameMap::default(),
            back: RenameMap::default(),
            cond_branches: 0,
        }
    }

    pub fn read(&self, phys: PhysReg) -> PrfEntry {
        self.prf[usize::from(phys)]
    }

    pub fn set_ready(&mut self, phys: PhysReg, val: i32, zero: bool) {
        self.prf[usize::from(phys)] = PrfEntry::Ready { val, zero };
    }

    pub fn can_allocate(&self) -> bool {
        self.prf.iter().any(|&e| e == PrfEntry::Free)
    }

    fn allocate(&mut self) -> Option<PhysReg> {
        let slot = self.prf.iter().position(|&e| e == PrfEntry::Free)?;
        self.prf[slot] = PrfEntry::Pending;

        Some(PhysReg::from(slot))
    }

    pub fn lookup(&self, reg: ArchReg) -> Option<PhysReg> {
        self.front.get(reg)
    }

    pub fn flag_slot(&self) -> Option<PhysReg> {
        self.front.flag()
    }

    /// While a conditional branch is in flight the flag mapping is pinned so
    /// the branch reads the producer it was decoded against.
    pub fn flag_pinned(&self) -> bool {
        self.cond_branches > 0
    }

    pub fn cond_branch_opened(&mut self) {
        self.cond_branches += 1;
    }

    pub fn cond_branch_resolved(&mut self) {
        self.cond_branches = self.cond_branches.saturating_sub(1);
    }

    pub fn reset_cond_branches(&mut self) {
        self.cond_branches = 0;
    }

    /// Bind a destination: allocate a free slot, capture the displaced
    /// mapping for rollback, install the new one. `move_flag` is decided by
    /// the caller from the opcode and the pin state.
    pub fn allocate_dest(&mut self, rd: ArchReg, move_flag: bool) -> Option<(PhysReg, Rollback)> {
        let slot = self.allocate()?;
        let rollback = Rollback {
            prev_dst: self.front.get(rd),
            prev_flag: if move_flag {
                Some(self.front.flag())
            } else {
                None
            },
        };

        self.front.set(rd, slot);
        if move_flag {
            self.front.set_flag(Some(slot));
        }

        Some((slot, rollback))
    }

    /// Undo one rename: restore the front mappings and return the young slot
    /// to the pool. Returns the freed slot so the caller can invalidate any
    /// broadcast still carrying it.
    pub fn rollback(&mut self, rd: ArchReg, young: PhysReg, rb: Rollback) -> Option<PhysReg> {
        match rb.prev_dst {
            Some(prev) => self.front.set(rd, prev),
            None => self.front.unset(rd),
        }
        if let Some(prev_flag) = rb.prev_flag {
            self.front.set_flag(prev_flag);
        }

        if self.references(young) {
            return None;
        }
        self.prf[usize::from(young)] = PrfEntry::Free;

        Some(young)
    }

    /// Land one retirement in the back map. The slots the update displaces
    /// go back to the free pool once neither map references them; freed
    /// slots are returned for broadcast invalidation.
    pub fn mirror(&mut self, rd: ArchReg, slot: PhysReg, moves_flag: bool) -> Vec<PhysReg> {
        let displaced = self.back.get(rd);
        self.back.set(rd, slot);

        let displaced_flag = if moves_flag {
            let prev = self.back.flag();
            self.back.set_flag(Some(slot));
            prev
        } else {
            None
        };

        let mut freed = Vec::new();
        for cand in [displaced, displaced_flag].into_iter().flatten() {
            if cand != slot && !self.references(cand) && self.prf[usize::from(cand)] != PrfEntry::Free
            {
                self.prf[usize::from(cand)] = PrfEntry::Free;
                freed.push(cand);
            }
        }

        freed
    }

    fn references(&self, phys: PhysReg) -> bool {
        self.front.references(phys) || self.back.references(phys)
    }

    /// Committed architectural view, read through the back map.
    pub fn arch_value(&self, reg: ArchReg) -> Option<i32> {
        match self.back.get(reg).map(|p| self.read(p)) {
            Some(PrfEntry::Ready { val, .. }) => Some(val),
            _ => None,
        }
    }

    pub fn arch_snapshot(&self) -> Vec<(ArchReg, Option<i32>)> {
        ArchReg::iter().map(|r| (r, self.arch_value(r))).collect()
    }

    pub fn free_slots(&self) -> usize {
        self.prf.iter().filter(|&&e| e == PrfEntry::Free).count()
    }

    /// Distinct slots referenced by either map.
    pub fn referenced_slots(&self) -> usize {
        (0..PRF_SLOTS)
            .filter(|&i| self.references(PhysReg::from(i)))
            .count()
    }

    /// No rename-map entry may reference a slot in the free pool.
    pub fn maps_consistent(&self) -> bool {
        (0..PRF_SLOTS).all(|i| {
            let phys = PhysReg::from(i);
            !self.references(phys) || self.read(phys) != PrfEntry::Free
        })
    }

    pub fn front_map(&self) -> &RenameMap {
        &self.front
    }

    pub fn back_map(&self) -> &RenameMap {
        &self.back
    }
}
