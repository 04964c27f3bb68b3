use num_enum::TryFromPrimitive;
use std::str::FromStr;
use strum::EnumIter;

/// Signed literal operand. Branch displacements are byte offsets relative to
/// the instruction's own program counter; load/store offsets are added to the
/// base register.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Imm(pub i32);

/// Program-order identity of an in-flight instruction, unique per fetch.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, TryFromPrimitive, EnumIter)]
#[repr(u8)]
pub enum ArchReg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

/// Which functional unit an issue-queue entry waits for. Memory operations
/// pass through the integer unit first for address generation, so the only
/// split at issue is integer vs. multiply.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FuClass {
    Int,
    Mul,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Addl,
    Subl,
    Movc,
    Load,
    Store,
    Jump,
    Jal,
    Bz,
    Bnz,
    Halt,
    Nop,
}

impl Opcode {
    pub fn fu_class(self) -> FuClass {
        match self {
            Opcode::Mul => FuClass::Mul,
            _ => FuClass::Int,
        }
    }

    /// Does this opcode allocate a destination physical register at rename?
    pub fn has_dest(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Addl
                | Opcode::Subl
                | Opcode::Movc
                | Opcode::Load
                | Opcode::Jal
        )
    }

    /// Condition-setting opcodes redirect the flag rename mapping to their
    /// destination slot. LOAD and JAL write a register without touching the
    /// flag.
    pub fn sets_flag(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Addl
                | Opcode::Subl
                | Opcode::Movc
        )
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Jal | Opcode::Bz | Opcode::Bnz)
    }

    pub fn is_cond_branch(self) -> bool {
        matches!(self, Opcode::Bz | Opcode::Bnz)
    }

    pub fn is_load(self) -> bool {
        self == Opcode::Load
    }

    pub fn is_store(self) -> bool {
        self == Opcode::Store
    }

    pub fn is_mem_access(self) -> bool {
        matches!(self, Opcode::Load | Opcode::Store)
    }
}

/// A decoded instruction. Immutable once fetched; the mutable in-flight
/// record wraps one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub op: Opcode,
    pub rd: Option<ArchReg>,
    pub rs1: Option<ArchReg>,
    pub rs2: Option<ArchReg>,
    pub imm: Imm,
}

impl Inst {
    pub fn nop() -> Self {
        Inst {
            op: Opcode::Nop,
            rd: None,
            rs1: None,
            rs2: None,
            imm: Imm(0),
        }
    }
}

impl FromStr for Opcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "ADD" => Opcode::Add,
            "SUB" => Opcode::Sub,
            "MUL" => Opcode::Mul,
            "AND" => Opcode::And,
            "OR" => Opcode::Or,
            "XOR" | "EX-OR" => Opcode::Xor,
            "ADDL" => Opcode::Addl,
            "SUBL" => Opcode::Subl,
            "MOVC" => Opcode::Movc,
            "LOAD" => Opcode::Load,
            "STORE" => Opcode::Store,
            "JUMP" => Opcode::Jump,
            "JAL" => Opcode::Jal,
            "BZ" => Opcode::Bz,
            "BNZ" => Opcode::Bnz,
            "HALT" => Opcode::Halt,
            "NOP" => Opcode::Nop,
            _ => return Err(format!("unknown instruction: '{s}'")),
        })
    }
}

impl FromStr for ArchReg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('R')
            .or_else(|| s.strip_prefix('r'))
            .ok_or_else(|| format!("unknown register: '{s}'"))?;

        match rest.parse::<u8>().map(ArchReg::try_from) {
            Ok(Ok(reg)) => Ok(reg),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl FromStr for Imm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('#')
            .ok_or_else(|| format!("invalid literal (no #): '{s}'"))?;

        let val = if let Some(hex) = digits.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else if let Some(hex) = digits.strip_prefix("-0x") {
            i64::from_str_radix(hex, 16).map(|v| -v)
        } else {
            i64::from_str(digits)
        };

        match val.map(i32::try_from) {
            Ok(Ok(v)) => Ok(Imm(v)),
            _ => Err(format!("invalid literal: '{s}'")),
        }
    }
}

impl FromStr for Inst {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Both "ADD R1,R2,R3" and "ADD,R1,R2,R3" appear in program files.
        let (op, args) = s
            .split_once(|c: char| c == ' ' || c == ',')
            .unwrap_or((s, ""));
        let args = args.split(',').collect::<Vec<_>>();

        let nth_arg = |n: usize| -> Result<&str, String> {
            args.get(n)
                .map(|s| s.trim())
                .and_then(|s| if s.is_empty() { None } else { Some(s) })
                .ok_or_else(|| format!("cannot fetch argument {n}"))
        };
        let reg_arg = |n: usize| -> Result<ArchReg, String> { ArchReg::from_str(nth_arg(n)?) };
        let imm_arg = |n: usize| -> Result<Imm, String> { Imm::from_str(nth_arg(n)?) };

        let op = op.parse::<Opcode>()?;
        let inst = match op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor => {
                Inst {
                    op,
                    rd: Some(reg_arg(0)?),
                    rs1: Some(reg_arg(1)?),
                    rs2: Some(reg_arg(2)?),
                    imm: Imm(0),
                }
            }
            Opcode::Addl | Opcode::Subl | Opcode::Load | Opcode::Jal => Inst {
                op,
                rd: Some(reg_arg(0)?),
                rs1: Some(reg_arg(1)?),
                rs2: None,
                imm: imm_arg(2)?,
            },
            Opcode::Movc => Inst {
                op,
                rd: Some(reg_arg(0)?),
                rs1: None,
                rs2: None,
                imm: imm_arg(1)?,
            },
            // STORE names the value register first, then the address base.
            Opcode::Store => Inst {
                op,
                rd: None,
                rs1: Some(reg_arg(0)?),
                rs2: Some(reg_arg(1)?),
                imm: imm_arg(2)?,
            },
            Opcode::Jump => Inst {
                op,
                rd: None,
                rs1: Some(reg_arg(0)?),
                rs2: None,
                imm: imm_arg(1)?,
            },
            Opcode::Bz | Opcode::Bnz => Inst {
                op,
                rd: None,
                rs1: None,
                rs2: None,
                imm: imm_arg(0)?,
            },
            Opcode::Halt | Opcode::Nop => Inst {
                op,
                rd: None,
                rs1: None,
                rs2: None,
                imm: Imm(0),
            },
        };

        Ok(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg() {
        assert_eq!(ArchReg::from_str("R0"), Ok(ArchReg::R0));
        assert_eq!(ArchReg::from_str("r1"), Ok(ArchReg::R1));
        assert_eq!(ArchReg::from_str("R15"), Ok(ArchReg::R15));
        assert!(ArchReg::from_str("R16").is_err());
        assert!(ArchReg::from_str("15").is_err());
        assert!(ArchReg::from_str("R-1").is_err());
    }

    #[test]
    fn test_imm() {
        assert_eq!(Imm::from_str("#5"), Ok(Imm(5)));
        assert_eq!(Imm::from_str("#-16"), Ok(Imm(-16)));
        assert_eq!(Imm::from_str("#0x20"), Ok(Imm(32)));
        assert_eq!(Imm::from_str("#-0x8"), Ok(Imm(-8)));
        assert!(Imm::from_str("5").is_err());
        assert!(Imm::from_str("#").is_err());
        assert!(Imm::from_str("#x5").is_err());
    }

    #[test]
    fn test_inst() {
        assert_eq!(
            "ADD R1,R2,R3".parse::<Inst>(),
            Ok(Inst {
                op: Opcode::Add,
                rd: Some(ArchReg::R1),
                rs1: Some(ArchReg::R2),
                rs2: Some(ArchReg::R3),
                imm: Imm(0),
            })
        );
        assert_eq!(
            "MOVC,R4,#12".parse::<Inst>(),
            Ok(Inst {
                op: Opcode::Movc,
                rd: Some(ArchReg::R4),
                rs1: None,
                rs2: None,
                imm: Imm(12),
            })
        );
        assert_eq!(
            "STORE R1, R2, #8".parse::<Inst>(),
            Ok(Inst {
                op: Opcode::Store,
                rd: None,
                rs1: Some(ArchReg::R1),
                rs2: Some(ArchReg::R2),
                imm: Imm(8),
            })
        );
        assert_eq!(
            "BNZ,#-8".parse::<Inst>(),
            Ok(Inst {
                op: Opcode::Bnz,
                rd: None,
                rs1: None,
                rs2: None,
                imm: Imm(-8),
            })
        );
        assert_eq!(
            "halt".parse::<Inst>(),
            Ok(Inst {
                op: Opcode::Halt,
                ..Inst::nop()
            })
        );
        assert!("ADD R1,R2".parse::<Inst>().is_err());
        assert!("FROB R1".parse::<Inst>().is_err());
    }

    #[test]
    fn test_fu_class_total() {
        assert_eq!(Opcode::Mul.fu_class(), FuClass::Mul);
        assert_eq!(Opcode::Add.fu_class(), FuClass::Int);
        assert_eq!(Opcode::Load.fu_class(), FuClass::Int);
        assert_eq!(Opcode::Bz.fu_class(), FuClass::Int);
    }

    #[test]
    fn test_flag_participation() {
        assert!(Opcode::Movc.sets_flag());
        assert!(Opcode::Subl.sets_flag());
        assert!(!Opcode::Load.sets_flag());
        assert!(!Opcode::Jal.sets_flag());
        assert!(!Opcode::Store.sets_flag());
    }
}
