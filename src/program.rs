use crate::inst::Inst;
use std::str::FromStr;

/// First instruction's program counter. Instructions are 4 bytes wide.
pub const PC_BASE: u32 = 4000;
pub const INST_BYTES: u32 = 4;

#[derive(Debug, Clone)]
pub struct Program {
    pub insts: Vec<Inst>,
}

impl FromStr for Program {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut insts = Vec::default();

        for (i, line) in s.lines().enumerate() {
            // Strip comments and empty lines
            let line = line.trim();
            let line = &line[..line.find(';').unwrap_or(line.len())];
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Line numbers start at 1
            let i = i + 1;

            match Inst::from_str(line) {
                Ok(inst) => insts.push(inst),
                Err(e) => {
                    return Err(format!("error parsing instruction '{line}' on line {i}: {e}"))
                }
            }
        }

        Ok(Program { insts })
    }
}

impl Program {
    /// Look up the instruction at a program counter. Out-of-range counters
    /// (past the end, or not 4000-aligned-plus-multiple-of-4) fetch nothing.
    pub fn fetch(&self, pc: u32) -> Option<&Inst> {
        if pc < PC_BASE || (pc - PC_BASE) % INST_BYTES != 0 {
            return None;
        }

        self.insts.get(((pc - PC_BASE) / INST_BYTES) as usize)
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Opcode;

    #[test]
    fn fetch_by_pc() {
        let prog: Program = "MOVC R1,#5\nADD R2,R1,R1\nHALT".parse().unwrap();
        assert_eq!(prog.len(), 3);
        assert_eq!(prog.fetch(4000).unwrap().op, Opcode::Movc);
        assert_eq!(prog.fetch(4004).unwrap().op, Opcode::Add);
        assert_eq!(prog.fetch(4008).unwrap().op, Opcode::Halt);
        assert_eq!(prog.fetch(4012), None);
        assert_eq!(prog.fetch(4002), None);
        assert_eq!(prog.fetch(0), None);
    }

    #[test]
    fn comments_and_blanks() {
        let prog: Program = "; header\n\n  MOVC R1,#5 ; init\n\nHALT\n".parse().unwrap();
        assert_eq!(prog.len(), 2);
    }

    #[test]
    fn reports_line() {
        let err = "MOVC R1,#5\nBOGUS".parse::<Program>().unwrap_err();
        assert!(err.contains("line 2"), "{err}");
    }
}
