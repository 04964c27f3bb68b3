use engine::Engine;
use mem::DataMemory;
use program::Program;

pub mod engine;
pub mod epoch;
pub mod fu;
pub mod fwd;
pub mod inst;
pub mod iq;
pub mod lsq;
pub mod mem;
pub mod program;
pub mod queue;
pub mod regs;
pub mod rob;

/// Assemble `asm/<name>.asm`, run it against `mem`, and hand back the
/// engine for inspection.
pub fn parse_and_exec(name: &str, mem: DataMemory, max_cycles: u64) -> Engine {
    let contents = std::fs::read_to_string(format!("asm/{name}.asm")).unwrap();
    let prog = contents
        .parse::<Program>()
        .expect("failed to parse assembly");

    let mut engine = Engine::with_memory(prog, mem);
    let _ = engine.run(max_cycles);
    engine
}
