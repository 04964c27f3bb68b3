use std::time::Instant;

use ooosim::{engine::Engine, program::Program};

fn main() {
    let start = Instant::now();

    let mut args = std::env::args().skip(1);
    let file = args.next().expect("usage: ooosim <file> <initialize|simulate|display> [cycles]");
    let mode = args.next().unwrap_or_else(|| "simulate".to_owned());
    let cycles = args
        .next()
        .and_then(|x| x.parse::<u64>().ok())
        .unwrap_or(10_000);

    let contents = std::fs::read_to_string(&file).expect("failed to open file");
    let prog = contents
        .parse::<Program>()
        .expect("failed to parse program");

    let loaded = prog.len();
    let mut engine = Engine::new(prog);

    match mode.as_str() {
        "initialize" => {
            println!("loaded {loaded} instructions");
            return;
        }
        "display" => {
            for _ in 0..cycles {
                engine.step();
                engine.dump();
                if engine.is_halted() {
                    break;
                }
            }
        }
        "simulate" => {
            let _ = engine.run(cycles);
        }
        other => {
            eprintln!("unknown mode '{other}', expected initialize|simulate|display");
            std::process::exit(1);
        }
    }

    println!("    EXECUTION COMPLETED");
    println!("    =====================");
    println!("    Instructions retired: {}", engine.insts_retired());
    println!("            Cycles taken: {}", engine.cycles());
    println!(
        "  Instructions per clock: {:.2}",
        engine.insts_retired() as f32 / engine.cycles() as f32
    );

    println!("\n    ARCHITECTURAL REGISTERS");
    for (reg, val) in engine.arch_snapshot() {
        if let Some(val) = val {
            println!("    {reg:?} = {val}");
        }
    }

    println!("\n    DATA MEMORY (first 100 words)");
    for (i, word) in engine.mem().words().iter().take(100).enumerate() {
        if *word != 0 {
            println!("    mem[{i}] = {word}");
        }
    }

    println!(
        "\n  Simulator time elapsed: {:.2}s",
        start.elapsed().as_secs_f32()
    );
}
