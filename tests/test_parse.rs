use ooosim::program::Program;

#[test]
fn parse_all() {
    for entry in std::fs::read_dir("asm").unwrap() {
        let entry = entry.unwrap();
        let contents = std::fs::read_to_string(entry.path()).unwrap();
        let prog_name = entry.file_name().to_str().unwrap().to_owned();

        println!("parsing {prog_name}...");
        let _ = contents
            .parse::<Program>()
            .unwrap_or_else(|e| panic!("failed to parse program {prog_name}: {e}"));
    }
}

#[test]
fn rejects_unknown_opcode() {
    assert!("FROB R1,R2".parse::<Program>().is_err());
}

#[test]
fn rejects_bad_operand_shape() {
    assert!("ADD R1,R2".parse::<Program>().is_err());
    assert!("MOVC R1,R2".parse::<Program>().is_err());
    assert!("BZ R1".parse::<Program>().is_err());
}
