use super::*;
use crate::types::encoding::Encode;
use crate::virtual_machine::assembler::assemble_source;
use crate::virtual_machine::config::MemoryMode;
use crate::virtual_machine::files::{MemoryFiles, NoFiles};

fn encrypted() -> VmConfig {
    VmConfig::default().with_memory_mode(MemoryMode::Encrypted)
}

fn run_with(config: &VmConfig, source: &str, files: &mut impl FileAccess) -> RunReport {
    let stream = assemble_source(source).expect("assembly failed");
    execute(config, stream, files)
}

fn run_source(source: &str) -> RunReport {
    run_with(&VmConfig::default(), source, &mut NoFiles)
}

fn run_ok(source: &str) -> RunReport {
    let report = run_source(source);
    assert_eq!(report.state, RunState::Halted, "unexpected fault: {:?}", report.fault);
    report
}

fn run_expect_fault(source: &str) -> (RunReport, Fault) {
    let report = run_source(source);
    assert_eq!(report.state, RunState::Faulted);
    let fault = report.fault.clone().expect("faulted run carries its fault");
    (report, fault)
}

fn outcomes(report: &RunReport) -> Vec<&Outcome> {
    report.trace.iter().map(|r| &r.outcome).collect()
}

fn int(report: &RunReport, name: &str) -> i64 {
    match report.bindings.get(name).unwrap() {
        Value::Int(n) => *n,
        other => panic!("{name} is {other:?}"),
    }
}

// ---------- Conditionals and halting ----------

#[test]
fn falsy_if_skips_the_next_instruction() {
    let report = run_ok("let x 10\nadd 5 3\nif 0\nassign x 20\nexit");
    assert_eq!(
        outcomes(&report),
        vec![
            &Outcome::Bound {
                name: "x".into(),
                value: Value::Int(10)
            },
            &Outcome::Computed(Value::Int(8)),
            &Outcome::Branch {
                taken: false,
                skip: 3
            },
            &Outcome::Halt,
        ]
    );
    let indices: Vec<u64> = report.trace.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 3, 6, 11]);
    assert!(report.trace.iter().all(|r| r.mnemonic != "assign"));
    assert_eq!(report.bindings.len(), 1);
    assert_eq!(int(&report, "x"), 10);
}

#[test]
fn truthy_if_runs_the_next_instruction() {
    let report = run_ok("let x 10\nif x\nassign x 20\nexit");
    assert_eq!(int(&report, "x"), 20);
    assert_eq!(
        report.trace[1].outcome,
        Outcome::Branch {
            taken: true,
            skip: 0
        }
    );
}

#[test]
fn conditions_use_truthiness() {
    let report = run_ok(
        "if \"\"\nprint \"empty\"\nif \"s\"\nprint \"str\"\nif []\nprint \"list\"\nif undefined\nprint \"undef\"\nif false\nprint \"false\"\nif -1\nprint \"neg\"",
    );
    assert_eq!(report.outputs().collect::<Vec<_>>(), vec!["str", "neg"]);
}

#[test]
fn while_is_a_single_forward_test() {
    let report = run_ok("while 0\nprint \"loop\"\nprint \"after\"\nwhile 1\nprint \"once\"");
    assert_eq!(report.outputs().collect::<Vec<_>>(), vec!["after", "once"]);
}

#[test]
fn falsy_if_at_end_of_stream_skips_nothing() {
    let report = run_ok("let x 1\nif 0");
    assert_eq!(
        report.trace.last().unwrap().outcome,
        Outcome::Branch {
            taken: false,
            skip: 0
        }
    );
}

#[test]
fn falsy_if_cannot_skip_over_an_undecodable_slot() {
    let stream = InstructionStream::from_slots(vec![
        Instruction::If.into(),
        Operand::lit(0i64).into(),
        Slot::Op(0x02),
    ]);
    let report = execute(&VmConfig::default(), stream, &mut NoFiles);
    assert_eq!(report.state, RunState::Faulted);
    let fault = report.fault.unwrap();
    assert_eq!(fault.index, 2);
    assert_eq!(fault.error, VMError::UnknownOpcode { opcode: 0x02 });
    assert_eq!(report.trace.last().unwrap().mnemonic, "0x02");
}

#[test]
fn falsy_if_does_not_skip_a_truncated_instruction() {
    let stream = InstructionStream::from_slots(vec![
        Instruction::If.into(),
        Operand::lit(0i64).into(),
        Instruction::Let.into(),
        Operand::ident("x").into(),
        Instruction::Exit.into(),
    ]);
    let expected = Fault::new(
        2,
        VMError::TruncatedInstruction {
            mnemonic: "let",
            expected: 2,
            available: 1,
        },
    );
    assert_eq!(stream.validate(), Err(expected.clone()));

    let report = execute(&VmConfig::default(), stream, &mut NoFiles);
    assert_eq!(report.state, RunState::Faulted);
    assert_eq!(report.fault, Some(expected));
    assert_eq!(
        report.trace[0].outcome,
        Outcome::Branch {
            taken: false,
            skip: 0
        }
    );
    assert!(report.bindings.is_empty());
}

#[test]
fn exit_stops_before_later_instructions() {
    let report = run_ok("let x 10\nexit\nassign x 99");
    assert_eq!(int(&report, "x"), 10);
    assert_eq!(report.trace.len(), 2);
    assert_eq!(report.trace[1].outcome, Outcome::Halt);
}

#[test]
fn running_off_the_end_halts() {
    let report = run_ok("run\nlet x 1");
    assert_eq!(report.trace.len(), 2);
    assert_eq!(report.trace[0].outcome, Outcome::Marker);
}

#[test]
fn empty_stream_halts_without_records() {
    let config = VmConfig::default();
    let mut vm = VM::new(&config, InstructionStream::new());
    assert_eq!(vm.state(), RunState::Ready);
    assert_eq!(vm.step(&mut NoFiles), Ok(RunState::Halted));
    assert!(vm.trace().is_empty());
    assert!(vm.fault().is_none());
}

#[test]
fn terminated_context_refuses_to_step() {
    let config = VmConfig::default();
    let stream = assemble_source("let x 1\nexit").unwrap();
    let mut vm = VM::new(&config, stream);
    vm.run(&mut NoFiles).unwrap();
    let pc = vm.pc();
    let records = vm.trace().len();

    let err = vm.step(&mut NoFiles).unwrap_err();
    assert_eq!(
        err,
        Fault::new(pc, VMError::ContextTerminated { state: "halted" })
    );
    assert_eq!(vm.pc(), pc);
    assert_eq!(vm.trace().len(), records);
    assert_eq!(vm.state(), RunState::Halted);
    assert!(vm.fault().is_none());
}

#[test]
fn faulted_context_refuses_to_step() {
    let config = VmConfig::default();
    let stream = assemble_source("assign y 1\nlet x 2").unwrap();
    let mut vm = VM::new(&config, stream);
    assert!(vm.step(&mut NoFiles).is_err());
    let err = vm.step(&mut NoFiles).unwrap_err();
    assert_eq!(err.error, VMError::ContextTerminated { state: "faulted" });
    assert!(!vm.bindings().contains("x"));
}

#[test]
fn pc_advances_by_instruction_width() {
    let config = VmConfig::default();
    let stream = assemble_source("run\nprint 1\nlet x 2\nstore 0 0").unwrap();
    let mut vm = VM::new(&config, stream);
    let mut pcs = vec![vm.pc()];
    for _ in 0..3 {
        assert_eq!(vm.step(&mut NoFiles), Ok(RunState::Running));
        pcs.push(vm.pc());
    }
    assert_eq!(pcs, vec![0, 1, 3, 6]);
}

#[test]
fn every_opcode_advances_pc_by_its_width() {
    let source = "run\nlet x 1\nassign x 2\ncall echo [x]\nprint x\nif 1\nelse\nwhile 1\n\
                  add 1 2\nsub 1 2\nmul 1 2\ndiv 1 2\nalloc p 1\nstore p 5\nload v p\nfree p\n\
                  readFile \"f\"\nwriteFile \"f\" x\ntry\ncatch \"e\"\nexit";
    let config = VmConfig::default();
    let mut files = MemoryFiles::with_files([("f", Value::from("data"))]);
    let mut vm = VM::new(&config, assemble_source(source).unwrap());

    let mut seen = Vec::new();
    while !vm.state().is_terminated() {
        let before = vm.pc();
        let instr = vm.stream.instruction_at(before).unwrap();
        vm.step(&mut files).unwrap();
        assert_eq!(vm.pc() - before, 1 + instr.operand_count(), "{instr}");
        seen.push(instr);
    }

    assert_eq!(vm.state(), RunState::Halted);
    assert_eq!(seen.len(), Instruction::ALL.len());
    for instr in Instruction::ALL {
        assert!(seen.contains(instr), "{instr} not exercised");
    }
}

// ---------- Bindings and arithmetic ----------

#[test]
fn let_overwrites_and_assign_requires_declaration() {
    let report = run_ok("let x 1\nlet x \"two\"\nassign x [x, 3]");
    assert_eq!(
        report.bindings.get("x").unwrap(),
        &Value::List(vec![Value::from("two"), Value::Int(3)])
    );
}

#[test]
fn assign_to_undeclared_faults_with_partial_trace() {
    let (report, fault) = run_expect_fault("let x 1\nassign y 2\nlet z 3");
    assert_eq!(fault.index, 3);
    assert_eq!(fault.error, VMError::UndeclaredVariable { name: "y".into() });
    assert_eq!(report.trace.len(), 2);
    assert!(report.trace[1].outcome.is_fault());
    assert!(!report.bindings.contains("z"));
    assert_eq!(int(&report, "x"), 1);
}

#[test]
fn reading_an_undeclared_name_faults() {
    let (_, fault) = run_expect_fault("print missing");
    assert_eq!(
        fault.error,
        VMError::UndeclaredVariable {
            name: "missing".into()
        }
    );
}

#[test]
fn arithmetic_reports_without_binding() {
    let report = run_ok("let a 7\nsub a 10\nmul a -3\ndiv -7 2\ndiv 7 0\nadd 9223372036854775807 1");
    assert_eq!(
        outcomes(&report),
        vec![
            &Outcome::Bound {
                name: "a".into(),
                value: Value::Int(7)
            },
            &Outcome::Computed(Value::Int(-3)),
            &Outcome::Computed(Value::Int(-21)),
            &Outcome::Computed(Value::Int(-4)),
            &Outcome::Computed(Value::Undefined),
            &Outcome::Computed(Value::Int(i64::MIN)),
        ]
    );
    assert_eq!(report.bindings.len(), 1);
}

#[test]
fn arithmetic_rejects_non_integers() {
    let (_, fault) = run_expect_fault("add \"a\" 1");
    assert_eq!(
        fault.error,
        VMError::TypeMismatch {
            mnemonic: "add",
            position: 0,
            expected: "Int",
            actual: "Str"
        }
    );
    let (_, fault) = run_expect_fault("mul 2 true");
    assert!(matches!(
        fault.error,
        VMError::TypeMismatch { position: 1, actual: "Bool", .. }
    ));
}

#[test]
fn seeded_bindings_are_visible() {
    let config = VmConfig::default();
    let seed: Bindings = [("x".to_string(), Value::Int(5))].into_iter().collect();
    let stream = assemble_source("add x 1\nassign x 6").unwrap();
    let mut vm = VM::with_bindings(&config, stream, seed);
    vm.run(&mut NoFiles).unwrap();
    assert_eq!(vm.trace()[0].outcome, Outcome::Computed(Value::Int(6)));
    assert_eq!(vm.bindings().get("x").unwrap(), &Value::Int(6));
}

// ---------- Output, markers and exceptions ----------

#[test]
fn print_try_and_catch() {
    let report = run_ok("try\nprint \"hello\"\nprint 42\ncatch \"boom\"\nelse");
    assert_eq!(report.outputs().collect::<Vec<_>>(), vec!["hello", "42"]);
    assert_eq!(report.trace[0].outcome, Outcome::Marker);
    assert_eq!(report.trace[3].outcome, Outcome::Caught(Value::from("boom")));
    assert_eq!(report.trace[4].outcome, Outcome::Marker);
}

#[test]
fn trace_records_operands_as_written() {
    let report = run_ok("let x 1\nprint x");
    assert_eq!(report.trace[1].operands, vec![Operand::ident("x")]);
    assert_eq!(report.trace[1].outcome, Outcome::Output("1".into()));
    assert_eq!(report.trace[1].to_string(), "[0003] print x -> output: 1");
}

// ---------- Calls ----------

#[test]
fn trusted_call_binds_result() {
    let report = run_ok("let a 2\ncall add [a, 3]\ncall concat [\"n=\", result]");
    assert_eq!(report.workers_spawned, 2);
    assert_eq!(report.bindings.get(CALL_RESULT).unwrap(), &Value::from("n=5"));
    assert_eq!(
        report.trace[1].outcome,
        Outcome::Bound {
            name: "result".into(),
            value: Value::Int(5)
        }
    );
}

#[test]
fn untrusted_call_never_spawns_a_worker() {
    let (report, fault) = run_expect_fault("call rm_rf [\"/\"]");
    assert_eq!(fault.index, 0);
    assert_eq!(fault.error, VMError::UnsafeCall { name: "rm_rf".into() });
    assert_eq!(report.workers_spawned, 0);
    assert!(!report.bindings.contains(CALL_RESULT));
}

#[test]
fn trust_check_precedes_argument_evaluation() {
    let (report, fault) = run_expect_fault("call rm_rf [undeclared]");
    assert!(matches!(fault.error, VMError::UnsafeCall { .. }));
    assert_eq!(report.workers_spawned, 0);
}

#[test]
fn trusted_set_is_configurable() {
    let config = VmConfig::default().with_trusted(["add"]).unwrap();
    let report = run_with(&config, "call add [1, 2]\ncall mul [2, 3]", &mut NoFiles);
    assert_eq!(report.workers_spawned, 1);
    assert_eq!(
        report.fault.unwrap().error,
        VMError::UnsafeCall { name: "mul".into() }
    );
}

#[test]
fn failing_builtin_reports_worker_failure() {
    let (report, fault) = run_expect_fault("call div [1]");
    assert!(matches!(
        fault.error,
        VMError::AsyncWorkerFailure { ref name, .. } if name == "div"
    ));
    assert_eq!(report.workers_spawned, 1);
}

// ---------- Memory ----------

#[test]
fn alloc_store_load_free() {
    let report = run_ok("alloc p 2\nstore p 7\nadd p 1\nload v p\nload w 2\nfree p\nalloc q 1");
    assert_eq!(int(&report, "p"), 1);
    assert_eq!(int(&report, "v"), 7);
    assert_eq!(report.bindings.get("w").unwrap(), &Value::Undefined);
    assert_eq!(int(&report, "q"), 3);
    assert_eq!(
        report.trace[0].outcome,
        Outcome::Allocated {
            name: "p".into(),
            address: 1,
            size: 2
        }
    );
    assert_eq!(report.trace[5].outcome, Outcome::Freed { address: 1 });
}

#[test]
fn load_after_free_faults() {
    let (_, fault) = run_expect_fault("alloc p 1\nstore p 5\nfree p\nload v p");
    assert_eq!(fault.error, VMError::InvalidAddress { address: 1 });
    assert_eq!(fault.index, 8);
}

#[test]
fn invalid_memory_requests_fault() {
    let (_, fault) = run_expect_fault("alloc p 0");
    assert_eq!(fault.error, VMError::InvalidAllocation { size: 0 });
    let (_, fault) = run_expect_fault("alloc p -4");
    assert_eq!(fault.error, VMError::InvalidAllocation { size: -4 });
    let (_, fault) = run_expect_fault("store 9 1");
    assert_eq!(fault.error, VMError::InvalidAddress { address: 9 });
    let (_, fault) = run_expect_fault("alloc p 2\nfree 2");
    assert_eq!(fault.error, VMError::InvalidAddress { address: 2 });
    let (_, fault) = run_expect_fault("free -1");
    assert!(matches!(
        fault.error,
        VMError::TypeMismatch { expected: "non-negative Int", .. }
    ));
}

#[test]
fn encrypted_memory_round_trips_values() {
    let report = run_with(
        &encrypted(),
        "alloc p 3\nstore p \"secret\"\nstore 2 [1, true]\nload a p\nload b 2\nload c 3",
        &mut NoFiles,
    );
    assert_eq!(report.state, RunState::Halted);
    assert_eq!(report.bindings.get("a").unwrap(), &Value::from("secret"));
    assert_eq!(
        report.bindings.get("b").unwrap(),
        &Value::List(vec![Value::Int(1), Value::Bool(true)])
    );
    assert_eq!(report.bindings.get("c").unwrap(), &Value::Undefined);
}

#[test]
fn encrypted_cells_hold_no_plaintext() {
    let config = encrypted();
    let stream = assemble_source("alloc p 1\nstore p \"secret\"").unwrap();
    let mut vm = VM::new(&config, stream);
    vm.run(&mut NoFiles).unwrap();
    let plain = Value::from("secret").to_bytes();
    let raw = vm.memory().raw_cell(1).unwrap();
    assert_ne!(raw, plain.as_slice());
    assert!(!raw.windows(6).any(|w| w == b"secret"));
}

#[test]
fn plain_cells_hold_encoded_values() {
    let config = VmConfig::default();
    let stream = assemble_source("alloc p 1\nstore p 12").unwrap();
    let mut vm = VM::new(&config, stream);
    vm.run(&mut NoFiles).unwrap();
    assert_eq!(
        vm.memory().raw_cell(1).unwrap(),
        Value::Int(12).to_bytes().as_slice()
    );
}

#[test]
fn tampered_encrypted_cell_faults_on_load() {
    let config = encrypted();
    let stream = assemble_source("alloc p 1\nstore p 5\nload v p").unwrap();
    let mut vm = VM::new(&config, stream);
    vm.step(&mut NoFiles).unwrap();
    vm.step(&mut NoFiles).unwrap();
    vm.memory_mut().corrupt(1);
    let fault = vm.step(&mut NoFiles).unwrap_err();
    assert_eq!(fault, Fault::new(6, VMError::CorruptedCell { address: 1 }));
    assert_eq!(vm.state(), RunState::Faulted);
    assert!(!vm.bindings().contains("v"));
}

// ---------- Files ----------

#[test]
fn file_operations_go_through_the_collaborator() {
    let mut files = MemoryFiles::with_files([("in.txt", Value::from("hello"))]);
    let report = run_with(
        &VmConfig::default(),
        "readFile \"in.txt\"\nlet n 3\nwriteFile \"out.txt\" [n, \"x\"]",
        &mut files,
    );
    assert_eq!(report.state, RunState::Halted);
    assert_eq!(
        report.trace[0].outcome,
        Outcome::FileRead {
            file: "in.txt".into(),
            value: Value::from("hello")
        }
    );
    assert_eq!(
        files.get("out.txt"),
        Some(&Value::List(vec![Value::Int(3), Value::from("x")]))
    );
}

#[test]
fn file_failures_fault() {
    let (_, fault) = run_expect_fault("readFile \"in.txt\"");
    assert!(matches!(
        fault.error,
        VMError::FileAccess { ref name, .. } if name == "in.txt"
    ));
    assert_eq!(fault.error.exit_code(), 2);

    let mut files = MemoryFiles::new();
    let report = run_with(&VmConfig::default(), "readFile \"missing\"", &mut files);
    assert!(matches!(
        report.fault.unwrap().error,
        VMError::FileAccess { .. }
    ));

    let (_, fault) = run_expect_fault("writeFile 3 \"x\"");
    assert!(matches!(
        fault.error,
        VMError::TypeMismatch { mnemonic: "writeFile", expected: "Str", .. }
    ));
}

// ---------- Malformed streams ----------

#[test]
fn unknown_opcode_faults_at_its_index() {
    let mut stream = assemble_source("let x 1").unwrap();
    let mut slots = stream.slots().to_vec();
    slots.push(Slot::Op(0xEE));
    stream = InstructionStream::from_slots(slots);

    let report = execute(&VmConfig::default(), stream, &mut NoFiles);
    let fault = report.fault.clone().unwrap();
    assert_eq!(fault.index, 3);
    assert_eq!(fault.error, VMError::UnknownOpcode { opcode: 0xEE });
    assert_eq!(report.trace.len(), 2);
    assert_eq!(report.trace[1].mnemonic, "0xEE");
    assert_eq!(int(&report, "x"), 1);
}

#[test]
fn operand_slot_in_opcode_position_faults() {
    let stream = InstructionStream::from_slots(vec![Operand::lit(1i64).into()]);
    let report = execute(&VmConfig::default(), stream, &mut NoFiles);
    assert_eq!(report.fault.unwrap(), Fault::new(0, VMError::ExpectedOpcode));
    assert_eq!(report.trace[0].mnemonic, "<operand>");
}

#[test]
fn truncated_instruction_faults() {
    let stream = InstructionStream::from_slots(vec![
        Instruction::Let.into(),
        Operand::ident("x").into(),
    ]);
    let report = execute(&VmConfig::default(), stream, &mut NoFiles);
    assert_eq!(
        report.fault.unwrap(),
        Fault::new(
            0,
            VMError::TruncatedInstruction {
                mnemonic: "let",
                expected: 2,
                available: 1
            }
        )
    );
    assert!(report.bindings.is_empty());
}

#[test]
fn name_operand_must_be_an_identifier() {
    let stream = InstructionStream::from_slots(vec![
        Instruction::Let.into(),
        Operand::lit(5i64).into(),
        Operand::lit(1i64).into(),
    ]);
    let report = execute(&VmConfig::default(), stream, &mut NoFiles);
    assert_eq!(
        report.fault.unwrap().error,
        VMError::TypeMismatch {
            mnemonic: "let",
            position: 0,
            expected: "Ident",
            actual: "Int"
        }
    );
}

#[test]
fn serialized_stream_runs_like_the_source() {
    let source = "let x 2\ncall mul [x, 21]\nprint result";
    let stream = assemble_source(source).unwrap();
    let restored = InstructionStream::from_bytes(&stream.to_bytes()).unwrap();
    let a = execute(&VmConfig::default(), stream, &mut NoFiles);
    let b = execute(&VmConfig::default(), restored, &mut NoFiles);
    assert_eq!(a, b);
    assert_eq!(b.outputs().collect::<Vec<_>>(), vec!["42"]);
}
