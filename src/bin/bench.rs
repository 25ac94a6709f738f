//! VM benchmark binary.
//!
//! Measures assembly and dispatch time for generated straight-line programs,
//! comparing plain and encrypted memory.
//! Run with: `cargo run --release --bin bench`

use std::time::{Duration, Instant};

use cellvm::utils::log;
use cellvm::virtual_machine::assembler::assemble_source;
use cellvm::virtual_machine::config::{MemoryMode, VmConfig};
use cellvm::virtual_machine::files::NoFiles;
use cellvm::virtual_machine::program::InstructionStream;
use cellvm::virtual_machine::vm::execute;

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: String,
    iterations: u64,
    total: Duration,
    /// Trace records produced by the last run.
    steps: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total / self.iterations as u32
    }

    fn print(&self) {
        let ns_per_op = self.avg().as_nanos();
        let ns_per_step = if self.steps > 0 {
            format!("{:>8.1}", ns_per_op as f64 / self.steps as f64)
        } else {
            "       -".to_string()
        };
        println!(
            "  {:<34} {:>7} iters {:>10.3} us/iter {:>8} steps  {} ns/step",
            self.name,
            self.iterations,
            ns_per_op as f64 / 1000.0,
            self.steps,
            ns_per_step,
        );
    }
}

/// Runs `f` for at least `min_duration`, returning aggregated results.
fn bench<F>(name: String, min_duration: Duration, mut f: F) -> BenchResult
where
    F: FnMut() -> u64,
{
    // Warmup
    for _ in 0..5 {
        f();
    }

    let mut iterations = 0u64;
    let mut steps = 0u64;
    let start = Instant::now();
    while start.elapsed() < min_duration {
        steps = f();
        iterations += 1;
    }

    BenchResult {
        name,
        iterations,
        total: start.elapsed(),
        steps,
    }
}

/// Runs the stream to completion and returns the number of trace records.
fn run_steps(config: &VmConfig, stream: &InstructionStream) -> u64 {
    let report = execute(config, stream.clone(), &mut NoFiles);
    if let Some(fault) = report.fault {
        panic!("benchmark program faulted: {fault}");
    }
    report.trace.len() as u64
}

// ---------------------------------------------------------------------------
// Program generators
// ---------------------------------------------------------------------------

/// `n` rounds of the four arithmetic instructions over bound operands.
fn arithmetic_source(n: usize) -> String {
    let mut src = String::from("let a 7\nlet b 3\n");
    for _ in 0..n {
        src.push_str("add a b\nsub a b\nmul a b\ndiv a b\n");
    }
    src
}

/// Alternating taken and skipped conditionals.
fn branch_source(n: usize) -> String {
    let mut src = String::from("let x 0\n");
    for i in 0..n {
        src.push_str(&format!("if {}\nassign x {i}\n", i % 2));
    }
    src
}

/// One block of `n` cells, each stored then loaded back.
fn memory_source(n: usize) -> String {
    let mut src = format!("alloc p {n}\n");
    for i in 0..n {
        src.push_str(&format!("store {} {i}\nload v {}\n", i + 1, i + 1));
    }
    src.push_str("free p\n");
    src
}

/// `n` trusted calls, each on its own worker thread.
fn call_source(n: usize) -> String {
    let mut src = String::new();
    for i in 0..n {
        src.push_str(&format!("call add [{i}, 1]\n"));
    }
    src
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    // Per-run halt and worker lines would dominate the timings.
    log::set_level(None);

    let min = Duration::from_secs(2);
    let plain = VmConfig::default().with_memory_mode(MemoryMode::Plain);
    let encrypted = VmConfig::default().with_memory_mode(MemoryMode::Encrypted);

    println!("VM Benchmarks (each runs for >= 2s)\n");
    println!(
        "  {:<34} {:>7}       {:>14} {:>14}  {:>10}",
        "benchmark", "iters", "avg time", "steps/run", "ns/step"
    );
    println!("  {}", "-".repeat(86));

    // 1. Assembly only
    let arith_src = arithmetic_source(2_500);
    bench("assemble(10K instrs)".to_string(), min, || {
        let stream = assemble_source(&arith_src).expect("asm");
        debug_assert!(!stream.is_empty());
        0
    })
    .print();

    // Pre-assemble programs (assembly cost excluded from the rest)
    let arith = assemble_source(&arith_src).expect("asm");
    let branch = assemble_source(&branch_source(5_000)).expect("asm");
    let call = assemble_source(&call_source(200)).expect("asm");

    // 2. Arithmetic
    bench("arithmetic(10K)".to_string(), min, || run_steps(&plain, &arith)).print();

    // 3. Conditionals
    bench("branch_skip(5K)".to_string(), min, || run_steps(&plain, &branch)).print();

    // 4. Memory in both modes
    for &n in &[100usize, 1_000] {
        let mem = assemble_source(&memory_source(n)).expect("asm");
        for (label, config) in [("plain", &plain), ("encrypted", &encrypted)] {
            bench(format!("mem_store_load({n}, {label})"), min, || {
                run_steps(config, &mem)
            })
            .print();
        }
    }

    // 5. Worker spawn overhead
    bench("call_overhead(200)".to_string(), min, || run_steps(&plain, &call)).print();

    println!();
}
