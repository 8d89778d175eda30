//! Random program generator: bounded, loop-balanced synthetic workloads.

use rand::Rng;

use crate::instruction::{Instruction, MAX_LOOP_DEPTH};

/// Generate a program of between `min_ins` and `max_ins` instructions for the
/// named process. FOR_START/FOR_END pairs are balanced, nesting is capped at
/// three, and every loop body holds at least one instruction.
pub fn generate_program(
    process_name: &str,
    min_ins: usize,
    max_ins: usize,
    rng: &mut impl Rng,
) -> Vec<Instruction> {
    let target = rng.gen_range(min_ins..=max_ins.max(min_ins));
    let mut program = Vec::with_capacity(target);
    emit_block(process_name, target, 0, &mut program, rng);
    program
}

/// Emit exactly `budget` instructions (loop markers included) at the given
/// nesting depth.
fn emit_block(
    process_name: &str,
    budget: usize,
    depth: usize,
    program: &mut Vec<Instruction>,
    rng: &mut impl Rng,
) {
    let mut emitted = 0;
    while emitted < budget {
        let remaining = budget - emitted;
        match rng.gen_range(0..6) {
            // A FOR needs room for FOR_START, at least one body instruction,
            // and FOR_END; without it (or at full depth) fall through to PRINT.
            5 if depth < MAX_LOOP_DEPTH && remaining >= 3 => {
                program.push(Instruction::ForStart {
                    repeat: rng.gen_range(1..=3),
                });
                emitted += 1;
                let body = rng.gen_range(1..=3).min(budget - emitted - 1);
                emit_block(process_name, body, depth + 1, program, rng);
                emitted += body;
                program.push(Instruction::ForEnd);
                emitted += 1;
            }
            0 | 5 => {
                program.push(Instruction::Print(format!(
                    "Hello world from {process_name}!"
                )));
                emitted += 1;
            }
            1 => {
                program.push(Instruction::Declare {
                    name: format!("var{}", program.len()),
                    value: rng.gen(),
                });
                emitted += 1;
            }
            2 => {
                program.push(Instruction::Add {
                    dest: format!("result{}", program.len()),
                    lhs: rng.gen::<u16>().to_string(),
                    rhs: rng.gen::<u16>().to_string(),
                });
                emitted += 1;
            }
            3 => {
                program.push(Instruction::Subtract {
                    dest: format!("result{}", program.len()),
                    lhs: rng.gen::<u16>().to_string(),
                    rhs: rng.gen::<u16>().to_string(),
                });
                emitted += 1;
            }
            _ => {
                program.push(Instruction::Sleep { ticks: rng.gen() });
                emitted += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn max_nesting(program: &[Instruction]) -> usize {
        let mut depth = 0usize;
        let mut max = 0;
        for ins in program {
            match ins {
                Instruction::ForStart { .. } => {
                    depth += 1;
                    max = max.max(depth);
                }
                Instruction::ForEnd => depth = depth.checked_sub(1).expect("unbalanced FOR_END"),
                _ => {}
            }
        }
        assert_eq!(depth, 0, "unbalanced FOR_START");
        max
    }

    #[test]
    fn generator_hits_exact_target_when_range_is_degenerate() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let program = generate_program("p", 12, 12, &mut rng);
            assert_eq!(program.len(), 12);
        }
    }

    #[test]
    fn generator_stays_within_range() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let program = generate_program("p", 5, 40, &mut rng);
            assert!((5..=40).contains(&program.len()));
        }
    }

    #[test]
    fn generator_balances_loops_and_caps_nesting() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..100 {
            let program = generate_program("p", 30, 60, &mut rng);
            assert!(max_nesting(&program) <= MAX_LOOP_DEPTH);
        }
    }

    #[test]
    fn generator_loop_bodies_are_nonempty() {
        let mut rng = StdRng::seed_from_u64(31);
        for _ in 0..100 {
            let program = generate_program("p", 10, 30, &mut rng);
            for window in program.windows(2) {
                assert!(
                    !matches!(
                        (&window[0], &window[1]),
                        (Instruction::ForStart { .. }, Instruction::ForEnd)
                    ),
                    "empty loop body in {program:?}"
                );
            }
        }
    }

    #[test]
    fn generator_repeat_counts_in_range() {
        let mut rng = StdRng::seed_from_u64(43);
        for _ in 0..100 {
            for ins in generate_program("p", 20, 40, &mut rng) {
                if let Instruction::ForStart { repeat } = ins {
                    assert!((1..=3).contains(&repeat));
                }
            }
        }
    }

    #[test]
    fn generator_print_carries_process_name() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut seen = false;
        for _ in 0..20 {
            for ins in generate_program("worker9", 40, 40, &mut rng) {
                if let Instruction::Print(msg) = ins {
                    assert_eq!(msg, "Hello world from worker9!");
                    seen = true;
                }
            }
        }
        assert!(seen, "no PRINT generated across 800 instructions");
    }

    #[test]
    fn generator_is_deterministic_for_a_seed() {
        let a = generate_program("p", 10, 30, &mut StdRng::seed_from_u64(99));
        let b = generate_program("p", 10, 30, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }
}
