//! Verification state machine.
//!
//! One run walks `Idle -> Started -> Running -> Done` and settles on
//! `Verified` or `Failed`. Every output element is compared in row-major
//! order over the output's logical shape, addressed through its aligned
//! shape; mismatches are collected with their full multi-index, never
//! masked, and a failed run is terminal.

use fxgen_backend_core::{GlobalAddrs, SimHandle};
use fxgen_graph::Tensor;

/// Phase of a single verification run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    /// No run issued yet.
    #[default]
    Idle,
    /// Base addresses written, start command issued.
    Started,
    /// Waiting on the completion signal.
    Running,
    /// Completion observed, comparison pending.
    Done,
    /// All output elements matched the reference.
    Verified,
    /// At least one element disagreed.
    Failed,
}

/// One disagreeing output element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    /// Multi-index into the output's logical shape.
    pub index: Vec<usize>,
    /// Word the hardware produced.
    pub got: i64,
    /// Independently computed reference word.
    pub want: i64,
}

/// How tolerance violations in the float cross-check are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strictness {
    /// Log each violation and keep going.
    #[default]
    Warn,
    /// Fail the run on any violation.
    Enforce,
}

/// Optional floating-point cross-check against an external reference.
#[derive(Clone, Debug)]
pub struct FloatCheck {
    /// Reference values in float space, row-major over the logical shape.
    pub reference: Vec<f64>,
    /// Declared output scale factor applied to the reference.
    pub scale: f64,
    /// Absolute tolerance after scaling.
    pub tolerance: f64,
    /// Whether a violation fails the run.
    pub strictness: Strictness,
}

/// Knobs for one verification run.
#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Optional float cross-check.
    pub float_check: Option<FloatCheck>,
}

/// Outcome of one verification run.
#[derive(Clone, Debug)]
pub struct VerifyReport {
    /// Terminal state, `Verified` or `Failed`.
    pub state: RunState,
    /// Elapsed execution cycles between start and completion.
    pub cycles: u64,
    /// Every disagreeing element, in row-major order.
    pub mismatches: Vec<Mismatch>,
    /// Float cross-check elements outside tolerance.
    pub tolerance_violations: usize,
}

impl VerifyReport {
    /// Whether the run verified cleanly.
    pub fn passed(&self) -> bool {
        self.state == RunState::Verified
    }
}

/// Errors raised by a verification run.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The float cross-check reference has the wrong element count.
    #[error("float reference has {got} elements, output has {expected}")]
    ReferenceLength {
        /// Output element count.
        expected: usize,
        /// Reference element count.
        got: usize,
    },
}

fn unravel(shape: &[usize], mut linear: usize) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (dim, &extent) in shape.iter().enumerate().rev() {
        index[dim] = linear % extent;
        linear /= extent;
    }
    index
}

/// Drives one verification run over a design.
///
/// Writes the base addresses, issues start, blocks until completion, then
/// compares the hardware words at `out_addr` against the reference words at
/// `check_addr` element by element.
pub fn run(
    sim: &mut dyn SimHandle,
    addrs: GlobalAddrs,
    output: &Tensor,
    check_addr: usize,
    bus_width: u32,
    opts: &VerifyOptions,
) -> Result<VerifyReport, VerifyError> {
    if let Some(check) = &opts.float_check {
        if check.reference.len() != output.len() {
            return Err(VerifyError::ReferenceLength {
                expected: output.len(),
                got: check.reference.len(),
            });
        }
    }

    sim.set_global_addrs(addrs);
    let start_cycle = sim.cycle_count();
    sim.start();
    log::debug!("verify: {:?}, output `{}`", RunState::Started, output.name);
    sim.wait_done();
    log::debug!("verify: {:?}", RunState::Done);
    let cycles = sim.cycle_count() - start_cycle;

    let last = output.shape.last().copied().unwrap_or(1);
    let aligned_last = *output
        .aligned_shape(bus_width)
        .last()
        .unwrap_or(&1);
    let mut mismatches = Vec::new();
    let mut tolerance_violations = 0;
    for linear in 0..output.len() {
        let row = linear / last;
        let col = linear % last;
        let word = row * aligned_last + col;
        let got = sim.read_word(word, addrs.out, output.dtype);
        let want = sim.read_word(word, check_addr, output.dtype);
        if got != want {
            let index = unravel(&output.shape, linear);
            log::warn!("NG {index:?} got {got} expected {want}");
            mismatches.push(Mismatch { index, got, want });
        }
        if let Some(check) = &opts.float_check {
            let expected = check.reference[linear] * check.scale;
            if (got as f64 - expected).abs() > check.tolerance {
                log::warn!(
                    "tolerance: {:?} got {got}, float reference {expected}",
                    unravel(&output.shape, linear),
                );
                tolerance_violations += 1;
            }
        }
    }

    let strict_violation = tolerance_violations > 0
        && opts
            .float_check
            .as_ref()
            .is_some_and(|c| c.strictness == Strictness::Enforce);
    let state = if mismatches.is_empty() && !strict_violation {
        RunState::Verified
    } else {
        RunState::Failed
    };
    log::debug!(
        "verify: {state:?} after {cycles} cycles, {} mismatch(es)",
        mismatches.len(),
    );

    Ok(VerifyReport {
        state,
        cycles,
        mismatches,
        tolerance_violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxgen_graph::IntDType;
    use std::collections::HashMap;

    /// Scripted design: serves reads from a sparse word map.
    struct ScriptedSim {
        words: HashMap<(usize, usize), i64>,
        cycles: u64,
        started: bool,
    }

    impl ScriptedSim {
        fn new(out: &[i64], out_addr: usize, check: &[i64], check_addr: usize) -> Self {
            let mut words = HashMap::new();
            for (i, &v) in out.iter().enumerate() {
                words.insert((out_addr, i), v);
            }
            for (i, &v) in check.iter().enumerate() {
                words.insert((check_addr, i), v);
            }
            Self {
                words,
                cycles: 0,
                started: false,
            }
        }
    }

    impl SimHandle for ScriptedSim {
        fn set_global_addrs(&mut self, _addrs: GlobalAddrs) {}
        fn start(&mut self) {
            self.started = true;
        }
        fn wait_done(&mut self) {
            if self.started {
                self.cycles += 100;
                self.started = false;
            }
        }
        fn cycle_count(&self) -> u64 {
            self.cycles
        }
        fn read_word(&self, index: usize, base: usize, _dtype: IntDType) -> i64 {
            self.words.get(&(base, index)).copied().unwrap_or(0)
        }
    }

    fn output_tensor(shape: Vec<usize>) -> Tensor {
        Tensor::placeholder("out", IntDType::I16, shape)
    }

    #[test]
    fn single_mismatch_fails_with_its_index() {
        let mut sim = ScriptedSim::new(&[1, 2, 3, 4], 0x100, &[1, 2, 9, 4], 0x200);
        let report = run(
            &mut sim,
            GlobalAddrs {
                out: 0x100,
                ..GlobalAddrs::default()
            },
            &output_tensor(vec![4]),
            0x200,
            16,
            &VerifyOptions::default(),
        )
        .unwrap();
        assert_eq!(report.state, RunState::Failed);
        assert!(!report.passed());
        assert_eq!(
            report.mismatches,
            vec![Mismatch {
                index: vec![2],
                got: 3,
                want: 9,
            }]
        );
    }

    #[test]
    fn clean_run_verifies_and_reports_cycles() {
        let mut sim = ScriptedSim::new(&[7, 8], 0, &[7, 8], 0x40);
        let report = run(
            &mut sim,
            GlobalAddrs::default(),
            &output_tensor(vec![2]),
            0x40,
            16,
            &VerifyOptions::default(),
        )
        .unwrap();
        assert_eq!(report.state, RunState::Verified);
        assert!(report.passed());
        assert_eq!(report.cycles, 100);
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn comparison_skips_alignment_padding() {
        // Logical shape [2, 3], 16-bit elements on a 64-bit bus: rows pad
        // to 4 words, and word 3 of each row must not be compared.
        let out = &[1, 2, 3, -99, 4, 5, 6, -99];
        let check = &[1, 2, 3, 0, 4, 5, 6, 0];
        let mut sim = ScriptedSim::new(out, 0, check, 0x40);
        let report = run(
            &mut sim,
            GlobalAddrs::default(),
            &output_tensor(vec![2, 3]),
            0x40,
            64,
            &VerifyOptions::default(),
        )
        .unwrap();
        assert_eq!(report.state, RunState::Verified);
    }

    #[test]
    fn multi_index_coordinates_are_unraveled() {
        let out = &[0, 0, 0, 0, 0, 5];
        let check = &[0, 0, 0, 0, 0, 0];
        let mut sim = ScriptedSim::new(out, 0, check, 0x40);
        let report = run(
            &mut sim,
            GlobalAddrs::default(),
            &output_tensor(vec![2, 3]),
            0x40,
            16,
            &VerifyOptions::default(),
        )
        .unwrap();
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].index, vec![1, 2]);
    }

    #[test]
    fn lenient_tolerance_check_only_warns() {
        let mut sim = ScriptedSim::new(&[10, 20], 0, &[10, 20], 0x40);
        let report = run(
            &mut sim,
            GlobalAddrs::default(),
            &output_tensor(vec![2]),
            0x40,
            16,
            &VerifyOptions {
                float_check: Some(FloatCheck {
                    reference: vec![5.0, 11.0],
                    scale: 2.0,
                    tolerance: 0.5,
                    strictness: Strictness::Warn,
                }),
            },
        )
        .unwrap();
        // 20 vs 22.0 is out of tolerance but the run still verifies.
        assert_eq!(report.state, RunState::Verified);
        assert_eq!(report.tolerance_violations, 1);
    }

    #[test]
    fn strict_tolerance_check_fails_the_run() {
        let mut sim = ScriptedSim::new(&[10, 20], 0, &[10, 20], 0x40);
        let report = run(
            &mut sim,
            GlobalAddrs::default(),
            &output_tensor(vec![2]),
            0x40,
            16,
            &VerifyOptions {
                float_check: Some(FloatCheck {
                    reference: vec![5.0, 11.0],
                    scale: 2.0,
                    tolerance: 0.5,
                    strictness: Strictness::Enforce,
                }),
            },
        )
        .unwrap();
        // The integer words agree, but strict tolerance still fails the run.
        assert_eq!(report.state, RunState::Failed);
        assert!(report.mismatches.is_empty());
        assert_eq!(report.tolerance_violations, 1);
    }

    #[test]
    fn wrong_reference_length_rejected() {
        let mut sim = ScriptedSim::new(&[1], 0, &[1], 0x40);
        let err = run(
            &mut sim,
            GlobalAddrs::default(),
            &output_tensor(vec![1]),
            0x40,
            16,
            &VerifyOptions {
                float_check: Some(FloatCheck {
                    reference: vec![1.0, 2.0],
                    scale: 1.0,
                    tolerance: 0.5,
                    strictness: Strictness::Warn,
                }),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::ReferenceLength {
                expected: 1,
                got: 2,
            }
        ));
    }
}
