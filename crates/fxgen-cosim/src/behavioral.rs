//! Behavioral hardware model.
//!
//! [`BehavioralSim`] executes the lowered graph over the shared memory
//! image exactly the way the emitted design would: placeholder feeds are
//! read out of their planned regions, the integer reference evaluator runs
//! the pipeline, and results land at the output base address. It answers
//! the same register protocol as an RTL simulator, so the verifier cannot
//! tell the two apart.

use std::collections::BTreeMap;

use fxgen_backend_core::{GlobalAddrs, SimHandle};
use fxgen_graph::{eval_graph, Graph, IntDType, OpKind};
use fxgen_lower::{AddressMap, LayoutConfig, MemoryImage};

/// Cycles charged per node for launch and drain.
const NODE_OVERHEAD_CYCLES: u64 = 16;

/// A software stand-in for a running design.
pub struct BehavioralSim {
    graph: Graph,
    map: AddressMap,
    cfg: LayoutConfig,
    image: MemoryImage,
    addrs: GlobalAddrs,
    cycles: u64,
    pending: bool,
}

impl BehavioralSim {
    /// Wraps a lowered graph, its address plan, and a packed image.
    pub fn new(graph: Graph, map: AddressMap, cfg: LayoutConfig, image: MemoryImage) -> Self {
        Self {
            graph,
            map,
            cfg,
            image,
            addrs: GlobalAddrs::default(),
            cycles: 0,
            pending: false,
        }
    }

    /// Shared memory image, for inspection.
    pub fn image(&self) -> &MemoryImage {
        &self.image
    }

    /// Shared memory image, for writing feeds and expected outputs.
    pub fn image_mut(&mut self) -> &mut MemoryImage {
        &mut self.image
    }

    fn input_addr(&self, position: usize) -> Option<usize> {
        if position == 0 {
            Some(self.addrs.input)
        } else {
            self.map.addr_of(self.graph.inputs[position])
        }
    }

    fn output_addr(&self, position: usize) -> Option<usize> {
        if position == 0 {
            Some(self.addrs.out)
        } else {
            self.map.addr_of(self.graph.outputs[position])
        }
    }

    /// A simple MAC-count latency model: one cycle per multiply-accumulate
    /// or elementwise add, plus fixed per-node overhead.
    fn estimate_cycles(&self) -> u64 {
        let mut total = 0u64;
        for node in &self.graph.nodes {
            let out = &self.graph.tensors[node.output];
            total += NODE_OVERHEAD_CYCLES;
            total += match &node.kind {
                OpKind::Matmul(_) => {
                    let k = self.graph.tensors[node.inputs[1]]
                        .shape
                        .last()
                        .copied()
                        .unwrap_or(1);
                    (out.len() * k) as u64
                }
                OpKind::Add(_) => out.len() as u64,
            };
        }
        total
    }

    fn execute(&mut self) {
        let mut feeds = BTreeMap::new();
        for (i, &h) in self.graph.inputs.iter().enumerate() {
            let tensor = &self.graph.tensors[h];
            let Some(addr) = self.input_addr(i) else {
                log::warn!("input `{}` has no planned address", tensor.name);
                return;
            };
            let values = self
                .image
                .read_tensor(tensor, addr, tensor.align(self.cfg.bus_width));
            feeds.insert(tensor.name.clone(), values);
        }

        let results = match eval_graph(&self.graph, &feeds) {
            Ok(results) => results,
            Err(err) => {
                log::warn!("behavioral run failed: {err}");
                return;
            }
        };

        for (i, values) in results.iter().enumerate() {
            let handle = self.graph.outputs[i];
            let Some(addr) = self.output_addr(i) else {
                log::warn!(
                    "output `{}` has no planned address",
                    self.graph.tensors[handle].name
                );
                return;
            };
            let tensor = &self.graph.tensors[handle];
            let align = tensor.align(self.cfg.bus_width);
            if let Err(err) = self.image.write_tensor(tensor, values, addr, align) {
                log::warn!("behavioral run failed: {err}");
                return;
            }
        }
        self.cycles += self.estimate_cycles();
    }
}

impl SimHandle for BehavioralSim {
    fn set_global_addrs(&mut self, addrs: GlobalAddrs) {
        self.addrs = addrs;
    }

    fn start(&mut self) {
        self.pending = true;
        self.cycles += 1;
    }

    fn wait_done(&mut self) {
        if self.pending {
            self.execute();
            self.pending = false;
        }
    }

    fn cycle_count(&self) -> u64 {
        self.cycles
    }

    fn read_word(&self, index: usize, base: usize, dtype: IntDType) -> i64 {
        self.image.read_elem(index, base, dtype)
    }
}
