//! Memory layout planning.
//!
//! Assigns every addressable tensor a unique, chunk-aligned byte offset in
//! the flat address space shared with the hardware backend. The order is
//! fixed: graph inputs, graph outputs, then each node's weight, bias, and
//! scale in pipeline order; identical graphs always produce identical
//! addresses. Two reserved regions follow the data tensors: a verification
//! ("check") region holding expected output words and a scratch ("tmp")
//! region for intermediates, each sized to the largest single tensor
//! footprint seen, so the largest intermediate always fits.

use std::collections::BTreeSet;

use fxgen_graph::{Graph, Handle, OpKind, Tensor, TensorKind};

/// Errors raised during layout planning.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// The configured alignment chunk is not a positive integer.
    #[error("alignment chunk must be positive")]
    InvalidChunk,

    /// The plan does not fit the configured backing-store capacity.
    #[error("address space requires {required} bytes, capacity is {capacity}")]
    CapacityExceeded {
        /// Bytes the plan needs.
        required: usize,
        /// Configured backing-store capacity in bytes.
        capacity: usize,
    },
}

/// Parameters of the shared address space.
#[derive(Clone, Copy, Debug)]
pub struct LayoutConfig {
    /// Alignment chunk in bytes; every footprint is rounded up to it.
    pub chunk: usize,
    /// External bus width in bits, for replication-stride math.
    pub bus_width: u32,
    /// Backing-store capacity in bytes.
    pub capacity: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            chunk: 64,
            bus_width: 32,
            capacity: 8 * 1024 * 1024,
        }
    }
}

/// One tensor's reserved interval `[addr, addr + size_bytes)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// The tensor this region holds.
    pub tensor: Handle<Tensor>,
    /// Chunk-aligned byte offset.
    pub addr: usize,
    /// Footprint in bytes before chunk rounding.
    pub size_bytes: usize,
}

/// The completed address assignment for one compilation run.
#[derive(Clone, Debug, Default)]
pub struct AddressMap {
    /// Data-tensor regions, in assignment order.
    pub regions: Vec<Region>,
    /// Base of the verification region (expected output words).
    pub check_addr: usize,
    /// Base of the scratch region for intermediates.
    pub tmp_addr: usize,
    /// Size of each reserved region in bytes (chunk-rounded max footprint).
    pub reserved_size: usize,
    /// One past the last reserved byte.
    pub total_bytes: usize,
}

impl AddressMap {
    /// Address assigned to a tensor, if it received one.
    pub fn addr_of(&self, tensor: Handle<Tensor>) -> Option<usize> {
        self.regions
            .iter()
            .find(|r| r.tensor == tensor)
            .map(|r| r.addr)
    }
}

fn round_up(value: usize, chunk: usize) -> usize {
    value.div_ceil(chunk) * chunk
}

/// Plans addresses for every addressable tensor in the graph.
///
/// Addressable tensors are the graph's placeholders and outputs plus every
/// variable a node consumes (weights, add operands, bias/scale operands);
/// intermediate results live in the tmp region at execution time and are
/// not assigned individual addresses.
pub fn plan(graph: &Graph, cfg: &LayoutConfig) -> Result<AddressMap, LayoutError> {
    if cfg.chunk == 0 {
        return Err(LayoutError::InvalidChunk);
    }

    let mut order: Vec<Handle<Tensor>> = Vec::new();
    let mut seen: BTreeSet<Handle<Tensor>> = BTreeSet::new();
    let push = |order: &mut Vec<_>, seen: &mut BTreeSet<_>, h: Handle<Tensor>| {
        if seen.insert(h) {
            order.push(h);
        }
    };

    for &h in graph.inputs.iter().chain(graph.outputs.iter()) {
        push(&mut order, &mut seen, h);
    }
    for node in &graph.nodes {
        // Variable data operands first (a matmul's weight, an add's valued
        // operand), then the matmul's bias and scale attributes.
        for &h in &node.inputs {
            if graph.tensors[h].kind == TensorKind::Variable {
                push(&mut order, &mut seen, h);
            }
        }
        if let OpKind::Matmul(attrs) = &node.kind {
            if let Some(bias) = attrs.bias {
                push(&mut order, &mut seen, bias);
            }
            push(&mut order, &mut seen, attrs.scale);
        }
    }

    let mut cursor = 0usize;
    let mut max_footprint = 0usize;
    let mut regions = Vec::with_capacity(order.len());
    for handle in order {
        let size = graph.tensors[handle].footprint_bytes(cfg.bus_width);
        regions.push(Region {
            tensor: handle,
            addr: cursor,
            size_bytes: size,
        });
        cursor += round_up(size, cfg.chunk);
        max_footprint = max_footprint.max(size);
    }

    let reserved_size = round_up(max_footprint, cfg.chunk);
    let check_addr = cursor;
    let tmp_addr = check_addr + reserved_size;
    let total_bytes = tmp_addr + reserved_size;

    if total_bytes > cfg.capacity {
        return Err(LayoutError::CapacityExceeded {
            required: total_bytes,
            capacity: cfg.capacity,
        });
    }

    log::debug!(
        "layout: {} regions, check@{check_addr:#x}, tmp@{tmp_addr:#x}, {total_bytes} bytes total",
        regions.len(),
    );

    Ok(AddressMap {
        regions,
        check_addr,
        tmp_addr,
        reserved_size,
        total_bytes,
    })
}
