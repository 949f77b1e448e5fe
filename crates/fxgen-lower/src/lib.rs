//! Lowering, layout, and packing for the fxgen pipeline.
//!
//! Three stages run in order once a graph is final:
//! [`fuse`] rewrites raw linear-algebra nodes into fused quantized
//! operators, [`layout`] assigns every tensor a chunk-aligned address in
//! the flat space shared with the hardware backend, and [`pack`]
//! materializes a memory image from the assigned addresses and tensor
//! values.

pub mod fuse;
pub mod layout;
pub mod pack;

pub use fuse::{lower_add, lower_gemm, AffineFusion, GemmSpec, LowerError, LowerOptions, Lowered};
pub use layout::{plan, AddressMap, LayoutConfig, LayoutError, Region};
pub use pack::{pack_graph, MemoryImage, PackError};
