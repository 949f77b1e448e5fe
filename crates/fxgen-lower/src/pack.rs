//! Backing-store serialization.
//!
//! The hardware sees a single flat array of fixed-width words. Tensors of
//! arbitrary element width are bit-packed into it little-endian, with the
//! innermost dimension padded out to the replication stride so the parallel
//! read ports of the consuming hardware see pre-expanded rows. The image is
//! the ABI between compilation and co-simulation: the verifier and the
//! behavioral simulator both address it through the exact same convention.

use fxgen_graph::{Graph, IntDType, Tensor};

use crate::layout::{AddressMap, LayoutConfig};

/// Errors raised while building or addressing a memory image.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// The image word width is zero or wider than 64 bits.
    #[error("unsupported image word width {0}")]
    BadWidth(u32),

    /// A write would land outside the image.
    #[error("write of {size} bytes at {addr:#x} exceeds image of {capacity} bytes")]
    OutOfBounds {
        /// Base address of the offending write.
        addr: usize,
        /// Size of the offending write in bytes.
        size: usize,
        /// Image capacity in bytes.
        capacity: usize,
    },

    /// A tensor scheduled for packing carries no compile-time value.
    #[error("tensor `{0}` has no value to pack")]
    MissingValue(String),
}

/// A flat array of fixed-width words backing the simulated hardware memory.
#[derive(Clone, Debug)]
pub struct MemoryImage {
    words: Vec<u64>,
    word_width: u32,
    size_bytes: usize,
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl MemoryImage {
    /// Creates an image of `size_bytes`, every word filled with `sentinel`.
    pub fn new(word_width: u32, size_bytes: usize, sentinel: u64) -> Result<Self, PackError> {
        if word_width == 0 || word_width > 64 {
            return Err(PackError::BadWidth(word_width));
        }
        let words = (size_bytes * 8).div_ceil(word_width as usize);
        Ok(Self {
            words: vec![sentinel & mask(word_width); words],
            word_width,
            size_bytes,
        })
    }

    /// Image word width in bits.
    pub fn word_width(&self) -> u32 {
        self.word_width
    }

    /// Image capacity in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn check_span(&self, addr: usize, size: usize) -> Result<(), PackError> {
        if addr + size > self.size_bytes {
            return Err(PackError::OutOfBounds {
                addr,
                size,
                capacity: self.size_bytes,
            });
        }
        Ok(())
    }

    fn put_bits(&mut self, mut bit: usize, mut value: u64, mut width: u32) {
        let ww = self.word_width as usize;
        while width > 0 {
            let word = bit / ww;
            let off = (bit % ww) as u32;
            let take = width.min(ww as u32 - off);
            let m = mask(take);
            self.words[word] = (self.words[word] & !(m << off)) | ((value & m) << off);
            value = if take >= 64 { 0 } else { value >> take };
            bit += take as usize;
            width -= take;
        }
    }

    fn get_bits(&self, mut bit: usize, mut width: u32) -> u64 {
        let ww = self.word_width as usize;
        let mut value = 0u64;
        let mut shift = 0u32;
        while width > 0 {
            let word = bit / ww;
            let off = (bit % ww) as u32;
            let take = width.min(ww as u32 - off);
            value |= ((self.words[word] >> off) & mask(take)) << shift;
            bit += take as usize;
            shift += take;
            width -= take;
        }
        value
    }

    /// Writes the raw bit pattern of one element at aligned-row-major
    /// position `index` relative to byte address `base`.
    pub fn write_elem(&mut self, index: usize, base: usize, dtype: IntDType, value: i64) {
        let bit = base * 8 + index * dtype.width as usize;
        self.put_bits(bit, dtype.bits_from_value(value), dtype.width as u32);
    }

    /// Reads one element back, sign-extending per `dtype`.
    pub fn read_elem(&self, index: usize, base: usize, dtype: IntDType) -> i64 {
        let bit = base * 8 + index * dtype.width as usize;
        dtype.value_from_bits(self.get_bits(bit, dtype.width as u32))
    }

    /// Packs a tensor's value array at its assigned address.
    ///
    /// Rows of the innermost dimension are padded to the replication stride
    /// `align` with zeros, matching [`Tensor::aligned_shape`]. Only bits in
    /// `[addr, addr + footprint)` are touched.
    pub fn write_tensor(
        &mut self,
        tensor: &Tensor,
        values: &[i64],
        addr: usize,
        align: usize,
    ) -> Result<(), PackError> {
        let last = tensor.shape.last().copied().unwrap_or(1);
        let aligned_last = last.div_ceil(align) * align;
        let rows = tensor.len() / last;
        let size = (rows * aligned_last * tensor.dtype.width as usize).div_ceil(8);
        self.check_span(addr, size)?;

        for row in 0..rows {
            for j in 0..aligned_last {
                let value = if j < last { values[row * last + j] } else { 0 };
                self.write_elem(row * aligned_last + j, addr, tensor.dtype, value);
            }
        }
        Ok(())
    }

    /// Reads a tensor back through the same addressing convention.
    pub fn read_tensor(&self, tensor: &Tensor, addr: usize, align: usize) -> Vec<i64> {
        let last = tensor.shape.last().copied().unwrap_or(1);
        let aligned_last = last.div_ceil(align) * align;
        let rows = tensor.len() / last;
        let mut out = Vec::with_capacity(tensor.len());
        for row in 0..rows {
            for j in 0..last {
                out.push(self.read_elem(row * aligned_last + j, addr, tensor.dtype));
            }
        }
        out
    }
}

/// Serializes every valued tensor with an assigned address into a fresh image.
///
/// Placeholders carry no compile-time value and are skipped; the driver
/// writes their feeds into the same regions before starting a run.
pub fn pack_graph(
    graph: &Graph,
    map: &AddressMap,
    cfg: &LayoutConfig,
) -> Result<MemoryImage, PackError> {
    let mut image = MemoryImage::new(cfg.bus_width, map.total_bytes, 0)?;
    for region in &map.regions {
        let tensor = &graph.tensors[region.tensor];
        let Some(values) = tensor.value.as_deref() else {
            continue;
        };
        image.write_tensor(tensor, values, region.addr, tensor.align(cfg.bus_width))?;
    }
    log::debug!(
        "packed {} regions into {} x {}-bit words",
        map.regions.len(),
        image.words.len(),
        cfg.bus_width,
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: Vec<usize>, dtype: IntDType, values: Vec<i64>) -> Tensor {
        let mut t = Tensor::variable("t", dtype, shape);
        t.set_value(values).unwrap();
        t
    }

    #[test]
    fn round_trip_narrow_elements() {
        let t = tensor(vec![2, 3], IntDType::I8, vec![1, -2, 3, -4, 5, -128]);
        let mut image = MemoryImage::new(32, 64, 0).unwrap();
        image.write_tensor(&t, t.value.as_deref().unwrap(), 0, 1).unwrap();
        assert_eq!(image.read_tensor(&t, 0, 1), vec![1, -2, 3, -4, 5, -128]);
    }

    #[test]
    fn round_trip_with_replication_stride() {
        // 8-bit elements on a 32-bit bus: rows pad to multiples of 4.
        let t = tensor(vec![2, 3], IntDType::I8, vec![1, 2, 3, 4, 5, 6]);
        let mut image = MemoryImage::new(32, 64, 0).unwrap();
        image.write_tensor(&t, t.value.as_deref().unwrap(), 0, 4).unwrap();
        assert_eq!(image.read_tensor(&t, 0, 4), vec![1, 2, 3, 4, 5, 6]);
        // Padding positions hold zero, not the row's neighbors.
        assert_eq!(image.read_elem(3, 0, IntDType::I8), 0);
        assert_eq!(image.read_elem(4, 0, IntDType::I8), 4);
    }

    #[test]
    fn elements_straddle_word_boundaries() {
        let t = tensor(vec![3], IntDType::int(24), vec![0x123456, -0x654321, 1]);
        let mut image = MemoryImage::new(32, 64, 0).unwrap();
        image.write_tensor(&t, t.value.as_deref().unwrap(), 0, 1).unwrap();
        assert_eq!(image.read_tensor(&t, 0, 1), vec![0x123456, -0x654321, 1]);
    }

    #[test]
    fn writes_stay_inside_the_span() {
        let sentinel = 0xDEAD_BEEF;
        let t = tensor(vec![4], IntDType::I8, vec![7, 7, 7, 7]);
        let mut image = MemoryImage::new(32, 16, sentinel).unwrap();
        image.write_tensor(&t, t.value.as_deref().unwrap(), 4, 1).unwrap();
        // Words before and after the tensor keep the sentinel fill.
        assert_eq!(image.get_bits(0, 32), sentinel);
        assert_eq!(image.get_bits(64, 32), sentinel);
    }

    #[test]
    fn out_of_bounds_write_rejected() {
        let t = tensor(vec![8], IntDType::I32, vec![0; 8]);
        let mut image = MemoryImage::new(32, 16, 0).unwrap();
        let err = image
            .write_tensor(&t, t.value.as_deref().unwrap(), 0, 1)
            .unwrap_err();
        assert!(matches!(err, PackError::OutOfBounds { size: 32, .. }));
    }

    #[test]
    fn bad_word_width_rejected() {
        assert!(matches!(MemoryImage::new(0, 8, 0), Err(PackError::BadWidth(0))));
        assert!(matches!(MemoryImage::new(65, 8, 0), Err(PackError::BadWidth(65))));
    }

    #[test]
    fn pack_graph_writes_variables_and_skips_placeholders() {
        use fxgen_graph::{Activation, Graph};

        let mut graph = Graph::new();
        let input = graph.add_placeholder("act", IntDType::I8, vec![1, 4]);
        let weight = graph
            .add_variable(tensor(vec![2, 4], IntDType::I8, vec![1, 2, 3, 4, 5, 6, 7, 8]))
            .unwrap();
        let lowered = crate::fuse::lower_gemm(
            &mut graph,
            &crate::fuse::GemmSpec {
                name: "g".into(),
                input,
                weight,
                bias: None,
                act: Activation::None,
                out_dtype: Some(IntDType::I8),
            },
            None,
            &crate::fuse::LowerOptions::default(),
        )
        .unwrap();
        graph.mark_output(lowered.output);

        let cfg = LayoutConfig::default();
        let map = crate::layout::plan(&graph, &cfg).unwrap();
        let image = pack_graph(&graph, &map, &cfg).unwrap();

        let w = &graph.tensors[weight];
        let w_addr = map.addr_of(weight).unwrap();
        assert_eq!(
            image.read_tensor(w, w_addr, w.align(cfg.bus_width)),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
        // The synthesized unit scale is packed too.
        let s = &graph.tensors[lowered.scale];
        let s_addr = map.addr_of(lowered.scale).unwrap();
        assert_eq!(image.read_tensor(s, s_addr, s.align(cfg.bus_width)), vec![1]);
        // Placeholder region is left as sentinel fill (zero here).
        let i = &graph.tensors[input];
        let i_addr = map.addr_of(input).unwrap();
        assert_eq!(
            image.read_tensor(i, i_addr, i.align(cfg.bus_width)),
            vec![0, 0, 0, 0]
        );
    }
}
