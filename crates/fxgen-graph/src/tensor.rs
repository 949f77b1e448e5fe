//! Tensor model: placeholders, variables, and operator results.

use crate::dtype::IntDType;

/// How a tensor gets its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorKind {
    /// Fed externally at execution time; gets an address but no
    /// compile-time value.
    Placeholder,
    /// Carries a compile-time value (weights, fused scale/bias).
    Variable,
    /// Produced by an operator node; no persisted value.
    Result,
}

/// A named tensor in the graph.
///
/// Shape is fixed at creation. A `Variable` may gain or carry a value; the
/// value length must always equal the shape product.
#[derive(Clone, Debug)]
pub struct Tensor {
    /// Unique name; variables are additionally keyed by it in the graph's
    /// symbol table.
    pub name: String,
    /// Value lifecycle class.
    pub kind: TensorKind,
    /// Ordered dimension sizes, all positive.
    pub shape: Vec<usize>,
    /// Element type.
    pub dtype: IntDType,
    /// Concrete row-major element values, for variables.
    pub value: Option<Vec<i64>>,
    /// Declared read parallelism of the hardware port consuming this tensor.
    pub par: usize,
}

impl Tensor {
    /// Creates an externally-fed placeholder.
    pub fn placeholder(name: impl Into<String>, dtype: IntDType, shape: Vec<usize>) -> Self {
        Self::new(name, TensorKind::Placeholder, dtype, shape)
    }

    /// Creates a variable without a value; assign one with
    /// [`set_value`](Self::set_value).
    pub fn variable(name: impl Into<String>, dtype: IntDType, shape: Vec<usize>) -> Self {
        Self::new(name, TensorKind::Variable, dtype, shape)
    }

    pub(crate) fn result(name: impl Into<String>, dtype: IntDType, shape: Vec<usize>) -> Self {
        Self::new(name, TensorKind::Result, dtype, shape)
    }

    fn new(name: impl Into<String>, kind: TensorKind, dtype: IntDType, shape: Vec<usize>) -> Self {
        let name = name.into();
        assert!(
            !shape.is_empty() && shape.iter().all(|&d| d > 0),
            "tensor '{name}': shape {shape:?} must be non-empty with positive dims",
        );
        Self {
            name,
            kind,
            shape,
            dtype,
            value: None,
            par: 1,
        }
    }

    /// Builder-style setter for the declared read parallelism.
    pub fn with_par(mut self, par: usize) -> Self {
        assert!(par > 0, "tensor '{}': par must be positive", self.name);
        self.par = par;
        self
    }

    /// Number of logical elements (shape product).
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns `true` if the tensor has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assigns a concrete value. Fails unless the element count matches the
    /// shape product.
    pub fn set_value(&mut self, value: Vec<i64>) -> Result<(), crate::GraphError> {
        if value.len() != self.len() {
            return Err(crate::GraphError::ValueLength {
                tensor: self.name.clone(),
                expected: self.len(),
                got: value.len(),
            });
        }
        self.value = Some(value);
        Ok(())
    }

    /// Replication stride for this tensor on a bus of `bus_width` bits:
    /// `max(ceil(bus_width / elem_width), par)` consecutive elements must be
    /// laid out contiguously for the hardware's parallel read ports.
    pub fn align(&self, bus_width: u32) -> usize {
        let per_bus = (bus_width as usize).div_ceil(self.dtype.width as usize);
        per_bus.max(self.par)
    }

    /// Logical shape with the innermost dimension padded to a multiple of
    /// the replication stride. Element addressing in the memory image goes
    /// through this shape, not the logical one.
    pub fn aligned_shape(&self, bus_width: u32) -> Vec<usize> {
        let align = self.align(bus_width);
        let mut shape = self.shape.clone();
        if let Some(last) = shape.last_mut() {
            *last = last.div_ceil(align) * align;
        }
        shape
    }

    /// Bytes occupied in the shared address space: aligned element count
    /// times element width, rounded up to whole bytes.
    pub fn footprint_bytes(&self, bus_width: u32) -> usize {
        let elems: usize = self.aligned_shape(bus_width).iter().product();
        (elems * self.dtype.width as usize).div_ceil(8)
    }
}
