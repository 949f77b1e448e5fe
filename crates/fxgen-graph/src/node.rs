//! Operator nodes.
//!
//! Operators are a tagged [`OpKind`] enum with typed attribute payloads, so
//! post-lowering configuration (par tuning, activation selection) is a
//! pattern match rather than a runtime type test.

use crate::arena::Handle;
use crate::dtype::IntDType;
use crate::tensor::Tensor;

/// Activation applied after scale/shift, before the output cast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    /// Pass-through.
    #[default]
    None,
    /// Clamp negative values to zero.
    Relu,
}

impl Activation {
    /// Applies the activation to one accumulator value.
    pub fn apply(self, v: i64) -> i64 {
        match self {
            Self::None => v,
            Self::Relu => v.max(0),
        }
    }
}

/// Attributes of a fused integer matrix multiply.
///
/// Per output element: `act((dot + bias) * scale >> rshift_out)`, with the
/// dot product reduced in `sum_dtype` and the result cast to `out_dtype`.
#[derive(Clone, Debug)]
pub struct MatmulAttrs {
    /// Per-channel additive operand; absent when the lowered source had
    /// neither a bias input nor an affine bias.
    pub bias: Option<Handle<Tensor>>,
    /// Per-channel multiplicative operand; always present after lowering.
    pub scale: Handle<Tensor>,
    /// Transpose the first operand before multiplying.
    pub transposed_a: bool,
    /// Transpose the second operand before multiplying.
    pub transposed_b: bool,
    /// Arithmetic right shift applied after the scale multiply.
    pub rshift_out: u8,
    /// Activation selector.
    pub act: Activation,
    /// Output element type.
    pub out_dtype: IntDType,
    /// Accumulator type for the dot-product reduction.
    pub sum_dtype: IntDType,
}

/// Attributes of an element-wise addition.
#[derive(Clone, Debug)]
pub struct AddAttrs {
    /// Lanes processed per cycle by the element-wise datapath.
    pub par: usize,
    /// Output element type.
    pub out_dtype: IntDType,
}

/// The operation performed by a node, with its typed attributes.
#[derive(Clone, Debug)]
pub enum OpKind {
    /// Fused quantized matrix multiply.
    Matmul(MatmulAttrs),
    /// Element-wise addition.
    Add(AddAttrs),
}

/// A named computation with ordered inputs and exactly one output tensor.
///
/// The output tensor is created together with the node (see
/// [`Graph::add_node`](crate::Graph::add_node)), so each result tensor has
/// exactly one producer.
#[derive(Clone, Debug)]
pub struct OpNode {
    /// Node name, also the stem for names of synthesized operands.
    pub name: String,
    /// Operation and attributes.
    pub kind: OpKind,
    /// Ordered data inputs (operands like bias/scale live in the attributes).
    pub inputs: Vec<Handle<Tensor>>,
    /// The single output tensor.
    pub output: Handle<Tensor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clamps_negatives() {
        assert_eq!(Activation::Relu.apply(-5), 0);
        assert_eq!(Activation::Relu.apply(5), 5);
        assert_eq!(Activation::None.apply(-5), -5);
    }
}
