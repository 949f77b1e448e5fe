//! Quantization-aware operator lowering.
//!
//! Converts a raw linear-algebra node (input, weight, optional bias) plus an
//! optional external affine transform into one fused integer matmul. The
//! affine pair typically comes from a folded batch-normalization: instead of
//! a separate hardware stage computing `y * s + b`, the scale becomes the
//! operator's own scale operand and `b / s` is folded into its bias, so
//! `(dot + bias) * scale` reproduces the chained result.
//!
//! Lowering never mutates existing tensors. Fused operands are fresh
//! variables returned in [`Lowered::new_variables`] and rebound in the
//! graph's symbol table; re-lowering a node therefore yields the same
//! values again instead of accumulating.

use fxgen_graph::{
    accum_dtype, Activation, AddAttrs, Graph, Handle, IntDType, MatmulAttrs, OpKind, Tensor,
};

/// Errors raised during lowering.
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    /// An operand's shape is incompatible with the operator being built.
    #[error("node '{node}': {detail}")]
    ShapeMismatch {
        /// Node being lowered.
        node: String,
        /// What disagreed.
        detail: String,
    },
}

/// A per-channel affine transform `y * scale + bias` to fold into the
/// operator, e.g. batch-normalization parameters.
#[derive(Clone, Debug)]
pub struct AffineFusion {
    /// Multiplicative term; length 1 or one per output channel.
    pub scale: Vec<i64>,
    /// Additive term; length 1 or one per output channel.
    pub bias: Option<Vec<i64>>,
}

/// Policy knobs for lowering.
#[derive(Clone, Copy, Debug)]
pub struct LowerOptions {
    /// Right shift applied after the scale multiply. Zero until a
    /// calibration pass supplies per-node values.
    pub rshift_out: u8,
    /// Output dtype when the node declares none.
    pub default_out_dtype: IntDType,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            rshift_out: 0,
            default_out_dtype: fxgen_graph::DEFAULT_OPERATOR_DTYPE,
        }
    }
}

/// The raw node to lower.
#[derive(Clone, Debug)]
pub struct GemmSpec {
    /// Node name; synthesized operands are named `<name>.scale` /
    /// `<name>.bias`.
    pub name: String,
    /// Primary input operand.
    pub input: Handle<Tensor>,
    /// Weight operand, shape `(out_channels, in_channels)`.
    pub weight: Handle<Tensor>,
    /// Pre-existing bias operand, if the source node had one.
    pub bias: Option<Handle<Tensor>>,
    /// Activation selector.
    pub act: Activation,
    /// Declared output dtype; falls back to [`LowerOptions`] when absent.
    pub out_dtype: Option<IntDType>,
}

/// Result of lowering one node.
#[derive(Clone, Debug)]
pub struct Lowered {
    /// The fused operator's output tensor.
    pub output: Handle<Tensor>,
    /// The scale operand (synthesized or from the fusion descriptor).
    pub scale: Handle<Tensor>,
    /// The bias operand, when one exists after fusion.
    pub bias: Option<Handle<Tensor>>,
    /// Variables this lowering created, already registered in the graph's
    /// symbol table; listed so callers can track what a node contributed.
    pub new_variables: Vec<Handle<Tensor>>,
}

fn check_channel(node: &str, what: &str, len: usize, channels: usize) -> Result<(), LowerError> {
    if len != 1 && len != channels {
        return Err(LowerError::ShapeMismatch {
            node: node.to_string(),
            detail: format!(
                "{what} has {len} elements, expected 1 or {channels} (one per output channel)"
            ),
        });
    }
    Ok(())
}

/// Lowers a matrix-multiply node into a fused quantized operator.
///
/// The operator always receives an explicit scale operand: when no fusion
/// descriptor is supplied, a unit scale of shape `(1,)` is synthesized, so
/// the numeric contract is uniform whether or not fusion applies. The
/// accumulator dtype tracks the weight's element width (the multiplicand),
/// not the output dtype.
pub fn lower_gemm(
    graph: &mut Graph,
    spec: &GemmSpec,
    fusion: Option<&AffineFusion>,
    opts: &LowerOptions,
) -> Result<Lowered, LowerError> {
    let weight = &graph.tensors[spec.weight];
    if weight.shape.len() != 2 {
        return Err(LowerError::ShapeMismatch {
            node: spec.name.clone(),
            detail: format!("weight must be 2-D, got {:?}", weight.shape),
        });
    }
    let (channels, inner) = (weight.shape[0], weight.shape[1]);
    let operand_dtype = IntDType::int(weight.dtype.width);
    let sum_dtype = accum_dtype(weight.dtype.width);

    let input = &graph.tensors[spec.input];
    let input_inner = input.shape.last().copied().unwrap_or(0);
    if input_inner != inner {
        return Err(LowerError::ShapeMismatch {
            node: spec.name.clone(),
            detail: format!(
                "input inner dimension {input_inner} disagrees with weight inner dimension {inner}"
            ),
        });
    }
    let mut out_shape = input.shape.clone();
    if let Some(last) = out_shape.last_mut() {
        *last = channels;
    }

    let fusion_scale: &[i64] = match fusion {
        Some(f) => {
            check_channel(&spec.name, "affine scale", f.scale.len(), channels)?;
            if f.scale.contains(&0) {
                return Err(LowerError::ShapeMismatch {
                    node: spec.name.clone(),
                    detail: "affine scale contains a zero element".into(),
                });
            }
            &f.scale
        }
        None => &[1],
    };

    let mut new_variables = Vec::new();

    let mut scale_tensor = Tensor::variable(
        format!("{}.scale", spec.name),
        operand_dtype,
        vec![fusion_scale.len()],
    );
    scale_tensor
        .set_value(fusion_scale.to_vec())
        .unwrap_or_else(|_| unreachable!("scale shape matches its value by construction"));
    let scale = graph.register_variable(scale_tensor);
    new_variables.push(scale);

    let fusion_bias = fusion.and_then(|f| f.bias.as_deref());
    if let Some(fb) = fusion_bias {
        check_channel(&spec.name, "affine bias", fb.len(), channels)?;
    }

    let bias = match (spec.bias, fusion_bias) {
        // Fold the affine shift into a fresh bias variable.
        (None, Some(fb)) => {
            let len = fb.len().max(fusion_scale.len());
            let value: Vec<i64> = (0..len)
                .map(|i| fb[i % fb.len()] / fusion_scale[i % fusion_scale.len()])
                .collect();
            Some(make_bias(graph, &spec.name, operand_dtype, value, &mut new_variables))
        }
        // Fold the affine shift on top of the existing bias, into a fresh
        // variable; the original bias tensor is left untouched.
        (Some(existing), Some(fb)) => {
            let old = &graph.tensors[existing];
            let old_value = old.value.clone().ok_or_else(|| LowerError::ShapeMismatch {
                node: spec.name.clone(),
                detail: format!("existing bias '{}' has no value to fuse into", old.name),
            })?;
            check_channel(&spec.name, "existing bias", old_value.len(), channels)?;
            let len = fb.len().max(fusion_scale.len()).max(old_value.len());
            let value: Vec<i64> = (0..len)
                .map(|i| {
                    fb[i % fb.len()] / fusion_scale[i % fusion_scale.len()]
                        + old_value[i % old_value.len()]
                })
                .collect();
            Some(make_bias(graph, &spec.name, operand_dtype, value, &mut new_variables))
        }
        (Some(existing), None) => Some(existing),
        (None, None) => None,
    };

    let out_dtype = spec.out_dtype.unwrap_or(opts.default_out_dtype);
    log::debug!(
        "lowered '{}': channels={channels}, sum_width={}, out_width={}, fused_bias={}",
        spec.name,
        sum_dtype.width,
        out_dtype.width,
        fusion_bias.is_some(),
    );

    let output = graph.add_node(
        spec.name.clone(),
        OpKind::Matmul(MatmulAttrs {
            bias,
            scale,
            transposed_a: false,
            transposed_b: true,
            rshift_out: opts.rshift_out,
            act: spec.act,
            out_dtype,
            sum_dtype,
        }),
        vec![spec.input, spec.weight],
        out_dtype,
        out_shape,
    );

    Ok(Lowered {
        output,
        scale,
        bias,
        new_variables,
    })
}

fn make_bias(
    graph: &mut Graph,
    node: &str,
    dtype: IntDType,
    value: Vec<i64>,
    new_variables: &mut Vec<Handle<Tensor>>,
) -> Handle<Tensor> {
    let mut tensor = Tensor::variable(format!("{node}.bias"), dtype, vec![value.len()]);
    tensor
        .set_value(value)
        .unwrap_or_else(|_| unreachable!("bias shape matches its value by construction"));
    let handle = graph.register_variable(tensor);
    new_variables.push(handle);
    handle
}

/// Lowers an element-wise addition of two same-shape operands.
pub fn lower_add(
    graph: &mut Graph,
    name: &str,
    lhs: Handle<Tensor>,
    rhs: Handle<Tensor>,
    out_dtype: Option<IntDType>,
    par: usize,
    opts: &LowerOptions,
) -> Result<Handle<Tensor>, LowerError> {
    let (a, b) = (&graph.tensors[lhs], &graph.tensors[rhs]);
    if a.shape != b.shape {
        return Err(LowerError::ShapeMismatch {
            node: name.to_string(),
            detail: format!("operand shapes disagree: {:?} vs {:?}", a.shape, b.shape),
        });
    }
    let out_shape = a.shape.clone();
    let out_dtype = out_dtype.unwrap_or(opts.default_out_dtype);
    Ok(graph.add_node(
        name,
        OpKind::Add(AddAttrs { par, out_dtype }),
        vec![lhs, rhs],
        out_dtype,
        out_shape,
    ))
}
