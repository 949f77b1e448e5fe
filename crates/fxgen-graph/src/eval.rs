//! Pure-integer reference evaluation of a lowered graph.
//!
//! Computes the exact values the fixed-point datapath must produce: dot
//! products reduced in the accumulator type, bias add, scale multiply,
//! right shift, activation, and a final cast to the output type. The
//! co-simulation verifier packs these values into the check region of the
//! memory image and compares the hardware's output words against them.

use std::collections::BTreeMap;

use crate::arena::Handle;
use crate::node::{MatmulAttrs, OpKind};
use crate::tensor::{Tensor, TensorKind};
use crate::Graph;

/// Errors raised by the reference evaluator.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// A placeholder was not supplied a feed value.
    #[error("no feed supplied for placeholder '{0}'")]
    MissingFeed(String),

    /// A feed's length disagrees with the placeholder's shape.
    #[error("feed for '{name}' has {got} elements, shape requires {expected}")]
    FeedLength {
        /// Placeholder name.
        name: String,
        /// Shape product.
        expected: usize,
        /// Supplied element count.
        got: usize,
    },

    /// A variable has no compile-time value.
    #[error("variable '{0}' has no value")]
    MissingValue(String),

    /// An operand does not fit the operation's shape contract.
    #[error("node '{node}': {detail}")]
    BadOperand {
        /// Node name.
        node: String,
        /// What disagreed.
        detail: String,
    },
}

/// Evaluates `graph.outputs` given feeds for every placeholder, keyed by
/// placeholder name. Returns one value array per graph output, in order.
pub fn eval_graph(
    graph: &Graph,
    feeds: &BTreeMap<String, Vec<i64>>,
) -> Result<Vec<Vec<i64>>, EvalError> {
    let mut env: Vec<Option<Vec<i64>>> = vec![None; graph.tensors.len()];

    for (handle, tensor) in graph.tensors.iter() {
        match tensor.kind {
            TensorKind::Placeholder => {
                let feed = feeds
                    .get(&tensor.name)
                    .ok_or_else(|| EvalError::MissingFeed(tensor.name.clone()))?;
                if feed.len() != tensor.len() {
                    return Err(EvalError::FeedLength {
                        name: tensor.name.clone(),
                        expected: tensor.len(),
                        got: feed.len(),
                    });
                }
                env[handle.index()] = Some(feed.clone());
            }
            TensorKind::Variable => {
                env[handle.index()] = Some(
                    tensor
                        .value
                        .clone()
                        .ok_or_else(|| EvalError::MissingValue(tensor.name.clone()))?,
                );
            }
            TensorKind::Result => {}
        }
    }

    // Nodes are appended in topological order, so one forward sweep suffices.
    for node in &graph.nodes {
        let value = match &node.kind {
            OpKind::Matmul(attrs) => eval_matmul(graph, node, attrs, &env)?,
            OpKind::Add(attrs) => {
                let a = operand(graph, &env, node.inputs[0])?;
                let b = operand(graph, &env, node.inputs[1])?;
                if a.len() != b.len() {
                    return Err(EvalError::BadOperand {
                        node: node.name.clone(),
                        detail: format!("add operands disagree: {} vs {}", a.len(), b.len()),
                    });
                }
                a.iter()
                    .zip(b)
                    .map(|(&x, &y)| attrs.out_dtype.wrap(x + y))
                    .collect()
            }
        };
        env[node.output.index()] = Some(value);
    }

    graph
        .outputs
        .iter()
        .map(|&h| {
            env[h.index()]
                .clone()
                .ok_or_else(|| EvalError::MissingValue(graph.tensors[h].name.clone()))
        })
        .collect()
}

fn operand<'a>(
    graph: &Graph,
    env: &'a [Option<Vec<i64>>],
    handle: Handle<Tensor>,
) -> Result<&'a Vec<i64>, EvalError> {
    env[handle.index()]
        .as_ref()
        .ok_or_else(|| EvalError::MissingValue(graph.tensors[handle].name.clone()))
}

fn eval_matmul(
    graph: &Graph,
    node: &crate::OpNode,
    attrs: &MatmulAttrs,
    env: &[Option<Vec<i64>>],
) -> Result<Vec<i64>, EvalError> {
    if attrs.transposed_a || !attrs.transposed_b {
        return Err(EvalError::BadOperand {
            node: node.name.clone(),
            detail: "only the (a, b^T) transpose convention is implemented".into(),
        });
    }

    let input = &graph.tensors[node.inputs[0]];
    let weight = &graph.tensors[node.inputs[1]];
    let a = operand(graph, env, node.inputs[0])?;
    let w = operand(graph, env, node.inputs[1])?;

    let k = *input.shape.last().unwrap_or(&1);
    let m = a.len() / k;
    let (n, wk) = (weight.shape[0], weight.shape[1]);
    if wk != k {
        return Err(EvalError::BadOperand {
            node: node.name.clone(),
            detail: format!("inner dimensions disagree: input {k}, weight {wk}"),
        });
    }

    let scale = operand(graph, env, attrs.scale)?;
    let bias = match attrs.bias {
        Some(b) => Some(operand(graph, env, b)?),
        None => None,
    };

    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0i64;
            for x in 0..k {
                sum = attrs.sum_dtype.wrap(sum + a[i * k + x] * w[j * k + x]);
            }
            if let Some(b) = bias {
                sum = attrs.sum_dtype.wrap(sum + b[j % b.len()]);
            }
            sum = attrs.sum_dtype.wrap(sum * scale[j % scale.len()]);
            // An arithmetic shift past the carrier width leaves only the
            // sign, same as the hardware's shifter; clamp so wide configured
            // shifts cannot overflow the i64 shift operand.
            sum >>= u32::from(attrs.rshift_out).min(63);
            out.push(attrs.out_dtype.wrap(attrs.act.apply(sum)));
        }
    }
    Ok(out)
}
