//! Human-readable graph dumps.

use std::fmt::Write;

use crate::tensor::TensorKind;
use crate::{Graph, OpKind};

/// Renders a graph as indented text, for diagnostics and the dump backend.
pub fn dump_graph(graph: &Graph) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Tensors:");
    for (handle, t) in graph.tensors.iter() {
        let kind = match t.kind {
            TensorKind::Placeholder => "placeholder",
            TensorKind::Variable => "variable",
            TensorKind::Result => "result",
        };
        let sign = if t.dtype.signed { "i" } else { "u" };
        let _ = writeln!(
            out,
            "  {handle:?} {kind} '{}' {sign}{} {:?} par={}{}",
            t.name,
            t.dtype.width,
            t.shape,
            t.par,
            if t.value.is_some() { " (valued)" } else { "" },
        );
    }

    let _ = writeln!(out, "Nodes:");
    for node in &graph.nodes {
        match &node.kind {
            OpKind::Matmul(attrs) => {
                let _ = writeln!(
                    out,
                    "  matmul '{}' inputs={:?} bias={:?} scale={:?} rshift={} act={:?} -> {:?}",
                    node.name, node.inputs, attrs.bias, attrs.scale, attrs.rshift_out, attrs.act,
                    node.output,
                );
            }
            OpKind::Add(attrs) => {
                let _ = writeln!(
                    out,
                    "  add '{}' inputs={:?} par={} -> {:?}",
                    node.name, node.inputs, attrs.par, node.output,
                );
            }
        }
    }

    let _ = writeln!(out, "Inputs: {:?}", graph.inputs);
    let _ = writeln!(out, "Outputs: {:?}", graph.outputs);
    out
}
