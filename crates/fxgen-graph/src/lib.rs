//! Quantized operator-graph model for fxgen.
//!
//! Tensors (placeholders, variables, operator results) live in an arena
//! owned by a [`Graph`]; operators reference them by handle. Lowering
//! registers synthesized scale/bias variables through the graph's symbol
//! table, which makes them visible to the layout planner and the packer.

pub mod arena;
mod display;
pub mod dtype;
pub mod eval;
mod node;
mod tensor;

pub use arena::{Arena, Handle};
pub use display::dump_graph;
pub use dtype::{accum_dtype, IntDType, DEFAULT_OPERATOR_DTYPE};
pub use eval::{eval_graph, EvalError};
pub use node::{Activation, AddAttrs, MatmulAttrs, OpKind, OpNode};
pub use tensor::{Tensor, TensorKind};

use std::collections::BTreeMap;

/// Errors raised while constructing or mutating a graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A variable with this name is already registered.
    #[error("variable '{0}' is already registered")]
    DuplicateVariable(String),

    /// A value array's length disagrees with the tensor's shape product.
    #[error("tensor '{tensor}': value has {got} elements, shape requires {expected}")]
    ValueLength {
        /// Offending tensor name.
        tensor: String,
        /// Shape product.
        expected: usize,
        /// Supplied element count.
        got: usize,
    },
}

/// An operator graph under construction or after lowering.
///
/// Nodes are appended in pipeline order; since every node's inputs must
/// already exist, the node list is always topologically sorted and each
/// result tensor has exactly one producer.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    /// All tensors, in creation order.
    pub tensors: Arena<Tensor>,
    /// All operator nodes, in pipeline order.
    pub nodes: Vec<OpNode>,
    /// Graph-level placeholder inputs.
    pub inputs: Vec<Handle<Tensor>>,
    /// Graph-level outputs.
    pub outputs: Vec<Handle<Tensor>>,
    /// Symbol table of named variables, keyed by tensor name.
    pub variables: BTreeMap<String, Handle<Tensor>>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a placeholder tensor and registers it as a graph input.
    pub fn add_placeholder(
        &mut self,
        name: impl Into<String>,
        dtype: IntDType,
        shape: Vec<usize>,
    ) -> Handle<Tensor> {
        let handle = self.tensors.append(Tensor::placeholder(name, dtype, shape));
        self.inputs.push(handle);
        handle
    }

    /// Adds a variable tensor and registers it in the symbol table.
    pub fn add_variable(&mut self, tensor: Tensor) -> Result<Handle<Tensor>, GraphError> {
        debug_assert_eq!(tensor.kind, TensorKind::Variable);
        if self.variables.contains_key(&tensor.name) {
            return Err(GraphError::DuplicateVariable(tensor.name));
        }
        let name = tensor.name.clone();
        let handle = self.tensors.append(tensor);
        self.variables.insert(name, handle);
        Ok(handle)
    }

    /// Adds a variable tensor, rebinding the name if it is already taken.
    ///
    /// Lowering registers its synthesized scale/bias operands through this:
    /// re-lowering a node rebinds the same names to fresh tensors instead of
    /// mutating the old ones, so earlier results stay valid.
    pub fn register_variable(&mut self, tensor: Tensor) -> Handle<Tensor> {
        debug_assert_eq!(tensor.kind, TensorKind::Variable);
        let name = tensor.name.clone();
        if self.variables.contains_key(&name) {
            log::debug!("rebinding variable '{name}'");
        }
        let handle = self.tensors.append(tensor);
        self.variables.insert(name, handle);
        handle
    }

    /// Looks up a registered variable by name.
    pub fn variable(&self, name: &str) -> Option<Handle<Tensor>> {
        self.variables.get(name).copied()
    }

    /// Adds a node, creating its output tensor.
    ///
    /// # Panics
    ///
    /// Panics if any referenced handle is not in this graph's arena.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        inputs: Vec<Handle<Tensor>>,
        out_dtype: IntDType,
        out_shape: Vec<usize>,
    ) -> Handle<Tensor> {
        let name = name.into();
        for &h in &inputs {
            assert!(
                self.tensors.try_get(h).is_some(),
                "add_node({name}): input handle {h:?} not in this graph",
            );
        }
        let output = self
            .tensors
            .append(Tensor::result(name.clone(), out_dtype, out_shape));
        self.nodes.push(OpNode {
            name,
            kind,
            inputs,
            output,
        });
        output
    }

    /// Marks a tensor as a graph-level output.
    pub fn mark_output(&mut self, handle: Handle<Tensor>) {
        if !self.outputs.contains(&handle) {
            self.outputs.push(handle);
        }
    }

    /// Finds the node producing the given tensor, if any.
    pub fn producer(&self, handle: Handle<Tensor>) -> Option<&OpNode> {
        self.nodes.iter().find(|n| n.output == handle)
    }
}
