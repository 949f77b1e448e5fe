//! JSON network manifest.
//!
//! A manifest declares one input placeholder and a chain of fully-connected
//! layers with their quantized weights, optional biases, and optional
//! batchnorm-style affine descriptors to fuse at lowering time.

use std::collections::BTreeMap;

use serde::Deserialize;

use fxgen_graph::{Activation, Graph, GraphError, Handle, IntDType, Tensor};
use fxgen_lower::{lower_gemm, AffineFusion, GemmSpec, LowerError, LowerOptions};

/// Errors raised while building a graph from a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest declares no layers.
    #[error("manifest `{0}` has no layers")]
    Empty(String),

    /// A declared value array disagrees with its shape.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A layer failed to lower.
    #[error(transparent)]
    Lower(#[from] LowerError),
}

/// A compiled network description.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Network name; becomes the emitted top module name.
    pub name: String,
    /// The single primary input.
    pub input: InputDecl,
    /// Fully-connected layers, in pipeline order.
    pub layers: Vec<LayerDecl>,
    /// Optional input feeds for co-simulation, keyed by placeholder name.
    #[serde(default)]
    pub feeds: BTreeMap<String, Vec<i64>>,
    /// Optional externally computed float reference for the output.
    pub float_reference: Option<Vec<f64>>,
    /// Output scale factor applied to the float reference.
    #[serde(default = "default_output_scale")]
    pub output_scale: f64,
    /// Absolute tolerance for the float cross-check.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_output_scale() -> f64 {
    1.0
}

fn default_tolerance() -> f64 {
    0.5
}

/// The primary input placeholder.
#[derive(Debug, Deserialize)]
pub struct InputDecl {
    /// Placeholder name, also the feed key.
    pub name: String,
    /// Logical shape.
    pub shape: Vec<usize>,
    /// Element width in bits.
    #[serde(default = "default_width")]
    pub width: u16,
    /// Read parallelism factor.
    #[serde(default = "default_par")]
    pub par: usize,
}

/// One fully-connected layer.
#[derive(Debug, Deserialize)]
pub struct LayerDecl {
    /// Layer name; synthesized variables are named under it.
    pub name: String,
    /// Quantized weight matrix, `(out_channels, in_channels)`.
    pub weight: TensorDecl,
    /// Optional per-channel bias values.
    pub bias: Option<Vec<i64>>,
    /// Optional affine descriptor to fuse.
    pub affine: Option<AffineDecl>,
    /// Post-scale activation.
    #[serde(default)]
    pub activation: ActivationDecl,
    /// Declared output element width; the operator default when absent.
    pub out_width: Option<u16>,
}

/// A valued tensor declaration.
#[derive(Debug, Deserialize)]
pub struct TensorDecl {
    /// Logical shape.
    pub shape: Vec<usize>,
    /// Row-major element values.
    pub values: Vec<i64>,
    /// Element width in bits.
    #[serde(default = "default_width")]
    pub width: u16,
}

/// Batchnorm-style affine descriptor, `y = (x + bias/scale) * scale`.
#[derive(Debug, Deserialize)]
pub struct AffineDecl {
    /// Per-channel (or broadcast) scale.
    pub scale: Vec<i64>,
    /// Per-channel (or broadcast) pre-scale bias.
    pub bias: Option<Vec<i64>>,
}

/// Activation applied after the affine stage.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivationDecl {
    /// Pass through.
    #[default]
    None,
    /// Clamp negatives to zero.
    Relu,
}

impl From<ActivationDecl> for Activation {
    fn from(decl: ActivationDecl) -> Self {
        match decl {
            ActivationDecl::None => Activation::None,
            ActivationDecl::Relu => Activation::Relu,
        }
    }
}

fn default_width() -> u16 {
    8
}

fn default_par() -> usize {
    1
}

/// Parses a manifest from JSON text.
pub fn parse(text: &str) -> Result<Manifest, serde_json::Error> {
    serde_json::from_str(text)
}

/// Builds and lowers the declared network into a fresh graph.
///
/// Returns the graph and the handle of the final layer's output, which is
/// marked as the graph output.
pub fn build_graph(
    manifest: &Manifest,
    opts: &LowerOptions,
) -> Result<(Graph, Handle<Tensor>), ManifestError> {
    if manifest.layers.is_empty() {
        return Err(ManifestError::Empty(manifest.name.clone()));
    }

    let mut graph = Graph::new();
    let mut cursor = graph.add_placeholder(
        manifest.input.name.clone(),
        IntDType::int(manifest.input.width),
        manifest.input.shape.clone(),
    );
    graph.tensors[cursor].par = manifest.input.par;

    for layer in &manifest.layers {
        let mut weight = Tensor::variable(
            format!("{}.w", layer.name),
            IntDType::int(layer.weight.width),
            layer.weight.shape.clone(),
        );
        weight.set_value(layer.weight.values.clone())?;
        let weight = graph.add_variable(weight)?;

        let bias = match &layer.bias {
            Some(values) => {
                let mut t = Tensor::variable(
                    format!("{}.b0", layer.name),
                    IntDType::int(4 * layer.weight.width),
                    vec![values.len()],
                );
                t.set_value(values.clone())?;
                Some(graph.add_variable(t)?)
            }
            None => None,
        };

        let fusion = layer.affine.as_ref().map(|a| AffineFusion {
            scale: a.scale.clone(),
            bias: a.bias.clone(),
        });

        let lowered = lower_gemm(
            &mut graph,
            &GemmSpec {
                name: layer.name.clone(),
                input: cursor,
                weight,
                bias,
                act: layer.activation.into(),
                out_dtype: layer.out_width.map(IntDType::int),
            },
            fusion.as_ref(),
            opts,
        )?;
        cursor = lowered.output;
    }

    graph.mark_output(cursor);
    Ok((graph, cursor))
}

/// Feed for a placeholder: declared values, or a deterministic ramp.
pub fn feed_for(manifest: &Manifest, name: &str, len: usize) -> Vec<i64> {
    match manifest.feeds.get(name) {
        Some(values) => values.clone(),
        None => (0..len as i64).map(|i| i % 5 - 2).collect(),
    }
}
