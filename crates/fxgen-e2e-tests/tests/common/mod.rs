use std::collections::BTreeMap;

use fxgen_backend_core::GlobalAddrs;
use fxgen_cosim::{BehavioralSim, VerifyOptions, VerifyReport};
use fxgen_graph::{eval_graph, Activation, Graph, Handle, IntDType, Tensor};
use fxgen_lower::{
    lower_gemm, pack_graph, plan, AffineFusion, GemmSpec, LayoutConfig, LowerOptions,
};

/// A declared fully-connected layer for test graphs.
#[allow(dead_code)]
pub struct Layer {
    pub name: &'static str,
    pub weight_shape: Vec<usize>,
    pub weight: Vec<i64>,
    pub weight_width: u16,
    pub bias: Option<Vec<i64>>,
    pub affine: Option<AffineFusion>,
    pub act: Activation,
    pub out_width: Option<u16>,
}

#[allow(dead_code)]
impl Layer {
    pub fn new(name: &'static str, weight_shape: Vec<usize>, weight: Vec<i64>) -> Self {
        Self {
            name,
            weight_shape,
            weight,
            weight_width: 8,
            bias: None,
            affine: None,
            act: Activation::None,
            out_width: Some(16),
        }
    }

    pub fn with_affine(mut self, scale: Vec<i64>, bias: Option<Vec<i64>>) -> Self {
        self.affine = Some(AffineFusion { scale, bias });
        self
    }

    pub fn with_relu(mut self) -> Self {
        self.act = Activation::Relu;
        self
    }
}

/// Builds and lowers a chain of fully-connected layers over one input.
#[allow(dead_code)]
pub fn build_mlp(input_shape: Vec<usize>, layers: &[Layer]) -> (Graph, Handle<Tensor>) {
    let mut graph = Graph::new();
    let mut cursor = graph.add_placeholder("act", IntDType::I8, input_shape);
    for layer in layers {
        let mut weight = Tensor::variable(
            format!("{}.w", layer.name),
            IntDType::int(layer.weight_width),
            layer.weight_shape.clone(),
        );
        weight.set_value(layer.weight.clone()).expect("weight value");
        let weight = graph.add_variable(weight).expect("weight registration");

        let bias = layer.bias.as_ref().map(|values| {
            let mut t = Tensor::variable(
                format!("{}.b0", layer.name),
                IntDType::int(4 * layer.weight_width),
                vec![values.len()],
            );
            t.set_value(values.clone()).expect("bias value");
            graph.add_variable(t).expect("bias registration")
        });

        let lowered = lower_gemm(
            &mut graph,
            &GemmSpec {
                name: layer.name.into(),
                input: cursor,
                weight,
                bias,
                act: layer.act,
                out_dtype: layer.out_width.map(IntDType::int),
            },
            layer.affine.as_ref(),
            &LowerOptions::default(),
        )
        .expect("lowering failed");
        cursor = lowered.output;
    }
    graph.mark_output(cursor);
    (graph, cursor)
}

/// A prepared co-simulation: packed image, feeds and reference in place.
#[allow(dead_code)]
pub struct Harness {
    pub sim: BehavioralSim,
    pub out_tensor: Tensor,
    pub out_addr: usize,
    pub check_addr: usize,
    pub addrs: GlobalAddrs,
    pub cfg: LayoutConfig,
}

#[allow(dead_code)]
impl Harness {
    pub fn verify(&mut self) -> VerifyReport {
        fxgen_cosim::run(
            &mut self.sim,
            self.addrs,
            &self.out_tensor,
            self.check_addr,
            self.cfg.bus_width,
            &VerifyOptions::default(),
        )
        .expect("verification run failed")
    }

    /// Hardware output values after a run, read through the image.
    pub fn hw_output(&self) -> Vec<i64> {
        self.sim.image().read_tensor(
            &self.out_tensor,
            self.out_addr,
            self.out_tensor.align(self.cfg.bus_width),
        )
    }
}

/// Plans, packs, and loads feed plus integer reference for one run.
///
/// Returns the harness and the reference output values.
#[allow(dead_code)]
pub fn prepare(graph: Graph, output: Handle<Tensor>, feed: Vec<i64>) -> (Harness, Vec<i64>) {
    let cfg = LayoutConfig::default();
    let map = plan(&graph, &cfg).expect("layout planning failed");
    let image = pack_graph(&graph, &map, &cfg).expect("image packing failed");

    let input = graph.inputs[0];
    let in_tensor = graph.tensors[input].clone();
    let out_tensor = graph.tensors[output].clone();
    let in_addr = map.addr_of(input).expect("input address");
    let out_addr = map.addr_of(output).expect("output address");
    let variables = map
        .regions
        .iter()
        .find(|r| graph.tensors[r.tensor].value.is_some())
        .map(|r| r.addr)
        .unwrap_or(0);

    let mut feeds = BTreeMap::new();
    feeds.insert(in_tensor.name.clone(), feed);
    let expected = eval_graph(&graph, &feeds).expect("reference evaluation failed");
    let expected = expected.into_iter().next().expect("one output");

    let addrs = GlobalAddrs {
        tmp: map.tmp_addr,
        out: out_addr,
        input: in_addr,
        variables,
    };
    let check_addr = map.check_addr;

    let mut sim = BehavioralSim::new(graph, map, cfg, image);
    sim.image_mut()
        .write_tensor(
            &in_tensor,
            &feeds[&in_tensor.name],
            in_addr,
            in_tensor.align(cfg.bus_width),
        )
        .expect("feed write failed");
    sim.image_mut()
        .write_tensor(
            &out_tensor,
            &expected,
            check_addr,
            out_tensor.align(cfg.bus_width),
        )
        .expect("reference write failed");

    (
        Harness {
            sim,
            out_tensor,
            out_addr,
            check_addr,
            addrs,
            cfg,
        },
        expected,
    )
}
