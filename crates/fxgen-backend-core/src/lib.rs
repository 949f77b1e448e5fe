#![warn(missing_docs)]
//! Backend trait and hardware interface for fxgen.
//!
//! Defines the [`Backend`] trait that hardware emitters implement, along
//! with supporting types ([`BackendOptions`], [`BackendOutput`],
//! [`BackendError`]), a [`BackendRegistry`] for CLI dispatch, and the
//! [`SimHandle`] control-register protocol the co-simulation verifier
//! drives against a running design.

use std::fmt::{self, Debug};

use fxgen_graph::{Graph, IntDType};
use fxgen_lower::AddressMap;

/// A backend that turns a lowered graph plus its address assignment into
/// target-specific output.
pub trait Backend: Debug + Send + Sync {
    /// Human-readable name (e.g. "graph-dump").
    fn name(&self) -> &str;

    /// Target identifiers this backend handles (for `--target` dispatch).
    fn targets(&self) -> &[&str];

    /// Compile a lowered graph and its completed address map.
    ///
    /// The address map is an ABI: the emitted design must read every
    /// operand at exactly the planned offsets, or co-simulation will
    /// compare misaligned data.
    fn compile(
        &self,
        graph: &Graph,
        addrs: &AddressMap,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError>;
}

/// Options passed to a backend during compilation.
#[derive(Clone, Debug)]
pub struct BackendOptions {
    /// Name of the emitted top-level hardware module.
    pub top_name: String,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            top_name: "top".into(),
        }
    }
}

impl fmt::Display for BackendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendOptions {{ top_name: {} }}", self.top_name)
    }
}

/// The output produced by a backend.
#[derive(Clone, Debug)]
pub struct BackendOutput {
    /// One or more output files.
    pub files: Vec<OutputFile>,
    /// Non-fatal diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for BackendOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s), {} diagnostic(s)",
            self.files.len(),
            self.diagnostics.len()
        )
    }
}

/// A single output file.
#[derive(Clone, Debug)]
pub struct OutputFile {
    /// Suggested filename (e.g. "design.txt", "image.bin").
    pub name: String,
    /// The file content.
    pub content: OutputContent,
}

impl fmt::Display for OutputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Content of an output file.
#[derive(Clone, Debug)]
pub enum OutputContent {
    /// UTF-8 text.
    Text(String),
    /// Raw binary data.
    Binary(Vec<u8>),
}

impl fmt::Display for OutputContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "Text({} chars)", s.len()),
            Self::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

/// A non-fatal diagnostic message from a backend.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// A warning that does not prevent compilation.
    Warning,
    /// An informational note.
    Info,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "Warning",
            Self::Info => "Info",
        })
    }
}

/// Errors that can occur during backend compilation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The graph uses an operator or dtype this backend cannot emit.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A general backend error.
    #[error("{0}")]
    Other(String),
}

/// Registry of available backends, used for CLI `--target` dispatch.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Creates a registry pre-populated with built-in backends.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(GraphDumpBackend));
        reg
    }

    /// Registers a backend.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Finds a backend that handles the given target identifier.
    pub fn find(&self, target: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.targets().contains(&target))
            .map(|b| &**b)
    }

    /// Lists all supported target identifiers.
    pub fn list_targets(&self) -> Vec<&str> {
        self.backends
            .iter()
            .flat_map(|b| b.targets().iter().copied())
            .collect()
    }
}

/// Built-in backend that dumps the lowered graph and its address table as
/// text, for debugging and artifact diffing.
#[derive(Debug)]
pub struct GraphDumpBackend;

impl Backend for GraphDumpBackend {
    fn name(&self) -> &str {
        "Graph Dump"
    }

    fn targets(&self) -> &[&str] {
        &["graph-dump", "graph"]
    }

    fn compile(
        &self,
        graph: &Graph,
        addrs: &AddressMap,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let mut text = format!("; {}\n", opts.top_name);
        text.push_str(&fxgen_graph::dump_graph(graph));
        text.push_str("Addresses:\n");
        for region in &addrs.regions {
            text.push_str(&format!(
                "  {:#06x}  {} ({} bytes)\n",
                region.addr, graph.tensors[region.tensor].name, region.size_bytes,
            ));
        }
        text.push_str(&format!(
            "  {:#06x}  <check> ({} bytes)\n  {:#06x}  <tmp> ({} bytes)\n",
            addrs.check_addr, addrs.reserved_size, addrs.tmp_addr, addrs.reserved_size,
        ));
        Ok(BackendOutput {
            files: vec![OutputFile {
                name: "design.txt".into(),
                content: OutputContent::Text(text),
            }],
            diagnostics: vec![],
        })
    }
}

/// Base addresses written to the design's control registers before a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobalAddrs {
    /// Scratch region for intermediates.
    pub tmp: usize,
    /// Output tensor base.
    pub out: usize,
    /// Primary input tensor base.
    pub input: usize,
    /// Base of the variable (weight/bias/scale) region.
    pub variables: usize,
}

/// Register-level handshake with a running design.
///
/// This is the external contract the co-simulation verifier calls into:
/// write base addresses, issue start, block until done, sample the cycle
/// counter, and read result words back out of shared memory.
pub trait SimHandle {
    /// Writes the global base addresses to the control registers.
    fn set_global_addrs(&mut self, addrs: GlobalAddrs);

    /// Issues the start command.
    fn start(&mut self);

    /// Blocks until the design signals completion.
    fn wait_done(&mut self);

    /// Monotonic cycle counter; sampled before start and after completion
    /// to measure elapsed execution cycles.
    fn cycle_count(&self) -> u64;

    /// Reads the element at aligned-row-major position `index` relative to
    /// byte address `base` out of shared memory.
    fn read_word(&self, index: usize, base: usize, dtype: IntDType) -> i64;
}
