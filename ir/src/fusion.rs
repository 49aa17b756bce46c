//! Container of the tensors and transforms of one kernel.

use bon::bon;
use smallvec::SmallVec;
use snafu::OptionExt;

use crate::axis::AxisId;
use crate::domain::TensorDomain;
use crate::error::{Result, UnknownTensorSnafu};
use crate::expr::IntoExpr;
use crate::graph::DomainGraph;
use crate::tensor::{Swizzle, Tensor, TensorExpr, TensorId, TensorOp};
use crate::types::{MemoryType, ParallelType};

/// Tensors of one kernel together with the transform graph of their axes.
///
/// Tensors are stored in definition order: a tensor's inputs always come
/// before it.
#[derive(Debug, Clone, Default)]
pub struct Fusion {
    graph: DomainGraph,
    tensors: Vec<Tensor>,
}

#[bon]
impl Fusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tensor over an existing domain.
    #[builder]
    pub fn new_tensor(
        &mut self,
        domain: TensorDomain,
        #[builder(default)] memory_type: MemoryType,
        op: Option<TensorOp>,
        #[builder(default)] inputs: Vec<TensorId>,
        #[builder(default)] compute_at_position: usize,
        #[builder(default)] double_buffered: bool,
        #[builder(default)] swizzle: Swizzle,
    ) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        let definition = op.map(|op| TensorExpr { op, inputs: SmallVec::from_vec(inputs) });
        self.tensors.push(Tensor {
            id,
            domain,
            memory_type,
            definition,
            compute_at_position,
            double_buffered,
            swizzle,
        });
        id
    }
}

impl Fusion {
    /// Fresh contiguous tensor of iteration axes with constant extents.
    pub fn tensor_of(&mut self, extents: &[i64], memory_type: MemoryType) -> TensorId {
        let root = extents.iter().map(|e| self.graph.iteration_axis(*e)).collect();
        self.new_tensor().domain(TensorDomain::contiguous(root)).memory_type(memory_type).call()
    }

    /// Fresh contiguous tensor computed from `inputs` by `op`, with a root
    /// domain of the given extents.
    pub fn derived_tensor(
        &mut self,
        extents: &[i64],
        memory_type: MemoryType,
        op: TensorOp,
        inputs: Vec<TensorId>,
    ) -> TensorId {
        let root = extents.iter().map(|e| self.graph.iteration_axis(*e)).collect();
        self.new_tensor()
            .domain(TensorDomain::contiguous(root))
            .memory_type(memory_type)
            .op(op)
            .inputs(inputs)
            .call()
    }

    pub fn graph(&self) -> &DomainGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DomainGraph {
        &mut self.graph
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id.index()]
    }

    /// Checked [`tensor`](Self::tensor).
    pub fn try_tensor(&self, id: TensorId) -> Result<&Tensor> {
        self.tensors.get(id.index()).context(UnknownTensorSnafu { tensor: id })
    }

    /// Check that every handle resolves and every op fits its tensor.
    pub fn validate(&self) -> Result<()> {
        for tensor in &self.tensors {
            let domain = tensor.domain();
            for id in domain.root().iter().chain(domain.leaf()).chain(domain.rfactor().unwrap_or_default()) {
                self.graph.try_axis(*id)?;
            }
            if let Some(def) = tensor.definition() {
                for input in &def.inputs {
                    self.try_tensor(*input)?;
                }
                def.op.validate(domain.root().len())?;
            }
        }
        Ok(())
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id.index()]
    }

    /// Tensors in definition order.
    pub fn tensors(&self) -> impl DoubleEndedIterator<Item = &Tensor> {
        self.tensors.iter()
    }

    /// Tensors reading `id`.
    pub fn consumers_of(&self, id: TensorId) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter().filter(move |t| t.definition().is_some_and(|def| def.inputs.contains(&id)))
    }

    // ========================================================================
    // Scheduling shorthands
    // ========================================================================

    pub fn split(&mut self, tensor: TensorId, pos: usize, factor: impl IntoExpr) -> Result<()> {
        let Self { graph, tensors } = self;
        tensors[tensor.index()].domain.split(graph, pos, factor, true)
    }

    pub fn split_outer(&mut self, tensor: TensorId, pos: usize, factor: impl IntoExpr) -> Result<()> {
        let Self { graph, tensors } = self;
        tensors[tensor.index()].domain.split(graph, pos, factor, false)
    }

    pub fn split_partial(
        &mut self,
        tensor: TensorId,
        pos: usize,
        factor: impl IntoExpr,
        start_offset: impl IntoExpr,
        stop_offset: impl IntoExpr,
    ) -> Result<()> {
        let Self { graph, tensors } = self;
        tensors[tensor.index()].domain.split_partial(graph, pos, factor, start_offset, stop_offset)
    }

    pub fn merge(&mut self, tensor: TensorId, pos: usize) -> Result<()> {
        let Self { graph, tensors } = self;
        tensors[tensor.index()].domain.merge(graph, pos)
    }

    pub fn reorder(&mut self, tensor: TensorId, permutation: &[usize]) -> Result<()> {
        self.tensors[tensor.index()].domain.reorder(permutation)
    }

    /// Bind leaf axis `pos` of `tensor` to a parallel type.
    pub fn parallelize(&mut self, tensor: TensorId, pos: usize, parallel_type: ParallelType) {
        let axis = self.tensor(tensor).axis(pos);
        self.graph.parallelize(axis, parallel_type);
    }

    /// Leaf axis `pos` of `tensor`.
    pub fn leaf(&self, tensor: TensorId, pos: usize) -> AxisId {
        self.tensor(tensor).axis(pos)
    }
}
