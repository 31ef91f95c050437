//! The graph: one procedure's worth of IR.
//!
//! A graph owns an arena of nodes (a `PrimaryMap` handing out dense `Node`
//! indices), the anchor nodes every procedure has (start/end blocks, `Start`,
//! `End`, the initial memory, frame pointer, args tuple, the unique `Bad`
//! and `NoMem`), the hash-consing value table, and cached analysis states.
//!
//! Nodes are created through the `new_*` constructors, which run the local
//! optimizer and the value table on the fresh node and may hand back an
//! older equivalent node instead. The `add_raw` entry bypasses both; the
//! builder uses it for dummy Phis whose inputs are not known yet.
//!
//! Replacing one node by another goes through [`Graph::exchange`], which
//! turns the old node into a forwarding `Id`. Readers normalize through
//! `Id`s lazily; dead-node elimination drops them.

use crate::flags::OptFlags;
use crate::identities::ValueTable;
use crate::ir::entities::{Entity, Node, Type};
use crate::ir::mode::{self, Mode};
use crate::ir::node::{pn, Attr, BlockAttr, CallAttr, NodeData, SymConst};
use crate::ir::opcode::{Op, Pinned};
use crate::ir::tarval::{Relation, Tarval};
use crate::result::{FirmError, FirmResult};
use bitflags::bitflags;
use firm_entity::{PackedOption, PrimaryMap};
use smallvec::SmallVec;

bitflags! {
    /// Per-graph resources a pass can reserve. Nested reservation fails.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct Resources: u8 {
        /// The node visited generation.
        const NODE_VISITED = 1;
        /// The block visited generation.
        const BLOCK_VISITED = 2;
        /// The per-pass node link side table.
        const LINK = 4;
        /// The type visited generation.
        const TYPE_VISITED = 8;
        /// The out-edge cache maintenance.
        const EDGES = 16;
    }
}

/// Validity of a cached analysis.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum AnalysisState {
    /// Never computed.
    #[default]
    None,
    /// Computed and still valid.
    Consistent,
    /// Computed, but the graph changed since.
    Inconsistent,
}

/// Construction state of a graph.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GraphState {
    /// The builder may still create blocks and Phis.
    Building,
    /// Construction is finished; only passes mutate the graph.
    Finalized,
}

/// A graph represents one procedure.
pub struct Graph {
    /// The entity this graph implements, if any.
    pub entity: Option<Entity>,
    /// The frame type holding this procedure's local variables.
    pub frame_type: Option<Type>,
    /// Which optimizations run during construction and in passes.
    pub opt: OptFlags,

    pub(crate) nodes: PrimaryMap<Node, NodeData>,
    pub(crate) values: ValueTable,

    start_block: Node,
    end_block: Node,
    start: Node,
    end: Node,
    initial_mem: Node,
    frame: Node,
    args: Node,
    bad: Node,
    no_mem: Node,
    anchor: Node,

    visited: u64,
    resources: Resources,
    state: GraphState,
    /// Dominator information validity.
    pub dom_state: AnalysisState,
    /// Out-edge cache validity.
    pub outs_state: AnalysisState,
    /// Loop tree validity.
    pub loop_state: AnalysisState,
    last_idx: u32,
}

impl Graph {
    /// Create a graph with its anchor nodes in place.
    pub fn new(entity: Option<Entity>) -> Graph {
        let mut g = Graph {
            entity,
            frame_type: None,
            opt: OptFlags::default(),
            nodes: PrimaryMap::new(),
            values: ValueTable::new(),
            start_block: Node::from_u32(0),
            end_block: Node::from_u32(0),
            start: Node::from_u32(0),
            end: Node::from_u32(0),
            initial_mem: Node::from_u32(0),
            frame: Node::from_u32(0),
            args: Node::from_u32(0),
            bad: Node::from_u32(0),
            no_mem: Node::from_u32(0),
            anchor: Node::from_u32(0),
            visited: 0,
            resources: Resources::empty(),
            state: GraphState::Building,
            dom_state: AnalysisState::None,
            outs_state: AnalysisState::None,
            loop_state: AnalysisState::None,
            last_idx: 0,
        };
        g.start_block = g.add_raw(
            Op::Block,
            mode::BB,
            None,
            &[],
            Attr::Block(BlockAttr {
                matured: true,
                backedges: Vec::new(),
            }),
        );
        g.end_block = g.add_raw(
            Op::Block,
            mode::BB,
            None,
            &[],
            Attr::Block(BlockAttr {
                matured: false,
                backedges: Vec::new(),
            }),
        );
        g.start = g.add_raw(Op::Start, mode::T, Some(g.start_block), &[], Attr::None);
        g.end = g.add_raw(Op::End, mode::X, Some(g.end_block), &[], Attr::None);
        let start = g.start;
        g.initial_mem = g.add_raw(
            Op::Proj,
            mode::M,
            Some(g.start_block),
            &[start],
            Attr::Proj(pn::start::M),
        );
        g.frame = g.add_raw(
            Op::Proj,
            mode::P,
            Some(g.start_block),
            &[start],
            Attr::Proj(pn::start::FRAME),
        );
        g.args = g.add_raw(
            Op::Proj,
            mode::T,
            Some(g.start_block),
            &[start],
            Attr::Proj(pn::start::ARGS),
        );
        g.bad = g.add_raw(Op::Bad, mode::BAD, Some(g.start_block), &[], Attr::None);
        g.no_mem = g.add_raw(Op::NoMem, mode::M, Some(g.start_block), &[], Attr::None);
        let anchor_ins = [
            g.start_block,
            g.end_block,
            g.start,
            g.end,
            g.initial_mem,
            g.frame,
            g.args,
            g.bad,
            g.no_mem,
        ];
        g.anchor = g.add_raw(Op::Anchor, mode::ANY, Some(g.end_block), &anchor_ins, Attr::None);
        g
    }

    // ----- anchors --------------------------------------------------------

    /// The block holding `Start`.
    pub fn start_block(&self) -> Node {
        self.start_block
    }

    /// The block holding `End`; return edges end here.
    pub fn end_block(&self) -> Node {
        self.end_block
    }

    /// The `Start` node.
    pub fn start(&self) -> Node {
        self.start
    }

    /// The `End` node; its inputs are the keep-alives.
    pub fn end(&self) -> Node {
        self.end
    }

    /// The initial memory state.
    pub fn initial_mem(&self) -> Node {
        self.initial_mem
    }

    /// The frame pointer.
    pub fn frame(&self) -> Node {
        self.frame
    }

    /// The procedure argument tuple.
    pub fn args(&self) -> Node {
        self.args
    }

    /// The unique `Bad` node.
    pub fn bad(&self) -> Node {
        self.bad
    }

    /// The unique `NoMem` node.
    pub fn no_mem(&self) -> Node {
        self.no_mem
    }

    /// The internal anchor node.
    pub fn anchor(&self) -> Node {
        self.anchor
    }

    // ----- raw access -----------------------------------------------------

    /// The node record of `n`.
    pub fn node(&self, n: Node) -> &NodeData {
        &self.nodes[n]
    }

    /// The node record of `n`, mutable edition. Direct edits through this
    /// accessor do not invalidate analyses; prefer the dedicated mutators.
    pub fn node_mut(&mut self, n: Node) -> &mut NodeData {
        &mut self.nodes[n]
    }

    /// The opcode of `n`.
    pub fn op(&self, n: Node) -> Op {
        self.nodes[n].op
    }

    /// The mode of `n`.
    pub fn mode(&self, n: Node) -> Mode {
        self.nodes[n].mode
    }

    /// The block containing `n`. Panics for `Block` nodes.
    pub fn block_of(&self, n: Node) -> Node {
        self.skip_id(self.nodes[n].block.expect("node has no block"))
    }

    /// Number of operands of `n` (for blocks: predecessor count).
    pub fn arity(&self, n: Node) -> usize {
        self.nodes[n].ins.len()
    }

    /// The raw operand slice of `n`. May contain `Id` nodes.
    pub fn ins(&self, n: Node) -> &[Node] {
        &self.nodes[n].ins
    }

    /// Operand `i` of `n`, normalized through `Id` forwardings.
    pub fn in_at(&self, n: Node, i: usize) -> Node {
        self.skip_id(self.nodes[n].ins[i])
    }

    /// All operands of `n`, normalized.
    pub fn ins_normalized(&self, n: Node) -> SmallVec<[Node; 4]> {
        self.nodes[n].ins.iter().map(|&i| self.skip_id(i)).collect()
    }

    /// Follow `Id` forwardings to the representative node.
    pub fn skip_id(&self, mut n: Node) -> Node {
        while self.nodes[n].op == Op::Id {
            n = self.nodes[n].ins[0];
        }
        n
    }

    /// Total number of nodes ever created (including dead ones).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The highest stable index handed out so far.
    pub fn last_idx(&self) -> u32 {
        self.last_idx
    }

    /// Iterate over every slot in the arena, live or dead.
    pub fn all_nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes.keys()
    }

    // ----- mutation -------------------------------------------------------

    /// Allocate a node without optimizing it.
    pub fn add_raw(
        &mut self,
        op: Op,
        m: Mode,
        block: Option<Node>,
        ins: &[Node],
        attr: Attr,
    ) -> Node {
        debug_assert!(
            (op == Op::Block) == block.is_none(),
            "only Block nodes live outside a block"
        );
        let idx = self.last_idx;
        self.last_idx += 1;
        self.nodes.push(NodeData {
            op,
            mode: m,
            block: block.into(),
            ins: SmallVec::from_slice(ins),
            attr,
            visited: 0,
            idx,
        })
    }

    /// Replace operand `pos` of `n` by `v`.
    pub fn set_in(&mut self, n: Node, pos: usize, v: Node) {
        self.nodes[n].ins[pos] = v;
        self.invalidate_outs();
    }

    /// Move `n` into `block`.
    pub fn set_block(&mut self, n: Node, block: Node) {
        debug_assert!(self.nodes[n].op != Op::Block);
        self.nodes[n].block = PackedOption::from(block);
    }

    /// Replace every use of `old` by `new` by turning `old` into a
    /// forwarding `Id` node.
    pub fn exchange(&mut self, old: Node, new: Node) {
        debug_assert!(old != new, "exchanging a node with itself");
        let new = self.skip_id(new);
        debug_assert!(new != old);
        let mode = self.nodes[new].mode;
        let block = self.nodes[old].block;
        let data = &mut self.nodes[old];
        data.op = Op::Id;
        data.mode = mode;
        data.block = block;
        data.ins = SmallVec::from_slice(&[new]);
        data.attr = Attr::None;
        self.invalidate_all();
    }

    /// Rewrite all operand arrays in place so no `Id` node remains
    /// reachable through them.
    pub fn normalize_ids(&mut self) {
        for i in 0..self.nodes.len() {
            let n = Node::from_u32(i as u32);
            if self.nodes[n].op == Op::Id {
                continue;
            }
            for pos in 0..self.nodes[n].ins.len() {
                let t = self.skip_id(self.nodes[n].ins[pos]);
                self.nodes[n].ins[pos] = t;
            }
            if let Some(b) = self.nodes[n].block.expand() {
                self.nodes[n].block = PackedOption::from(self.skip_id(b));
            }
        }
    }

    fn invalidate_outs(&mut self) {
        if self.outs_state == AnalysisState::Consistent {
            self.outs_state = AnalysisState::Inconsistent;
        }
    }

    /// Mark every cached analysis as out of date.
    pub fn invalidate_all(&mut self) {
        if self.dom_state == AnalysisState::Consistent {
            self.dom_state = AnalysisState::Inconsistent;
        }
        if self.loop_state == AnalysisState::Consistent {
            self.loop_state = AnalysisState::Inconsistent;
        }
        self.invalidate_outs();
    }

    /// Add `n` to the `End` node's keep-alives.
    pub fn keep_alive(&mut self, n: Node) {
        let end = self.end;
        if !self.nodes[end].ins.contains(&n) {
            self.nodes[end].ins.push(n);
            self.invalidate_outs();
        }
    }

    /// Rewrite every anchor field through `f`. Used by dead-node
    /// elimination after copying the live nodes to a fresh arena.
    pub(crate) fn remap_anchors(&mut self, mut f: impl FnMut(Node) -> Node) {
        self.start_block = f(self.start_block);
        self.end_block = f(self.end_block);
        self.start = f(self.start);
        self.end = f(self.end);
        self.initial_mem = f(self.initial_mem);
        self.frame = f(self.frame);
        self.args = f(self.args);
        self.bad = f(self.bad);
        self.no_mem = f(self.no_mem);
        self.anchor = f(self.anchor);
    }

    // ----- blocks ---------------------------------------------------------

    /// Is `b` matured (predecessor list final)?
    pub fn is_matured(&self, b: Node) -> bool {
        self.nodes[b].attr.block().matured
    }

    /// Create a matured block with the given control predecessors.
    pub fn new_block(&mut self, preds: &[Node]) -> Node {
        let n = self.add_raw(
            Op::Block,
            mode::BB,
            None,
            preds,
            Attr::Block(BlockAttr {
                matured: true,
                backedges: vec![false; preds.len()],
            }),
        );
        self.invalidate_all();
        n
    }

    /// Create an immature block; predecessors are added as branches to it
    /// are constructed.
    pub fn new_block_immature(&mut self) -> Node {
        self.add_raw(
            Op::Block,
            mode::BB,
            None,
            &[],
            Attr::Block(BlockAttr {
                matured: false,
                backedges: Vec::new(),
            }),
        )
    }

    /// Append a control predecessor to an immature block.
    pub fn add_block_pred(&mut self, b: Node, pred: Node) -> FirmResult<()> {
        if self.is_matured(b) {
            return Err(FirmError::Construction(format!(
                "adding predecessor to matured block {}",
                b
            )));
        }
        self.nodes[b].ins.push(pred);
        Ok(())
    }

    /// Fix a block's predecessor count. The builder completes deferred Phis
    /// before calling this.
    pub fn set_block_matured(&mut self, b: Node) -> FirmResult<()> {
        if self.is_matured(b) {
            return Err(FirmError::Construction(format!(
                "block {} matured twice",
                b
            )));
        }
        let arity = self.nodes[b].ins.len();
        let attr = self.nodes[b].attr.block_mut();
        attr.matured = true;
        attr.backedges = vec![false; arity];
        self.invalidate_all();
        Ok(())
    }

    /// The block a control edge comes from: the block of predecessor `i` of
    /// block `b`, or `Bad` for dead edges.
    pub fn cfg_pred_block(&self, b: Node, i: usize) -> Node {
        let pred = self.in_at(b, i);
        if self.nodes[pred].op == Op::Bad {
            self.bad
        } else {
            self.block_of(pred)
        }
    }

    // ----- construction state --------------------------------------------

    /// The construction state.
    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Finish construction: matures the end block and freezes the builder
    /// protocol.
    pub fn finalize_construction(&mut self) -> FirmResult<()> {
        if self.state == GraphState::Finalized {
            return Err(FirmError::Construction(
                "graph finalized twice".to_string(),
            ));
        }
        if !self.is_matured(self.end_block) {
            self.set_block_matured(self.end_block)?;
        }
        self.state = GraphState::Finalized;
        Ok(())
    }

    // ----- visited generations -------------------------------------------

    /// Start a new visit generation.
    pub fn inc_visited(&mut self) {
        self.visited += 1;
    }

    /// Mark `n` visited in the current generation.
    pub fn mark_visited(&mut self, n: Node) {
        self.nodes[n].visited = self.visited;
    }

    /// Was `n` visited in the current generation?
    pub fn is_visited(&self, n: Node) -> bool {
        self.nodes[n].visited == self.visited
    }

    // ----- resources ------------------------------------------------------

    /// Reserve per-graph resources for the running pass.
    ///
    /// Fails with `ResourceInUse` if any requested resource is already held;
    /// this catches two passes stomping on each other's link/visited usage.
    pub fn reserve_resources(&mut self, r: Resources) -> FirmResult<()> {
        if self.resources.intersects(r) {
            return Err(FirmError::ResourceInUse("graph resource held"));
        }
        self.resources |= r;
        Ok(())
    }

    /// Release previously reserved resources.
    pub fn release_resources(&mut self, r: Resources) {
        debug_assert!(self.resources.contains(r));
        self.resources &= !r;
    }

    // ----- walks ----------------------------------------------------------

    /// All nodes reachable from `End` (including keep-alives) and the
    /// anchor, in postorder: operands before users, a node's block before
    /// the node where possible.
    pub fn reachable_postorder(&mut self) -> Vec<Node> {
        self.inc_visited();
        let mut post = Vec::with_capacity(self.nodes.len());
        let roots = [self.end, self.anchor];
        let mut stack: Vec<(Node, usize)> = Vec::new();
        for &root in &roots {
            if self.is_visited(root) {
                continue;
            }
            self.mark_visited(root);
            stack.push((root, 0));
            while let Some(&(n, i)) = stack.last() {
                // Visit the block edge first, then the operands.
                let total = self.nodes[n].ins.len() + 1;
                if i < total {
                    stack.last_mut().unwrap().1 += 1;
                    let succ = if i == 0 {
                        match self.nodes[n].block.expand() {
                            Some(b) => Some(self.skip_id(b)),
                            None => None,
                        }
                    } else {
                        Some(self.skip_id(self.nodes[n].ins[i - 1]))
                    };
                    if let Some(s) = succ {
                        if !self.is_visited(s) {
                            self.mark_visited(s);
                            stack.push((s, 0));
                        }
                    }
                } else {
                    stack.pop();
                    post.push(n);
                }
            }
        }
        post
    }

    /// All reachable `Block` nodes.
    pub fn reachable_blocks(&mut self) -> Vec<Node> {
        self.reachable_postorder()
            .into_iter()
            .filter(|&n| self.nodes[n].op == Op::Block)
            .collect()
    }

    // ----- optimizing constructors ---------------------------------------

    fn build(&mut self, op: Op, m: Mode, block: Option<Node>, ins: &[Node], attr: Attr) -> Node {
        let n = self.add_raw(op, m, block, ins, attr);
        crate::opt::local::optimize_node(self, n)
    }

    /// Create an unconditional jump in `block`.
    pub fn new_jmp(&mut self, block: Node) -> Node {
        self.build(Op::Jmp, mode::X, Some(block), &[], Attr::None)
    }

    /// Create a conditional branch on `selector` in `block`.
    pub fn new_cond(&mut self, block: Node, selector: Node) -> Node {
        self.build(Op::Cond, mode::T, Some(block), &[selector], Attr::None)
    }

    /// Create a projection of `pred`.
    pub fn new_proj(&mut self, pred: Node, pn: u32, m: Mode) -> Node {
        let block = self.block_of(pred);
        self.build(Op::Proj, m, Some(block), &[pred], Attr::Proj(pn))
    }

    /// Create a tuple of values in `block`.
    pub fn new_tuple(&mut self, block: Node, ins: &[Node]) -> Node {
        self.build(Op::Tuple, mode::T, Some(block), ins, Attr::None)
    }

    /// Create a return. `ins` are the returned values.
    pub fn new_return(&mut self, block: Node, mem: Node, vals: &[Node]) -> Node {
        let mut ins = SmallVec::<[Node; 4]>::new();
        ins.push(mem);
        ins.extend_from_slice(vals);
        self.build(Op::Return, mode::X, Some(block), &ins, Attr::None)
    }

    /// Create a Phi in `block`. One input per block predecessor.
    pub fn new_phi(&mut self, block: Node, ins: &[Node], m: Mode) -> Node {
        self.build(Op::Phi, m, Some(block), ins, Attr::None)
    }

    /// Create a constant. Constants live in the start block.
    pub fn new_const(&mut self, tv: Tarval) -> Node {
        let block = self.start_block;
        self.build(Op::Const, tv.mode(), Some(block), &[], Attr::Const(tv))
    }

    /// Create a symbolic constant of mode `m`.
    pub fn new_symconst(&mut self, sym: SymConst, m: Mode) -> Node {
        let block = self.start_block;
        self.build(Op::SymConst, m, Some(block), &[], Attr::SymConst(sym))
    }

    /// Create a mode conversion.
    pub fn new_conv(&mut self, block: Node, value: Node, m: Mode) -> Node {
        self.build(Op::Conv, m, Some(block), &[value], Attr::None)
    }

    /// Create a binary arithmetic node.
    pub fn new_binop(&mut self, op: Op, block: Node, left: Node, right: Node, m: Mode) -> Node {
        debug_assert!(op.is_binop());
        self.build(op, m, Some(block), &[left, right], Attr::None)
    }

    /// Create an addition.
    pub fn new_add(&mut self, block: Node, l: Node, r: Node, m: Mode) -> Node {
        self.new_binop(Op::Add, block, l, r, m)
    }

    /// Create a subtraction.
    pub fn new_sub(&mut self, block: Node, l: Node, r: Node, m: Mode) -> Node {
        self.new_binop(Op::Sub, block, l, r, m)
    }

    /// Create a multiplication.
    pub fn new_mul(&mut self, block: Node, l: Node, r: Node, m: Mode) -> Node {
        self.new_binop(Op::Mul, block, l, r, m)
    }

    /// Create a division. Yields a tuple; project the result.
    pub fn new_div(&mut self, block: Node, mem: Node, l: Node, r: Node) -> Node {
        self.build(Op::Div, mode::T, Some(block), &[mem, l, r], Attr::None)
    }

    /// Create a remainder. Yields a tuple; project the result.
    pub fn new_mod(&mut self, block: Node, mem: Node, l: Node, r: Node) -> Node {
        self.build(Op::Mod, mode::T, Some(block), &[mem, l, r], Attr::None)
    }

    /// Create a bitwise complement.
    pub fn new_not(&mut self, block: Node, value: Node, m: Mode) -> Node {
        self.build(Op::Not, m, Some(block), &[value], Attr::None)
    }

    /// Create an arithmetic negation.
    pub fn new_minus(&mut self, block: Node, value: Node, m: Mode) -> Node {
        self.build(Op::Minus, m, Some(block), &[value], Attr::None)
    }

    /// Create an absolute value.
    pub fn new_abs(&mut self, block: Node, value: Node, m: Mode) -> Node {
        self.build(Op::Abs, m, Some(block), &[value], Attr::None)
    }

    /// Create a comparison testing `relation`.
    pub fn new_cmp(&mut self, block: Node, l: Node, r: Node, relation: Relation) -> Node {
        self.build(Op::Cmp, mode::B, Some(block), &[l, r], Attr::Cmp(relation))
    }

    /// Create a conditional select: `sel ? if_true : if_false`.
    pub fn new_mux(&mut self, block: Node, sel: Node, if_false: Node, if_true: Node, m: Mode) -> Node {
        self.build(Op::Mux, m, Some(block), &[sel, if_false, if_true], Attr::None)
    }

    /// Create a load of a `load_mode` value from `ptr`.
    pub fn new_load(&mut self, block: Node, mem: Node, ptr: Node, load_mode: Mode) -> Node {
        self.build(
            Op::Load,
            mode::T,
            Some(block),
            &[mem, ptr],
            Attr::Load(load_mode),
        )
    }

    /// Create a store of `value` to `ptr`.
    pub fn new_store(&mut self, block: Node, mem: Node, ptr: Node, value: Node) -> Node {
        self.build(Op::Store, mode::T, Some(block), &[mem, ptr, value], Attr::None)
    }

    /// Create an allocation of `ty`, `count` elements.
    pub fn new_alloc(&mut self, block: Node, mem: Node, count: Node, size: Node, ty: Type) -> Node {
        self.build(
            Op::Alloc,
            mode::T,
            Some(block),
            &[mem, count, size],
            Attr::Alloc(ty),
        )
    }

    /// Create a release of an allocation.
    pub fn new_free(&mut self, block: Node, mem: Node, ptr: Node, ty: Type) -> Node {
        self.build(Op::Free, mode::M, Some(block), &[mem, ptr], Attr::Free(ty))
    }

    /// Create the address of member `entity` of the compound at `ptr`.
    pub fn new_sel(&mut self, block: Node, ptr: Node, entity: Entity) -> Node {
        self.build(Op::Sel, mode::P, Some(block), &[ptr], Attr::Sel(entity))
    }

    /// Create a block copy of a `ty` value from `src` to `dst`.
    pub fn new_copyb(&mut self, block: Node, mem: Node, dst: Node, src: Node, ty: Type) -> Node {
        self.build(
            Op::CopyB,
            mode::T,
            Some(block),
            &[mem, dst, src],
            Attr::CopyB(ty),
        )
    }

    /// Create a merge of independent memory flows.
    pub fn new_sync(&mut self, block: Node, mems: &[Node]) -> Node {
        self.build(Op::Sync, mode::M, Some(block), mems, Attr::None)
    }

    /// Create a call through `ptr` with the given method type.
    pub fn new_call(&mut self, block: Node, mem: Node, ptr: Node, args: &[Node], ty: Type) -> Node {
        let mut ins = SmallVec::<[Node; 4]>::new();
        ins.push(mem);
        ins.push(ptr);
        ins.extend_from_slice(args);
        self.build(
            Op::Call,
            mode::T,
            Some(block),
            &ins,
            Attr::Call(CallAttr { ty, callees: None }),
        )
    }

    /// Create an `Unknown` of the requested mode.
    pub fn new_unknown(&mut self, m: Mode) -> Node {
        let block = self.start_block;
        self.add_raw(Op::Unknown, m, Some(block), &[], Attr::None)
    }

    /// Is `n` pinned to its block?
    pub fn is_pinned(&self, n: Node) -> bool {
        self.nodes[n].op.pinned() == Pinned::Yes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_in_place() {
        let g = Graph::new(None);
        assert_eq!(g.op(g.start_block()), Op::Block);
        assert_eq!(g.op(g.end_block()), Op::Block);
        assert_eq!(g.op(g.start()), Op::Start);
        assert_eq!(g.op(g.end()), Op::End);
        assert_eq!(g.mode(g.initial_mem()), mode::M);
        assert_eq!(g.mode(g.frame()), mode::P);
        assert_eq!(g.op(g.bad()), Op::Bad);
        assert_eq!(g.op(g.no_mem()), Op::NoMem);
        assert!(g.is_matured(g.start_block()));
        assert!(!g.is_matured(g.end_block()));
    }

    #[test]
    fn exchange_forwards() {
        let mut g = Graph::new(None);
        let c1 = g.new_const(Tarval::new_int(mode::IS, 1));
        let c2 = g.new_const(Tarval::new_int(mode::IS, 2));
        let block = g.start_block();
        let add = g.add_raw(Op::Add, mode::IS, Some(block), &[c1, c2], Attr::None);
        g.exchange(c1, c2);
        assert_eq!(g.in_at(add, 0), c2);
        assert_eq!(g.skip_id(c1), c2);
    }

    #[test]
    fn resource_nesting_fails() {
        let mut g = Graph::new(None);
        assert!(g.reserve_resources(Resources::LINK).is_ok());
        assert_eq!(
            g.reserve_resources(Resources::LINK | Resources::EDGES),
            Err(FirmError::ResourceInUse("graph resource held"))
        );
        g.release_resources(Resources::LINK);
        assert!(g
            .reserve_resources(Resources::LINK | Resources::EDGES)
            .is_ok());
    }

    #[test]
    fn mature_twice_fails() {
        let mut g = Graph::new(None);
        let b = g.new_block_immature();
        let j = g.new_jmp(g.start_block());
        g.add_block_pred(b, j).unwrap();
        g.set_block_matured(b).unwrap();
        assert!(matches!(
            g.set_block_matured(b),
            Err(FirmError::Construction(_))
        ));
        assert!(matches!(
            g.add_block_pred(b, j),
            Err(FirmError::Construction(_))
        ));
    }

    #[test]
    fn keep_alives_join_end() {
        let mut g = Graph::new(None);
        let c = g.new_const(Tarval::new_int(mode::IS, 7));
        g.keep_alive(c);
        assert!(g.ins(g.end()).contains(&c));
        // Adding twice is idempotent.
        g.keep_alive(c);
        assert_eq!(g.ins(g.end()).iter().filter(|&&n| n == c).count(), 1);
    }
}
