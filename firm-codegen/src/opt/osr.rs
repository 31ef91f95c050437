//! Operator strength reduction and linear function test replacement.
//!
//! Induction variables are strongly connected components of `Phi`/`Add`/
//! `Sub` nodes whose external operands are region constants of the loop
//! header. A use `op(iv, rc)` with `op` in {Add, Sub, Mul} is reduced by
//! copying the IV's skeleton and propagating the region constant through
//! it; the quadruple cache (op, iv, rc) → reduced avoids duplicate copies.
//!
//! Each reduction records a test-replacement edge. `lftr` then rewrites
//! comparisons `cmp(iv_old, C)` into `cmp(iv_new, op(C, rc))` whenever
//! re-evaluating the init, increment and bound constants under the bad
//! overflow policy proves the propagation exact.
//!
//! The same SCC machinery powers Phi-cycle removal: a cycle of Phis whose
//! only external input is a single value is that value.

use crate::ana::domtree::DomTree;
use crate::dbg::{self, DbgAction};
use crate::flags::OptFlags;
use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::opcode::Op;
use crate::ir::tarval::{OverflowMode, Tarval};
use std::collections::{HashMap, HashSet};

/// A recorded reduction, usable for test replacement.
#[derive(Clone, Debug)]
pub struct LftrEdge {
    /// The original induction variable node.
    pub src: Node,
    /// The reduced induction variable.
    pub dst: Node,
    /// The operation that was propagated.
    pub op: Op,
    /// The region constant that was propagated.
    pub rc: Node,
}

/// Tarjan's SCC over the operand graph restricted to nodes satisfying
/// `member`. Returns the nontrivial components (size > 1 or a self-loop).
fn sccs(g: &Graph, roots: &[Node], member: impl Fn(&Graph, Node) -> bool) -> Vec<Vec<Node>> {
    #[derive(Default, Clone)]
    struct Info {
        index: Option<usize>,
        lowlink: usize,
        on_stack: bool,
    }
    let mut info: HashMap<Node, Info> = HashMap::new();
    let mut stack: Vec<Node> = Vec::new();
    let mut next_index = 0usize;
    let mut out: Vec<Vec<Node>> = Vec::new();

    for &root in roots {
        if !member(g, root) || info.get(&root).map_or(false, |i| i.index.is_some()) {
            continue;
        }
        // Explicit DFS frames: (node, next operand position).
        let mut frames: Vec<(Node, usize)> = vec![(root, 0)];
        info.entry(root).or_default().index = Some(next_index);
        info.get_mut(&root).unwrap().lowlink = next_index;
        info.get_mut(&root).unwrap().on_stack = true;
        stack.push(root);
        next_index += 1;

        while let Some(&(n, pos)) = frames.last() {
            if pos < g.arity(n) {
                let i = pos;
                frames.last_mut().unwrap().1 += 1;
                let succ = g.in_at(n, i);
                if !member(g, succ) {
                    continue;
                }
                let succ_state = {
                    let e = info.entry(succ).or_default();
                    (e.index, e.on_stack)
                };
                match succ_state {
                    (None, _) => {
                        let e = info.get_mut(&succ).unwrap();
                        e.index = Some(next_index);
                        e.lowlink = next_index;
                        e.on_stack = true;
                        stack.push(succ);
                        next_index += 1;
                        frames.push((succ, 0));
                    }
                    (Some(idx), true) => {
                        let low = info[&n].lowlink.min(idx);
                        info.get_mut(&n).unwrap().lowlink = low;
                    }
                    (Some(_), false) => {}
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    let low = info[&parent].lowlink.min(info[&n].lowlink);
                    info.get_mut(&parent).unwrap().lowlink = low;
                }
                if info[&n].lowlink == info[&n].index.unwrap() {
                    let mut comp = Vec::new();
                    loop {
                        let v = stack.pop().unwrap();
                        info.get_mut(&v).unwrap().on_stack = false;
                        comp.push(v);
                        if v == n {
                            break;
                        }
                    }
                    let self_loop =
                        comp.len() == 1 && (0..g.arity(comp[0])).any(|i| g.in_at(comp[0], i) == comp[0]);
                    if comp.len() > 1 || self_loop {
                        out.push(comp);
                    }
                }
            }
        }
    }
    out
}

/// An induction variable: one Phi plus its update chain.
struct Iv {
    nodes: HashSet<Node>,
    phi: Node,
    /// The loop header block (the Phi's block).
    header: Node,
    /// Initial value (external Phi operand), when uniquely determined.
    init: Option<Node>,
    /// Increment operand of the update, when uniquely determined.
    incr: Option<Node>,
    /// Update opcode, `Add` or `Sub`.
    update: Option<Op>,
}

/// Is `n` a region constant relative to `header`: defined in a block that
/// strictly dominates the header?
fn is_rc(g: &Graph, doms: &DomTree, n: Node, header: Node) -> bool {
    if g.op(n) == Op::Const || g.op(n) == Op::SymConst {
        return true;
    }
    if g.op(n) == Op::Block {
        return false;
    }
    let b = g.block_of(n);
    b != header && doms.is_reachable(b) && doms.dominates(b, header)
}

/// Classify an SCC as an induction variable, if it is one.
fn classify(g: &Graph, doms: &DomTree, comp: &[Node]) -> Option<Iv> {
    let nodes: HashSet<Node> = comp.iter().copied().collect();
    let mut phi = None;
    for &n in comp {
        match g.op(n) {
            Op::Phi => {
                if phi.replace(n).is_some() {
                    return None; // more than one Phi
                }
            }
            Op::Add | Op::Sub => {}
            _ => return None,
        }
        if !g.mode(n).is_data() {
            return None;
        }
    }
    let phi = phi?;
    let header = g.block_of(phi);
    if !doms.is_reachable(header) {
        return None;
    }
    // All external operands must be region constants of the header.
    for &n in comp {
        for i in 0..g.arity(n) {
            let o = g.in_at(n, i);
            if !nodes.contains(&o) && !is_rc(g, doms, o, header) {
                return None;
            }
        }
    }
    // Counter classification for test replacement.
    let mut init = None;
    let mut incr = None;
    let mut update = None;
    for i in 0..g.arity(phi) {
        let o = g.in_at(phi, i);
        if !nodes.contains(&o) {
            if init.replace(o).is_some() {
                init = None;
                break;
            }
        }
    }
    let updates: Vec<Node> = comp
        .iter()
        .copied()
        .filter(|&n| g.op(n) == Op::Add || g.op(n) == Op::Sub)
        .collect();
    if let [u] = updates[..] {
        update = Some(g.op(u));
        for i in 0..g.arity(u) {
            let o = g.in_at(u, i);
            if !nodes.contains(&o) {
                incr = Some(o);
            }
        }
    }
    Some(Iv {
        nodes,
        phi,
        header,
        init,
        incr,
        update,
    })
}

struct OsrEnv {
    quad: HashMap<(Op, Node, Node), Node>,
    lftr: Vec<LftrEdge>,
}

/// Place `op(a, b)` at the deeper of the operands' blocks.
fn apply(g: &mut Graph, doms: &DomTree, op: Op, a: Node, b: Node) -> Node {
    let block_of = |g: &Graph, n: Node| {
        if g.op(n) == Op::Block {
            n
        } else {
            g.block_of(n)
        }
    };
    let ba = block_of(g, a);
    let bb = block_of(g, b);
    let loc = if doms.depth(bb) > doms.depth(ba) { bb } else { ba };
    let m = g.mode(a);
    g.new_binop(op, loc, a, b, m)
}

/// Copy the IV skeleton, propagating `rc` with `op` through it.
fn reduce(
    g: &mut Graph,
    doms: &DomTree,
    env: &mut OsrEnv,
    iv: &Iv,
    op: Op,
    n: Node,
    rc: Node,
) -> Node {
    if !iv.nodes.contains(&n) {
        return apply(g, doms, op, n, rc);
    }
    if let Some(&r) = env.quad.get(&(op, n, rc)) {
        return r;
    }
    // Allocate the copy first so the loop ties back to it.
    let block = g.block_of(n);
    let ins: Vec<Node> = (0..g.arity(n)).map(|i| g.in_at(n, i)).collect();
    let copy = g.add_raw(g.op(n), g.mode(n), Some(block), &ins, crate::ir::node::Attr::None);
    env.quad.insert((op, n, rc), copy);
    for (i, &o) in ins.iter().enumerate() {
        let new_o = if iv.nodes.contains(&o) {
            reduce(g, doms, env, iv, op, o, rc)
        } else if g.op(n) == Op::Phi || op == Op::Mul {
            // Initial values are always propagated; increments only under
            // multiplication.
            apply(g, doms, op, o, rc)
        } else {
            o
        };
        g.set_in(copy, i, new_o);
    }
    copy
}

/// Reduce all uses `op(iv, rc)`; returns the recorded edges.
fn reduce_uses(g: &mut Graph, doms: &DomTree, ivs: &[Iv], env: &mut OsrEnv) -> bool {
    let mut changed = false;
    let order = g.reachable_postorder();
    for n in order {
        let op = g.op(n);
        if !matches!(op, Op::Add | Op::Sub | Op::Mul) {
            continue;
        }
        if ivs.iter().any(|iv| iv.nodes.contains(&n)) {
            continue;
        }
        // One operand inside an IV, the other a region constant of its
        // header. Subtraction only reduces with the IV on the left.
        let l = g.in_at(n, 0);
        let r = g.in_at(n, 1);
        let candidates: &[(Node, Node)] = if op == Op::Sub {
            &[(l, r)]
        } else {
            &[(l, r), (r, l)]
        };
        let mut done = false;
        for &(iv_node, rc) in candidates {
            if done {
                break;
            }
            for iv in ivs {
                if iv.nodes.contains(&iv_node)
                    && !iv.nodes.contains(&rc)
                    && is_rc(g, doms, rc, iv.header)
                    && g.mode(n) == g.mode(iv_node)
                {
                    let reduced = reduce(g, doms, env, iv, op, iv_node, rc);
                    dbg::opt_applied(DbgAction::Osr, n, reduced);
                    env.lftr.push(LftrEdge {
                        src: iv_node,
                        dst: reduced,
                        op,
                        rc,
                    });
                    g.exchange(n, reduced);
                    changed = true;
                    done = true;
                    break;
                }
            }
        }
    }
    changed
}

fn const_of(g: &Graph, n: Node) -> Option<Tarval> {
    if g.op(n) == Op::Const {
        Some(g.node(n).attr.tarval())
    } else {
        None
    }
}

/// Rewrite comparisons against reduced IVs.
fn lftr(g: &mut Graph, ivs: &[Iv], env: &OsrEnv) -> bool {
    let mut changed = false;
    let order = g.reachable_postorder();
    for cmp in order {
        if g.op(cmp) != Op::Cmp {
            continue;
        }
        let l = g.in_at(cmp, 0);
        let r = g.in_at(cmp, 1);
        let (iv_side, bound) = if env.lftr.iter().any(|e| e.src == l) {
            (l, r)
        } else if env.lftr.iter().any(|e| e.src == r) {
            (r, l)
        } else {
            continue;
        };
        let Some(bound_tv) = const_of(g, bound) else {
            continue;
        };
        let Some(edge) = env.lftr.iter().find(|e| e.src == iv_side) else {
            continue;
        };
        let Some(rc_tv) = const_of(g, edge.rc) else {
            continue;
        };
        // Multiplying by a non-positive factor would flip or destroy the
        // relation.
        if edge.op == Op::Mul && (rc_tv.is_null() || rc_tv.is_negative()) {
            continue;
        }
        let Some(iv) = ivs.iter().find(|iv| iv.nodes.contains(&iv_side)) else {
            continue;
        };
        // Prove the propagation exact for bound, init and increment.
        let ovf = OverflowMode::Bad;
        let fold = |a: Tarval, b: Tarval| match edge.op {
            Op::Add => a.add(b, ovf),
            Op::Sub => a.sub(b, ovf),
            Op::Mul => a.mul(b, ovf),
            _ => Tarval::bad(),
        };
        let new_bound = fold(bound_tv, rc_tv);
        if new_bound.is_bad() {
            continue;
        }
        let init_ok = iv
            .init
            .and_then(|i| const_of(g, i))
            .map_or(false, |tv| !fold(tv, rc_tv).is_bad());
        let incr_ok = match (edge.op, iv.incr.and_then(|i| const_of(g, i))) {
            (Op::Mul, Some(tv)) => !tv.mul(rc_tv, ovf).is_bad(),
            (Op::Mul, None) => false,
            (_, Some(_)) => true,
            (_, None) => false,
        };
        if !init_ok || !incr_ok || iv.update.is_none() {
            continue;
        }
        let relation = g.node(cmp).attr.relation();
        let block = g.block_of(cmp);
        let new_c = g.new_const(new_bound);
        let (new_l, new_r) = if iv_side == l {
            (edge.dst, new_c)
        } else {
            (new_c, edge.dst)
        };
        let new_cmp = g.new_cmp(block, new_l, new_r, relation);
        dbg::opt_applied(DbgAction::Lftr, cmp, new_cmp);
        g.exchange(cmp, new_cmp);
        changed = true;
    }
    changed
}

/// Run strength reduction with test replacement on `g`.
///
/// Returns whether anything changed; the recorded reduction edges are
/// returned for inspection.
pub fn optimize_osr(g: &mut Graph) -> (bool, Vec<LftrEdge>) {
    if !g.opt.contains(OptFlags::OSR) {
        return (false, Vec::new());
    }
    let doms = DomTree::compute(g);
    let roots = g.reachable_postorder();
    let comps = sccs(g, &roots, |g, n| {
        matches!(g.op(n), Op::Phi | Op::Add | Op::Sub) && g.mode(n).is_data()
    });
    let ivs: Vec<Iv> = comps
        .iter()
        .filter_map(|c| classify(g, &doms, c))
        .collect();
    if ivs.is_empty() {
        return (false, Vec::new());
    }
    log::debug!("osr: {} induction variables", ivs.len());

    let mut env = OsrEnv {
        quad: HashMap::new(),
        lftr: Vec::new(),
    };
    let mut changed = reduce_uses(g, &doms, &ivs, &mut env);
    changed |= lftr(g, &ivs, &env);
    (changed, env.lftr)
}

/// Remove cycles of Phis whose only external input is one value.
pub fn remove_phi_cycles(g: &mut Graph) -> bool {
    let roots = g.reachable_postorder();
    let comps = sccs(g, &roots, |g, n| g.op(n) == Op::Phi);
    let mut changed = false;
    for comp in comps {
        let members: HashSet<Node> = comp.iter().copied().collect();
        let mut external: Option<Node> = None;
        let mut unique = true;
        for &n in &comp {
            for i in 0..g.arity(n) {
                let o = g.in_at(n, i);
                if members.contains(&o) || g.op(o) == Op::Bad {
                    continue;
                }
                match external {
                    None => external = Some(o),
                    Some(v) if v == o => {}
                    Some(_) => unique = false,
                }
            }
        }
        if let (Some(v), true) = (external, unique) {
            for &n in &comp {
                dbg::opt_applied(DbgAction::PhiOpt, n, v);
                g.exchange(n, v);
            }
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::node::pn;
    use crate::ir::tarval::Relation;

    /// Build `for (i = 0; ...; i += 1)` and return (graph, header, phi).
    fn counter_loop(g: &mut Graph) -> (Node, Node, Node) {
        let entry = g.start_block();
        let j0 = g.new_jmp(entry);
        let header = g.new_block_immature();
        g.add_block_pred(header, j0).unwrap();

        let zero = g.new_const(Tarval::new_int(mode::IS, 0));
        let one = g.new_const(Tarval::new_int(mode::IS, 1));
        // Dummy Phi tied manually, like the builder would.
        let phi = g.add_raw(
            Op::Phi,
            mode::IS,
            Some(header),
            &[zero],
            crate::ir::node::Attr::None,
        );
        let next = g.new_add(header, phi, one, mode::IS);
        g.node_mut(phi).ins.push(next);

        let sel = g.new_unknown(mode::B);
        let cond = g.new_cond(header, sel);
        let pt = g.new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = g.new_proj(cond, pn::cond::FALSE, mode::X);
        let body = g.new_block(&[pt]);
        let jb = g.new_jmp(body);
        g.add_block_pred(header, jb).unwrap();
        g.set_block_matured(header).unwrap();
        let _ = pf;
        (entry, header, phi)
    }

    /// Scenario: Mul(Phi, 5) is replaced by a reduced IV
    /// Phi'(0, Add(Phi', 5)), and the edge (Phi → Phi', Mul, 5) is
    /// recorded.
    #[test]
    fn multiplication_by_iv_reduced() {
        let mut g = Graph::new(None);
        let (_entry, header, phi) = counter_loop(&mut g);
        let five = g.new_const(Tarval::new_int(mode::IS, 5));
        let mul = g.new_mul(header, phi, five, mode::IS);
        g.keep_alive(mul);
        g.keep_alive(phi);

        let (changed, edges) = optimize_osr(&mut g);
        assert!(changed);
        let edge = edges
            .iter()
            .find(|e| e.src == phi && e.op == Op::Mul)
            .expect("reduction edge recorded");
        assert_eq!(edge.rc, five);

        // The mul now forwards to the reduced Phi.
        let reduced = g.skip_id(mul);
        assert_eq!(g.op(reduced), Op::Phi);
        assert_eq!(reduced, edge.dst);
        // Phi'(Const 0, Add(Phi', Const 5)).
        let init = g.in_at(reduced, 0);
        assert_eq!(g.op(init), Op::Const);
        assert!(g.node(init).attr.tarval().is_null());
        let update = g.in_at(reduced, 1);
        assert_eq!(g.op(update), Op::Add);
        assert_eq!(g.in_at(update, 0), reduced);
        let step = g.in_at(update, 1);
        assert_eq!(g.node(step).attr.tarval().as_i64(), 5);
    }

    /// Test replacement: cmp(i, 10) becomes cmp(i', 50) after reducing
    /// Mul(i, 5).
    #[test]
    fn comparison_rewritten_by_lftr() {
        let mut g = Graph::new(None);
        let (_entry, header, phi) = counter_loop(&mut g);
        let five = g.new_const(Tarval::new_int(mode::IS, 5));
        let mul = g.new_mul(header, phi, five, mode::IS);
        let ten = g.new_const(Tarval::new_int(mode::IS, 10));
        let cmp = g.new_cmp(header, phi, ten, Relation::LESS);
        g.keep_alive(mul);
        g.keep_alive(cmp);

        let (changed, _) = optimize_osr(&mut g);
        assert!(changed);

        let new_cmp = g.skip_id(cmp);
        assert_eq!(g.op(new_cmp), Op::Cmp);
        let bound = g.in_at(new_cmp, 1);
        assert_eq!(g.node(bound).attr.tarval().as_i64(), 50);
        // The left side is the reduced IV.
        assert_eq!(g.op(g.in_at(new_cmp, 0)), Op::Phi);
        assert_ne!(g.in_at(new_cmp, 0), phi);
    }

    /// The rewritten comparison holds on the same iteration counts as the
    /// original: enumerate small inputs and replay both induction
    /// sequences with tarval arithmetic.
    #[test]
    fn test_replacement_is_equivalent() {
        let mut g = Graph::new(None);
        let (_entry, header, phi) = counter_loop(&mut g);
        let five = g.new_const(Tarval::new_int(mode::IS, 5));
        let mul = g.new_mul(header, phi, five, mode::IS);
        let ten = g.new_const(Tarval::new_int(mode::IS, 10));
        let cmp = g.new_cmp(header, phi, ten, Relation::LESS);
        g.keep_alive(mul);
        g.keep_alive(cmp);
        let (changed, edges) = optimize_osr(&mut g);
        assert!(changed);
        let edge = &edges[0];

        let new_cmp = g.skip_id(cmp);
        let new_bound = g.node(g.in_at(new_cmp, 1)).attr.tarval();
        let rc = g.node(edge.rc).attr.tarval();
        let ovf = OverflowMode::Bad;
        let mut iv_old = Tarval::new_int(mode::IS, 0);
        let mut iv_new = Tarval::new_int(mode::IS, 0);
        let old_bound = Tarval::new_int(mode::IS, 10);
        let step = Tarval::one(mode::IS);
        for _ in 0..32 {
            let old_holds = old_bound
                .compare(iv_old)
                .reversed()
                .intersects(Relation::LESS);
            let new_holds = new_bound
                .compare(iv_new)
                .reversed()
                .intersects(Relation::LESS);
            assert_eq!(old_holds, new_holds);
            iv_old = iv_old.add(step, ovf);
            iv_new = iv_new.add(step.mul(rc, ovf), ovf);
        }
    }

    /// A cycle of Phis fed by a single outside value collapses to it.
    #[test]
    fn phi_cycle_removed() {
        let mut g = Graph::new(None);
        let (_entry, header, _phi) = counter_loop(&mut g);
        let v = g.new_unknown(mode::IS);
        let p1 = g.add_raw(
            Op::Phi,
            mode::IS,
            Some(header),
            &[v],
            crate::ir::node::Attr::None,
        );
        let p2 = g.new_phi(header, &[v, p1], mode::IS);
        g.node_mut(p1).ins.push(p2);
        g.keep_alive(p1);

        assert!(remove_phi_cycles(&mut g));
        assert_eq!(g.skip_id(p1), v);
        assert_eq!(g.skip_id(p2), v);
    }
}
