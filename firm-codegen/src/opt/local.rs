//! Local optimizations: constant evaluation, identities, small rewrites.
//!
//! Two entry points are invoked on every freshly constructed or mutated
//! node: [`computed_value`] evaluates a node to a tarval when all its
//! operands are compile-time constants under the node's mode, and
//! [`optimize_node`] runs the full local pipeline — constant folding,
//! `equivalent_node` (find an existing node with the same value),
//! `transform_node` (rebuild into something cheaper) and the value table.
//!
//! Every rule must preserve the node's observable semantics under its mode.
//! Integer folding uses the bad overflow policy: an overflowing fold yields
//! the bad tarval and the IR is left unchanged.

use crate::dbg::{self, DbgAction};
use crate::flags::OptFlags;
use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::node::{pn, Attr};
use crate::ir::opcode::Op;
use crate::ir::tarval::{OverflowMode, Relation, Tarval};

/// The tarval of an operand: its attribute when it is a `Const`, bad
/// otherwise. Operands of interest have already been folded, so a shallow
/// read suffices.
fn value_of(g: &Graph, n: Node) -> Tarval {
    if g.op(n) == Op::Const {
        g.node(n).attr.tarval()
    } else {
        Tarval::bad()
    }
}

/// Try to evaluate `n` to a compile-time constant.
///
/// Returns the bad tarval when the node is not constant.
pub fn computed_value(g: &Graph, n: Node) -> Tarval {
    let ovf = OverflowMode::Bad;
    let op = g.op(n);
    match op {
        Op::Const => g.node(n).attr.tarval(),
        Op::Conv => {
            let v = value_of(g, g.in_at(n, 0));
            if v.is_constant() {
                v.convert_to(g.mode(n))
            } else {
                Tarval::bad()
            }
        }
        Op::Minus => value_of(g, g.in_at(n, 0)).neg(ovf),
        Op::Abs => value_of(g, g.in_at(n, 0)).abs(ovf),
        Op::Not => value_of(g, g.in_at(n, 0)).not(),
        Op::Add | Op::Sub | Op::Mul | Op::And | Op::Or | Op::Eor | Op::Shl | Op::Shr
        | Op::Shrs | Op::Rotl => {
            let l = value_of(g, g.in_at(n, 0));
            let r = value_of(g, g.in_at(n, 1));
            if !l.is_constant() || !r.is_constant() {
                return Tarval::bad();
            }
            match op {
                Op::Add => l.add(r, ovf),
                Op::Sub => l.sub(r, ovf),
                Op::Mul => l.mul(r, ovf),
                Op::And => l.and(r),
                Op::Or => l.or(r),
                Op::Eor => l.eor(r),
                Op::Shl => l.shl(r),
                Op::Shr => l.shr(r),
                Op::Shrs => l.shrs(r),
                Op::Rotl => l.rotl(r),
                _ => unreachable!(),
            }
        }
        Op::Cmp => {
            let relation = g.node(n).attr.relation();
            let left = g.in_at(n, 0);
            let right = g.in_at(n, 1);
            // A value always equals itself, except possibly for NaN floats.
            if left == right && !g.mode(left).is_float() {
                return Tarval::b_val(relation.contains(Relation::EQUAL));
            }
            let l = value_of(g, left);
            let r = value_of(g, right);
            let outcome = l.compare(r);
            if outcome.is_empty() {
                Tarval::bad()
            } else {
                Tarval::b_val(relation.contains(outcome))
            }
        }
        Op::Mux => {
            let sel = value_of(g, g.in_at(n, 0));
            if sel.is_constant() {
                let chosen = if sel.as_bool() { g.in_at(n, 2) } else { g.in_at(n, 1) };
                value_of(g, chosen)
            } else {
                Tarval::bad()
            }
        }
        Op::Proj => {
            // Quotient/remainder of constant operands.
            let pred = g.in_at(n, 0);
            let pn_ = g.node(n).attr.proj();
            match g.op(pred) {
                Op::Div if pn_ == pn::divmod::RES => {
                    let l = value_of(g, g.in_at(pred, 1));
                    let r = value_of(g, g.in_at(pred, 2));
                    l.div(r, ovf)
                }
                Op::Mod if pn_ == pn::divmod::RES => {
                    let l = value_of(g, g.in_at(pred, 1));
                    let r = value_of(g, g.in_at(pred, 2));
                    l.rem(r, ovf)
                }
                _ => Tarval::bad(),
            }
        }
        _ => Tarval::bad(),
    }
}

/// Does `n` have an operand that makes it provably unreachable?
fn essential_bad_input(g: &Graph, n: Node) -> bool {
    let op = g.op(n);
    let scan = match op {
        Op::Conv | Op::Minus | Op::Abs | Op::Not | Op::Cmp | Op::Mux | Op::Sel | Op::Cond
        | Op::Proj => true,
        _ if op.is_binop() => true,
        _ => false,
    };
    scan && (0..g.arity(n)).any(|i| g.op(g.in_at(n, i)) == Op::Bad)
}

/// Find an existing node with the same value as `n`, or `n` itself.
///
/// This never creates nodes; rewrites that build new nodes live in
/// [`transform_node`].
pub fn equivalent_node(g: &Graph, n: Node) -> Node {
    let op = g.op(n);

    if essential_bad_input(g, n) {
        return g.bad();
    }

    match op {
        Op::Add | Op::Or | Op::Eor => {
            // x + 0 = x | 0 = x ^ 0 = x
            for (this, other) in [(0usize, 1usize), (1, 0)] {
                if value_of(g, g.in_at(n, this)).is_null()
                    && g.mode(g.in_at(n, other)) == g.mode(n)
                {
                    return g.in_at(n, other);
                }
            }
            n
        }
        Op::Sub | Op::Shl | Op::Shr | Op::Shrs | Op::Rotl => {
            // x - 0 = x >> 0 = x
            if value_of(g, g.in_at(n, 1)).is_null() && g.mode(g.in_at(n, 0)) == g.mode(n) {
                return g.in_at(n, 0);
            }
            n
        }
        Op::Mul => {
            // x * 1 = x
            for (this, other) in [(0usize, 1usize), (1, 0)] {
                if value_of(g, g.in_at(n, this)).is_one()
                    && g.mode(g.in_at(n, other)) == g.mode(n)
                {
                    return g.in_at(n, other);
                }
            }
            n
        }
        Op::And => {
            // x & x = x, x & ~0 = x
            if g.in_at(n, 0) == g.in_at(n, 1) {
                return g.in_at(n, 0);
            }
            for (this, other) in [(0usize, 1usize), (1, 0)] {
                if value_of(g, g.in_at(n, this)).is_all_one() {
                    return g.in_at(n, other);
                }
            }
            n
        }
        Op::Conv => {
            if g.mode(g.in_at(n, 0)) == g.mode(n) {
                return g.in_at(n, 0);
            }
            n
        }
        Op::Not | Op::Minus => {
            // Involution: --x = x, ~~x = x.
            let inner = g.in_at(n, 0);
            if g.op(inner) == op && g.mode(g.in_at(inner, 0)) == g.mode(n) {
                return g.in_at(inner, 0);
            }
            n
        }
        Op::Phi => {
            // A Phi whose inputs all coincide (ignoring self-references and
            // dead paths) is that one value.
            let mut value: Option<Node> = None;
            for i in 0..g.arity(n) {
                let input = g.in_at(n, i);
                if input == n || g.op(input) == Op::Bad {
                    continue;
                }
                match value {
                    None => value = Some(input),
                    Some(v) if v == input => {}
                    Some(_) => return n,
                }
            }
            value.unwrap_or_else(|| g.bad())
        }
        Op::Proj => {
            let pred = g.in_at(n, 0);
            if g.op(pred) == Op::Tuple {
                let pn_ = g.node(n).attr.proj() as usize;
                if pn_ < g.arity(pred) {
                    return g.in_at(pred, pn_);
                }
            }
            n
        }
        Op::Mux => {
            let sel = value_of(g, g.in_at(n, 0));
            if sel.is_constant() {
                return if sel.as_bool() { g.in_at(n, 2) } else { g.in_at(n, 1) };
            }
            if g.in_at(n, 1) == g.in_at(n, 2) {
                return g.in_at(n, 1);
            }
            n
        }
        Op::Block => {
            // Straightening: a matured block whose only predecessor is a
            // plain Jmp merges with the jump's block.
            if g.opt.contains(OptFlags::CONTROL_FLOW)
                && g.is_matured(n)
                && g.arity(n) == 1
                && n != g.start_block()
                && n != g.end_block()
            {
                let pred = g.in_at(n, 0);
                if g.op(pred) == Op::Jmp {
                    return g.block_of(pred);
                }
            }
            n
        }
        Op::Id => g.skip_id(n),
        _ => n,
    }
}

/// Rebuild `n` into a cheaper form, possibly creating new nodes.
pub fn transform_node(g: &mut Graph, n: Node) -> Node {
    let op = g.op(n);
    match op {
        _ if op.is_binop() => {
            // Normalize: constant operand to the right.
            if op.is_commutative()
                && g.op(g.in_at(n, 0)) == Op::Const
                && g.op(g.in_at(n, 1)) != Op::Const
            {
                let l = g.in_at(n, 0);
                let r = g.in_at(n, 1);
                g.remove_identity(n);
                g.set_in(n, 0, r);
                g.set_in(n, 1, l);
            }
            match op {
                Op::Sub => {
                    // x - x = 0
                    if g.in_at(n, 0) == g.in_at(n, 1) && g.mode(n).is_num() {
                        let zero = g.new_const(Tarval::null(g.mode(n)));
                        dbg::opt_applied(DbgAction::Algebraic, n, zero);
                        return zero;
                    }
                    n
                }
                Op::Mul => {
                    // x * 2^k = x << k
                    let m = g.mode(n);
                    if m.is_int() {
                        if let Some(k) =
                            value_of(g, g.in_at(n, 1)).is_power_of_2()
                        {
                            let x = g.in_at(n, 0);
                            let block = g.block_of(n);
                            let amount = g.new_const(Tarval::new_int(crate::ir::mode::IU, k as i64));
                            let shl = g.new_binop(Op::Shl, block, x, amount, m);
                            dbg::opt_applied(DbgAction::Algebraic, n, shl);
                            return shl;
                        }
                    }
                    n
                }
                _ => n,
            }
        }
        Op::Conv => {
            // Conv(Conv(x)): the outer conv subsumes the inner one when it
            // narrows within the inner's range.
            let inner = g.in_at(n, 0);
            if g.op(inner) == Op::Conv {
                let outer_mode = g.mode(n);
                let inner_mode = g.mode(inner);
                let source = g.in_at(inner, 0);
                if outer_mode.smaller_than(inner_mode) && g.mode(source).is_conv_legal(outer_mode)
                {
                    let block = g.block_of(n);
                    let conv = g.new_conv(block, source, outer_mode);
                    dbg::opt_applied(DbgAction::Algebraic, n, conv);
                    return conv;
                }
            }
            n
        }
        _ => n,
    }
}

/// The full local pipeline on a fresh or mutated node.
pub fn optimize_node(g: &mut Graph, n: Node) -> Node {
    // Constant evaluation first.
    if g.opt.contains(OptFlags::CONST_FOLD) && g.op(n) != Op::Const && g.mode(n).is_datab() {
        let tv = computed_value(g, n);
        if tv.is_constant() {
            let c = g.new_const(tv);
            dbg::opt_applied(DbgAction::ConstEval, n, c);
            return c;
        }
    }

    let mut n = n;
    if g.opt.contains(OptFlags::ALGEBRAIC) {
        let eq = equivalent_node(g, n);
        if eq != n {
            dbg::opt_applied(DbgAction::Algebraic, n, eq);
            return eq;
        }
        let t = transform_node(g, n);
        if t != n {
            return t;
        }
        n = t;
    }

    if g.opt.contains(OptFlags::CSE) {
        let twin = g.identify(n);
        if twin != n {
            dbg::opt_applied(DbgAction::Cse, n, twin);
            return twin;
        }
    }
    n
}

/// Decide a `Cond` whose selector is a compile-time constant: the taken
/// projection becomes a `Jmp`, the not-taken projection becomes `Bad`.
fn decide_const_cond(g: &mut Graph, proj: Node) -> bool {
    let cond = g.in_at(proj, 0);
    if g.op(cond) != Op::Cond {
        return false;
    }
    let sel = value_of(g, g.in_at(cond, 0));
    if !sel.is_constant() {
        return false;
    }
    let taken = if sel.as_bool() { pn::cond::TRUE } else { pn::cond::FALSE };
    let block = g.block_of(cond);
    if g.node(proj).attr.proj() == taken {
        let jmp = g.new_jmp(block);
        dbg::opt_applied(DbgAction::IfSimplification, proj, jmp);
        g.exchange(proj, jmp);
    } else {
        let bad = g.bad();
        dbg::opt_applied(DbgAction::IfSimplification, proj, bad);
        g.exchange(proj, bad);
    }
    true
}

/// Run the local pipeline over the whole graph until a fix-point.
///
/// Returns whether anything changed.
pub fn optimize_graph(g: &mut Graph) -> bool {
    let mut ever_changed = false;
    loop {
        let mut changed = false;
        g.normalize_ids();
        let order = g.reachable_postorder();
        for n in order {
            match g.op(n) {
                Op::Id | Op::Bad | Op::Unknown | Op::NoMem | Op::Anchor | Op::End | Op::Start => {
                    continue
                }
                Op::Proj if g.opt.contains(OptFlags::CONTROL_FLOW) && g.mode(n) == crate::ir::mode::X => {
                    if decide_const_cond(g, n) {
                        changed = true;
                        continue;
                    }
                }
                _ => {}
            }
            let replacement = optimize_node(g, n);
            if replacement != n && g.skip_id(n) != replacement {
                g.exchange(n, replacement);
                changed = true;
            }
        }
        if !changed {
            break;
        }
        ever_changed = true;
    }
    ever_changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;

    fn int(g: &mut Graph, v: i64) -> Node {
        g.new_const(Tarval::new_int(mode::IS, v))
    }

    #[test]
    fn constant_addition_folds() {
        let mut g = Graph::new(None);
        let a = int(&mut g, 3);
        let b = int(&mut g, 4);
        let block = g.start_block();
        let sum = g.new_add(block, a, b, mode::IS);
        assert_eq!(g.op(sum), Op::Const);
        assert_eq!(g.node(sum).attr.tarval().as_i64(), 7);
    }

    #[test]
    fn add_zero_is_identity() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let zero = int(&mut g, 0);
        assert_eq!(g.new_add(block, x, zero, mode::IS), x);
        assert_eq!(g.new_add(block, zero, x, mode::IS), x);
        assert_eq!(g.new_sub(block, x, zero, mode::IS), x);
    }

    #[test]
    fn sub_self_is_zero() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let d = g.new_sub(block, x, x, mode::IS);
        assert_eq!(g.op(d), Op::Const);
        assert!(g.node(d).attr.tarval().is_null());
    }

    #[test]
    fn mul_power_of_two_becomes_shift() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let eight = int(&mut g, 8);
        let m = g.new_mul(block, x, eight, mode::IS);
        assert_eq!(g.op(m), Op::Shl);
        assert_eq!(g.in_at(m, 0), x);
        assert_eq!(g.node(g.in_at(m, 1)).attr.tarval().as_u64(), 3);
    }

    #[test]
    fn cmp_self_folds() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let c = g.new_cmp(block, x, x, Relation::EQUAL);
        assert_eq!(g.op(c), Op::Const);
        assert!(g.node(c).attr.tarval().as_bool());
        let c2 = g.new_cmp(block, x, x, Relation::LESS);
        assert!(!g.node(c2).attr.tarval().as_bool());
    }

    #[test]
    fn overflow_does_not_fold() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let max = g.new_const(Tarval::max(mode::IS));
        let one = int(&mut g, 1);
        let sum = g.new_add(block, max, one, mode::IS);
        // Folding under the bad overflow policy fails; the Add survives.
        assert_eq!(g.op(sum), Op::Add);
    }

    #[test]
    fn phi_of_equal_constants_collapses() {
        // Scenario: Phi(Const 3, Const 3) folds to Const 3 and the value
        // table holds a single Const-3 node.
        let mut g = Graph::new(None);
        let c1 = int(&mut g, 3);
        let c2 = int(&mut g, 3);
        assert_eq!(c1, c2);
        let j1 = g.new_jmp(g.start_block());
        let b1 = g.new_block(&[j1]);
        let j2 = g.new_jmp(b1);
        let j3 = g.new_jmp(b1);
        let merge = g.new_block(&[j2, j3]);
        let phi = g.new_phi(merge, &[c1, c2], mode::IS);
        assert_eq!(phi, c1);
    }

    #[test]
    fn constant_cond_decides_branch() {
        let mut g = Graph::new(None);
        let t = g.new_const(Tarval::b_true());
        let block = g.start_block();
        let cond = g.new_cond(block, t);
        let proj_t = g.new_proj(cond, pn::cond::TRUE, mode::X);
        let proj_f = g.new_proj(cond, pn::cond::FALSE, mode::X);
        let b_t = g.new_block(&[proj_t]);
        let b_f = g.new_block(&[proj_f]);
        let ret_site = g.new_jmp(b_t);
        g.keep_alive(ret_site);
        let dead = g.new_jmp(b_f);
        g.keep_alive(dead);

        optimize_graph(&mut g);

        // The taken edge became a Jmp, the dead edge became Bad, and the
        // then-block straightened into the Cond's block.
        assert_eq!(g.op(g.skip_id(proj_t)), Op::Jmp);
        assert_eq!(g.op(g.skip_id(proj_f)), Op::Bad);
        assert_eq!(g.skip_id(b_t), g.start_block());
        assert_eq!(g.op(g.in_at(b_f, 0)), Op::Bad);
    }

    #[test]
    fn double_conv_collapses() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::BS);
        let wide = g.new_conv(block, x, mode::LS);
        let narrow = g.new_conv(block, wide, mode::IS);
        assert_eq!(g.op(narrow), Op::Conv);
        assert_eq!(g.in_at(narrow, 0), x);
    }
}
