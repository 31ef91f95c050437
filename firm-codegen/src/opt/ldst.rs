//! Load/store optimization: forwarding and dead store removal.
//!
//! Pattern-driven rewrites along the memory edges:
//!
//! - *read after write*: a `Load` directly behind a `Store` to the same
//!   address with the same mode takes the stored value instead of touching
//!   memory. Only applies when the load has no exception-handler user or
//!   sits in the store's block.
//! - *read after read*: two back-to-back `Load`s of the same address share
//!   one result.
//! - *write after write*: a `Store` immediately overwritten by another
//!   `Store` to the same address is dead.
//! - *write after read*: storing the value just loaded from the same
//!   address back to it does nothing.
//! - *Phi-of-store hoisting* (off by default): when every predecessor of a
//!   merge block stores to the same address, the values sink into a Phi and
//!   one `Store` remains.

use crate::ana::outedges::OutEdges;
use crate::dbg::{self, DbgAction};
use crate::flags::OptFlags;
use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::mode;
use crate::ir::node::{pn, Attr};
use crate::ir::opcode::Op;

fn proj_of(g: &Graph, outs: &OutEdges, n: Node, pn_: u32) -> Option<Node> {
    outs.outs(n)
        .iter()
        .map(|&(u, _)| u)
        .find(|&u| g.op(u) == Op::Proj && g.node(u).attr.proj() == pn_)
}

fn has_except_user(g: &Graph, outs: &OutEdges, n: Node, pn_: u32) -> bool {
    proj_of(g, outs, n, pn_).is_some_and(|p| !outs.outs(p).is_empty())
}

/// Rewire the control projections of a bypassed fragile operation: the
/// regular path becomes a plain jump, the exception path dies.
fn bypass_control(g: &mut Graph, outs: &OutEdges, n: Node, regular: u32, except: u32) {
    if let Some(p) = proj_of(g, outs, n, regular) {
        let block = g.block_of(n);
        let jmp = g.new_jmp(block);
        g.exchange(p, jmp);
    }
    if let Some(p) = proj_of(g, outs, n, except) {
        let bad = g.bad();
        g.exchange(p, bad);
    }
}

/// A load whose memory input is the store of the same address: forward the
/// stored value.
fn read_after_write(g: &mut Graph, outs: &OutEdges, load: Node) -> bool {
    let mem = g.in_at(load, 0);
    if g.op(mem) != Op::Proj || g.node(mem).attr.proj() != pn::store::M {
        return false;
    }
    let store = g.in_at(mem, 0);
    if g.op(store) != Op::Store {
        return false;
    }
    let same_addr = g.in_at(store, 1) == g.in_at(load, 1);
    let value = g.in_at(store, 2);
    if !same_addr || g.mode(value) != g.node(load).attr.load_mode() {
        return false;
    }
    // Exception-handler compatibility.
    if has_except_user(g, outs, load, pn::load::X_EXCEPT) && g.block_of(load) != g.block_of(store)
    {
        return false;
    }
    let mut did = false;
    if let Some(res) = proj_of(g, outs, load, pn::load::RES) {
        dbg::opt_applied(DbgAction::ReadAfterWrite, res, value);
        g.exchange(res, value);
        did = true;
    }
    if let Some(m) = proj_of(g, outs, load, pn::load::M) {
        g.exchange(m, mem);
        did = true;
    }
    if did {
        bypass_control(g, outs, load, pn::load::X_REGULAR, pn::load::X_EXCEPT);
    }
    did
}

/// A load whose memory input comes straight from a load of the same
/// address: share the first load's result.
fn read_after_read(g: &mut Graph, outs: &OutEdges, load: Node) -> bool {
    let mem = g.in_at(load, 0);
    if g.op(mem) != Op::Proj || g.node(mem).attr.proj() != pn::load::M {
        return false;
    }
    let prev = g.in_at(mem, 0);
    if g.op(prev) != Op::Load || prev == load {
        return false;
    }
    if g.in_at(prev, 1) != g.in_at(load, 1)
        || g.node(prev).attr.load_mode() != g.node(load).attr.load_mode()
    {
        return false;
    }
    if has_except_user(g, outs, load, pn::load::X_EXCEPT) && g.block_of(load) != g.block_of(prev) {
        return false;
    }
    let load_mode = g.node(load).attr.load_mode();
    let mut did = false;
    if let Some(res) = proj_of(g, outs, load, pn::load::RES) {
        let prev_res = match proj_of(g, outs, prev, pn::load::RES) {
            Some(p) => p,
            None => g.new_proj(prev, pn::load::RES, load_mode),
        };
        dbg::opt_applied(DbgAction::ReadAfterRead, res, prev_res);
        g.exchange(res, prev_res);
        did = true;
    }
    if let Some(m) = proj_of(g, outs, load, pn::load::M) {
        g.exchange(m, mem);
        did = true;
    }
    if did {
        bypass_control(g, outs, load, pn::load::X_REGULAR, pn::load::X_EXCEPT);
    }
    did
}

/// A store whose only observer is a following store to the same address is
/// dead.
fn write_after_write(g: &mut Graph, outs: &OutEdges, store: Node) -> bool {
    let Some(m) = proj_of(g, outs, store, pn::store::M) else {
        return false;
    };
    // Every memory user must be a same-address store; one suffices to kill.
    let users: Vec<Node> = outs.outs(m).iter().map(|&(u, _)| u).collect();
    if users.is_empty() {
        return false;
    }
    for &u in &users {
        if g.op(u) != Op::Store
            || g.in_at(u, 1) != g.in_at(store, 1)
            || g.mode(g.in_at(u, 2)) != g.mode(g.in_at(store, 2))
        {
            return false;
        }
    }
    let prev_mem = g.in_at(store, 0);
    dbg::opt_applied(DbgAction::WriteAfterWrite, m, prev_mem);
    g.exchange(m, prev_mem);
    bypass_control(g, outs, store, pn::store::X_REGULAR, pn::store::X_EXCEPT);
    true
}

/// Storing the value just loaded from the same address changes nothing.
fn write_after_read(g: &mut Graph, outs: &OutEdges, store: Node) -> bool {
    let value = g.in_at(store, 2);
    let mem = g.in_at(store, 0);
    if g.op(value) != Op::Proj
        || g.node(value).attr.proj() != pn::load::RES
        || g.op(mem) != Op::Proj
        || g.node(mem).attr.proj() != pn::load::M
    {
        return false;
    }
    let load = g.in_at(value, 0);
    if g.op(load) != Op::Load || g.in_at(mem, 0) != load {
        return false;
    }
    if g.in_at(load, 1) != g.in_at(store, 1) {
        return false;
    }
    let Some(m) = proj_of(g, outs, store, pn::store::M) else {
        return false;
    };
    dbg::opt_applied(DbgAction::WriteAfterRead, m, mem);
    g.exchange(m, mem);
    bypass_control(g, outs, store, pn::store::X_REGULAR, pn::store::X_EXCEPT);
    true
}

/// When every predecessor stores the same-mode value to one address, sink
/// the values into a Phi and keep one store in the merge block.
fn phi_store_hoist(g: &mut Graph, outs: &OutEdges, phi: Node) -> bool {
    if g.mode(phi) != mode::M || g.arity(phi) < 2 {
        return false;
    }
    let block = g.block_of(phi);
    if !g.is_matured(block) || g.arity(block) != g.arity(phi) {
        return false;
    }
    let mut stores = Vec::new();
    for i in 0..g.arity(phi) {
        let input = g.in_at(phi, i);
        if g.op(input) != Op::Proj || g.node(input).attr.proj() != pn::store::M {
            return false;
        }
        let store = g.in_at(input, 0);
        if g.op(store) != Op::Store {
            return false;
        }
        // The store must be observed only through this Phi.
        if outs.n_outs(input) != 1 {
            return false;
        }
        stores.push(store);
    }
    let ptr = g.in_at(stores[0], 1);
    let value_mode = g.mode(g.in_at(stores[0], 2));
    for &s in &stores[1..] {
        if g.in_at(s, 1) != ptr || g.mode(g.in_at(s, 2)) != value_mode {
            return false;
        }
    }
    let values: Vec<Node> = stores.iter().map(|&s| g.in_at(s, 2)).collect();
    let mems: Vec<Node> = stores.iter().map(|&s| g.in_at(s, 0)).collect();
    let value_phi = g.new_phi(block, &values, value_mode);
    let mem_phi = g.new_phi(block, &mems, mode::M);
    let store = g.new_store(block, mem_phi, ptr, value_phi);
    let m = g.new_proj(store, pn::store::M, mode::M);
    dbg::opt_applied(DbgAction::WriteAfterWrite, phi, m);
    g.exchange(phi, m);
    true
}

/// Run load/store optimization to a fix-point. Returns whether anything
/// changed.
pub fn optimize_load_store(g: &mut Graph) -> bool {
    if !g.opt.contains(OptFlags::LDST) {
        return false;
    }
    let mut ever_changed = false;
    loop {
        let outs = OutEdges::compute(g);
        let order = g.reachable_postorder();
        let mut changed = false;
        for n in order {
            let did = match g.op(n) {
                Op::Load => read_after_write(g, &outs, n) || read_after_read(g, &outs, n),
                Op::Store => write_after_write(g, &outs, n) || write_after_read(g, &outs, n),
                Op::Phi if g.opt.contains(OptFlags::LDST_PHI_STORE) => {
                    phi_store_hoist(g, &outs, n)
                }
                _ => false,
            };
            if did {
                changed = true;
                // The out-edge cache is stale after a rewrite.
                break;
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
    use crate::ir::tarval::Tarval;

    /// Store x to p, load from p: the load's value proj becomes x and its
    /// memory proj becomes the store's memory proj.
    #[test]
    fn load_after_store_forwards() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let p = g.new_unknown(mode::P);
        let x = g.new_const(Tarval::new_int(mode::IS, 42));
        let st = g.new_store(block, g.initial_mem(), p, x);
        let st_m = g.new_proj(st, pn::store::M, mode::M);
        let ld = g.new_load(block, st_m, p, mode::IS);
        let ld_m = g.new_proj(ld, pn::load::M, mode::M);
        let ld_res = g.new_proj(ld, pn::load::RES, mode::IS);
        let ret = g.new_return(g.end_block(), ld_m, &[ld_res]);
        g.keep_alive(ret);

        assert!(optimize_load_store(&mut g));
        assert_eq!(g.skip_id(ld_res), x);
        assert_eq!(g.skip_id(ld_m), st_m);
    }

    #[test]
    fn load_after_load_shares_result() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let p = g.new_unknown(mode::P);
        let l1 = g.new_load(block, g.initial_mem(), p, mode::IS);
        let l1_m = g.new_proj(l1, pn::load::M, mode::M);
        let l1_res = g.new_proj(l1, pn::load::RES, mode::IS);
        let l2 = g.new_load(block, l1_m, p, mode::IS);
        let l2_m = g.new_proj(l2, pn::load::M, mode::M);
        let l2_res = g.new_proj(l2, pn::load::RES, mode::IS);
        let sum = g.new_add(block, l1_res, l2_res, mode::IS);
        let ret = g.new_return(g.end_block(), l2_m, &[sum]);
        g.keep_alive(ret);

        assert!(optimize_load_store(&mut g));
        assert_eq!(g.skip_id(l2_res), l1_res);
        assert_eq!(g.skip_id(l2_m), l1_m);
    }

    #[test]
    fn dead_store_removed() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let p = g.new_unknown(mode::P);
        let a = g.new_const(Tarval::new_int(mode::IS, 1));
        let b = g.new_const(Tarval::new_int(mode::IS, 2));
        let s1 = g.new_store(block, g.initial_mem(), p, a);
        let s1_m = g.new_proj(s1, pn::store::M, mode::M);
        let s2 = g.new_store(block, s1_m, p, b);
        let s2_m = g.new_proj(s2, pn::store::M, mode::M);
        let ret = g.new_return(g.end_block(), s2_m, &[]);
        g.keep_alive(ret);

        assert!(optimize_load_store(&mut g));
        // The first store is bypassed: the second now reads initial memory.
        assert_eq!(g.in_at(s2, 0), g.initial_mem());
    }

    #[test]
    fn store_back_loaded_value_removed() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let p = g.new_unknown(mode::P);
        let ld = g.new_load(block, g.initial_mem(), p, mode::IS);
        let ld_m = g.new_proj(ld, pn::load::M, mode::M);
        let ld_res = g.new_proj(ld, pn::load::RES, mode::IS);
        let st = g.new_store(block, ld_m, p, ld_res);
        let st_m = g.new_proj(st, pn::store::M, mode::M);
        let ret = g.new_return(g.end_block(), st_m, &[]);
        g.keep_alive(ret);

        assert!(optimize_load_store(&mut g));
        assert_eq!(g.skip_id(st_m), ld_m);
    }
}
