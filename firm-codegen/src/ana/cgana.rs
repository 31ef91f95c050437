//! Call-graph analysis: class-hierarchy based callee resolution.
//!
//! Three phases over the whole program:
//!
//! 1. *sel methods*: for each `Sel` addressing a method, the set of concrete
//!    implementations reachable in the overwrites DAG. A singleton set turns
//!    the dynamic dispatch into a plain `SymConst` address.
//! 2. *free methods*: a method is free when its address leaks — it is
//!    externally visible, it is the program entry, its address appears in a
//!    global initializer (any method address inside an initializer counts,
//!    without checking the container type; overapproximating is safe), or
//!    its address is passed through any opcode other than the pointer input
//!    of a `Call`.
//! 3. *callee analysis*: each `Call`'s pointer operand is resolved through
//!    `Phi`/`Proj`/`Tuple`/`Mux`/`Sel`/`SymConst` to a set of candidate
//!    entities; paths that cannot be named contribute the unknown sentinel.
//!    The result attaches to the `Call`'s attributes.

use crate::ana::outedges::OutEdges;
use crate::ir::entities::{Entity, GraphRef, Node};
use crate::ir::mode;
use crate::ir::node::{Attr, Callee, SymConst};
use crate::ir::opcode::Op;
use crate::ir::program::Program;
use crate::ir::types::{Initializer, Visibility};
use std::collections::{HashMap, HashSet, VecDeque};

/// The result of call-graph analysis.
pub struct CallGraphInfo {
    /// Implementations per method entity appearing in a `Sel`.
    pub sel_methods: HashMap<Entity, Vec<Entity>>,
    /// Methods whose address leaks.
    pub free_methods: Vec<Entity>,
}

/// Run all phases on the program.
pub fn compute(prog: &mut Program) -> CallGraphInfo {
    prog.types.compute_inheritance_closure();
    let sel_methods = sel_methods(prog);
    let free = free_methods(prog);
    callee_ana(prog, &sel_methods);
    log::debug!(
        "cgana: {} dispatched entities, {} free methods",
        sel_methods.len(),
        free.len()
    );
    CallGraphInfo {
        sel_methods,
        free_methods: free,
    }
}

/// Phase 1: implementation sets per `Sel`-addressed method, devirtualizing
/// singleton sets.
fn sel_methods(prog: &mut Program) -> HashMap<Entity, Vec<Entity>> {
    // Collect all method Sels first; graph and type tables cannot be
    // borrowed at once.
    let refs: Vec<GraphRef> = prog.graph_refs().collect();
    let mut sels: Vec<(GraphRef, Node, Entity)> = Vec::new();
    for r in refs {
        let order = prog.graph_mut(r).reachable_postorder();
        let g = prog.graph(r);
        for n in order {
            if g.op(n) == Op::Sel {
                if let Attr::Sel(ent) = g.node(n).attr.clone() {
                    if prog.types.is_method_entity(ent) {
                        sels.push((r, n, ent));
                    }
                }
            }
        }
    }

    let mut map: HashMap<Entity, Vec<Entity>> = HashMap::new();
    for &(_, _, ent) in &sels {
        map.entry(ent)
            .or_insert_with(|| prog.types.method_implementations(ent));
    }

    for (r, n, ent) in sels {
        if let Some(impls) = map.get(&ent) {
            if let [single] = impls[..] {
                let g = prog.graph_mut(r);
                let sym = g.new_symconst(SymConst::Addr(single), mode::P);
                log::trace!("devirtualized {} to {}", n, sym);
                g.exchange(n, sym);
            }
        }
    }
    map
}

fn initializer_leaks(prog: &Program, init: &Initializer, free: &mut HashSet<Entity>) {
    match init {
        Initializer::Address(e) => {
            if prog.types.is_method_entity(*e) {
                free.insert(*e);
            }
        }
        Initializer::Compound(subs) => {
            for s in subs {
                initializer_leaks(prog, s, free);
            }
        }
        Initializer::Null | Initializer::Tarval(_) => {}
    }
}

/// Phase 2: the set of methods whose address leaks.
fn free_methods(prog: &mut Program) -> Vec<Entity> {
    let mut free: HashSet<Entity> = HashSet::new();

    // Externally visible methods and the program entry.
    for e in prog.types.entities().collect::<Vec<_>>() {
        if !prog.types.is_method_entity(e) {
            continue;
        }
        match prog.types.entity(e).visibility {
            Visibility::External | Visibility::ExternalDeclared => {
                free.insert(e);
            }
            Visibility::Local => {}
        }
    }
    if let Some(main) = prog.main_graph {
        if let Some(ent) = prog.graph(main).entity {
            free.insert(ent);
        }
    }

    // Method addresses in global initializers.
    let inits: Vec<Initializer> = prog
        .types
        .entities()
        .collect::<Vec<_>>()
        .into_iter()
        .filter_map(|e| prog.types.entity(e).initializer.clone())
        .collect();
    for init in &inits {
        initializer_leaks(prog, init, &mut free);
    }

    // Method addresses escaping through non-Call uses: breadth-first over
    // pointer-mode users starting at each method SymConst.
    let refs: Vec<GraphRef> = prog.graph_refs().collect();
    for r in refs {
        let outs = OutEdges::compute(prog.graph_mut(r));
        let g = prog.graph(r);
        let order: Vec<Node> = g.all_nodes().filter(|&n| g.op(n) == Op::SymConst).collect();
        for n in order {
            let Attr::SymConst(SymConst::Addr(ent)) = g.node(n).attr.clone() else {
                continue;
            };
            if !prog.types.is_method_entity(ent) {
                continue;
            }
            let mut queue: VecDeque<Node> = VecDeque::new();
            queue.push_back(n);
            let mut seen: HashSet<Node> = HashSet::new();
            'walk: while let Some(v) = queue.pop_front() {
                if !seen.insert(v) {
                    continue;
                }
                for &(user, pos) in outs.outs(v) {
                    match g.op(user) {
                        Op::Call if pos == 1 => {}
                        Op::Phi | Op::Mux | Op::Tuple | Op::Proj | Op::Id => {
                            queue.push_back(user);
                        }
                        Op::End | Op::Anchor => {}
                        _ => {
                            free.insert(ent);
                            break 'walk;
                        }
                    }
                }
            }
        }
    }

    let mut out: Vec<Entity> = free.into_iter().collect();
    out.sort();
    out
}

fn resolve_callees(
    prog: &Program,
    r: GraphRef,
    n: Node,
    sel_methods: &HashMap<Entity, Vec<Entity>>,
    acc: &mut Vec<Callee>,
    seen: &mut HashSet<Node>,
) {
    if !seen.insert(n) {
        return;
    }
    let g = prog.graph(r);
    match g.op(n) {
        Op::SymConst => match g.node(n).attr.clone() {
            Attr::SymConst(SymConst::Addr(e)) => acc.push(Callee::Entity(e)),
            _ => acc.push(Callee::Unknown),
        },
        Op::Sel => {
            if let Attr::Sel(ent) = g.node(n).attr.clone() {
                match sel_methods.get(&ent) {
                    Some(impls) => acc.extend(impls.iter().map(|&e| Callee::Entity(e))),
                    None => acc.push(Callee::Unknown),
                }
            }
        }
        Op::Phi | Op::Mux | Op::Tuple => {
            let start = if g.op(n) == Op::Mux { 1 } else { 0 };
            for i in start..g.arity(n) {
                resolve_callees(prog, r, g.in_at(n, i), sel_methods, acc, seen);
            }
        }
        Op::Id => resolve_callees(prog, r, g.skip_id(n), sel_methods, acc, seen),
        _ => acc.push(Callee::Unknown),
    }
}

/// Phase 3: attach candidate callee sets to every `Call`.
fn callee_ana(prog: &mut Program, sel_methods: &HashMap<Entity, Vec<Entity>>) {
    let refs: Vec<GraphRef> = prog.graph_refs().collect();
    for r in refs {
        let order = prog.graph_mut(r).reachable_postorder();
        let calls: Vec<Node> = order
            .into_iter()
            .filter(|&n| prog.graph(r).op(n) == Op::Call)
            .collect();
        for call in calls {
            let ptr = prog.graph(r).in_at(call, 1);
            let mut acc = Vec::new();
            let mut seen = HashSet::new();
            resolve_callees(prog, r, ptr, sel_methods, &mut acc, &mut seen);
            acc.sort();
            acc.dedup();
            let g = prog.graph_mut(r);
            if let Attr::Call(attr) = &mut g.node_mut(call).attr {
                attr.callees = Some(acc);
            }
        }
    }
}

/// Drop keep-alives that only hold dead method addresses alive.
///
/// After callee analysis has narrowed the call graph, a keep-alive edge to a
/// method address whose method is neither free nor called anywhere serves
/// no purpose.
pub fn gc_keepalives(prog: &mut Program, info: &CallGraphInfo) -> bool {
    let mut live: HashSet<Entity> = info.free_methods.iter().copied().collect();
    let refs: Vec<GraphRef> = prog.graph_refs().collect();
    for &r in &refs {
        let g = prog.graph(r);
        for n in g.all_nodes() {
            if g.op(n) == Op::Call {
                if let Attr::Call(attr) = &g.node(n).attr {
                    if let Some(callees) = &attr.callees {
                        for c in callees {
                            if let Callee::Entity(e) = c {
                                live.insert(*e);
                            }
                        }
                    }
                }
            }
        }
    }

    let mut changed = false;
    for r in refs {
        let mut drop_list: Vec<usize> = Vec::new();
        {
            let g = prog.graph(r);
            let end = g.end();
            for i in 0..g.arity(end) {
                let ka = g.in_at(end, i);
                if g.op(ka) == Op::SymConst {
                    if let Attr::SymConst(SymConst::Addr(e)) = g.node(ka).attr.clone() {
                        if prog.types.is_method_entity(e)
                            && prog.types.entity(e).visibility == Visibility::Local
                            && !live.contains(&e)
                        {
                            drop_list.push(i);
                        }
                    }
                }
            }
        }
        if !drop_list.is_empty() {
            changed = true;
            let g = prog.graph_mut(r);
            let end = g.end();
            for &i in drop_list.iter().rev() {
                g.node_mut(end).ins.remove(i);
            }
            g.invalidate_all();
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::types::TypeKind;

    fn method_program() -> (Program, Entity, Entity, Entity) {
        // class A { f } ; class B : A { f }  plus a caller.
        let mut prog = Program::new();
        let a = prog.types.new_class("A");
        let b = prog.types.new_class("B");
        prog.types.add_subclass(a, b);
        let m_ty = prog.types.new_method(vec![], vec![]);
        let fa = prog.types.new_entity(a, "f", m_ty).unwrap();
        let fb = prog.types.new_entity(b, "f", m_ty).unwrap();
        prog.types.add_entity_overwrites(fb, fa);
        prog.new_graph(fa).unwrap();
        prog.new_graph(fb).unwrap();
        let (caller, _g) = prog.new_method_graph("caller", vec![], vec![]).unwrap();
        (prog, fa, fb, caller)
    }

    #[test]
    fn dispatched_set_contains_all_overrides() {
        let (mut prog, fa, fb, caller) = method_program();
        let r = prog.types.entity(caller).graph.unwrap();
        // Build: call through a Sel of A::f.
        let g = prog.graph_mut(r);
        let block = g.start_block();
        let this = g.new_unknown(mode::P);
        let sel = g.new_sel(block, this, fa);
        let mem = g.initial_mem();
        let m_ty = prog.types.entity(fa).ty;
        let g = prog.graph_mut(r);
        let call = g.new_call(block, mem, sel, &[], m_ty);
        g.keep_alive(call);

        let info = compute(&mut prog);
        let impls = &info.sel_methods[&fa];
        assert_eq!(impls.len(), 2);
        assert!(impls.contains(&fa) && impls.contains(&fb));

        let g = prog.graph(r);
        if let Attr::Call(attr) = &g.node(call).attr {
            let callees = attr.callees.as_ref().unwrap();
            assert!(callees.contains(&Callee::Entity(fa)));
            assert!(callees.contains(&Callee::Entity(fb)));
        } else {
            panic!("call lost its attributes");
        }
    }

    #[test]
    fn singleton_sel_devirtualizes() {
        let mut prog = Program::new();
        let a = prog.types.new_class("A");
        let m_ty = prog.types.new_method(vec![], vec![]);
        let fa = prog.types.new_entity(a, "f", m_ty).unwrap();
        prog.new_graph(fa).unwrap();
        let (_caller, r) = prog.new_method_graph("caller", vec![], vec![]).unwrap();

        let g = prog.graph_mut(r);
        let block = g.start_block();
        let this = g.new_unknown(mode::P);
        let sel = g.new_sel(block, this, fa);
        let mem = g.initial_mem();
        let g = prog.graph_mut(r);
        let call = g.new_call(block, mem, sel, &[], m_ty);
        g.keep_alive(call);

        compute(&mut prog);
        let g = prog.graph(r);
        // The Sel has been replaced by a direct address.
        assert_eq!(g.op(g.in_at(call, 1)), Op::SymConst);
    }

    #[test]
    fn initializer_address_is_free() {
        let (mut prog, fa, _fb, _caller) = method_program();
        let p_ty = prog.types.new_pointer(prog.types.entity(fa).ty);
        assert!(matches!(
            prog.types.ty(p_ty).kind,
            TypeKind::Pointer { .. }
        ));
        let table = prog.types.new_global_entity("vtable", p_ty).unwrap();
        prog.types.entity_mut(table).initializer =
            Some(Initializer::Compound(vec![Initializer::Address(fa)]));

        let info = compute(&mut prog);
        assert!(info.free_methods.contains(&fa));
    }
}
