//! Register allocation: chunk-based affinity coalescing.
//!
//! Values that should share a register (copy sources and destinations, Phi
//! operands, calling-convention constraints) are connected by affinity
//! edges. Edges are merged greedily, heaviest first, into chunks whenever
//! the merge introduces no interference inside the chunk (checked against
//! the chunk's cached interference set). A max-priority queue then colors
//! whole chunks: the heaviest chunk tries every admissible color, bounded
//! recursive recoloring pushes interfering neighbours out of the way with
//! all moves recorded on an undo list, and the best-satisfied fragment is
//! committed while the remainder is queued again.
//!
//! Every iteration commits a non-empty fragment or discards the chunk, so
//! the loop terminates. An uncolorable singleton is reported for spilling.

use crate::be::liveness::Liveness;
use crate::be::{MachFunction, MachOp, RegClass, VReg};
use crate::bitset::BitSet;
use firm_entity::{EntityRef, SecondaryMap};
use std::collections::BinaryHeap;

/// The result of an allocation run.
#[derive(Debug, PartialEq)]
pub enum AllocOutcome {
    /// Every value received a register.
    Done,
    /// These values could not be colored; a spill pass must break them up
    /// and allocation must run again.
    NeedsSpill(Vec<VReg>),
}

/// Maximum recursion depth of the recoloring walk.
const MAX_RECOLOR_DEPTH: usize = 4;

struct AffEdge {
    a: VReg,
    b: VReg,
    cost: f32,
}

#[derive(Default, Clone)]
struct Chunk {
    id: u32,
    nodes: Vec<VReg>,
    /// Union of the interference neighbours of all members.
    interfere: BitSet,
    weight: f32,
}

struct Env<'a> {
    f: &'a mut MachFunction,
    class: RegClass,
    colors: u8,
    /// Interference neighbours per vreg.
    neigh: SecondaryMap<VReg, Vec<VReg>>,
    /// Current (possibly tentative) color.
    col: SecondaryMap<VReg, Option<u8>>,
    /// Colors committed by a materialized fragment.
    fixed: SecondaryMap<VReg, bool>,
    /// Which chunk each vreg belongs to.
    chunk_of: SecondaryMap<VReg, u32>,
    /// Affinity edges, for chunk weights.
    edges: Vec<AffEdge>,
}

impl<'a> Env<'a> {
    fn admissible(&self, v: VReg, c: u8) -> bool {
        self.f.vregs[v].admissible & (1 << c) != 0
    }

    fn interferes(&self, a: VReg, b: VReg) -> bool {
        self.neigh[a].contains(&b)
    }
}

/// Build the interference graph of one register class.
fn build_interference(
    f: &MachFunction,
    live: &Liveness,
    class: RegClass,
) -> SecondaryMap<VReg, Vec<VReg>> {
    let mut neigh: SecondaryMap<VReg, Vec<VReg>> = SecondaryMap::new();
    let mut add = |a: VReg, b: VReg, neigh: &mut SecondaryMap<VReg, Vec<VReg>>| {
        if a != b {
            if !neigh[a].contains(&b) {
                neigh[a].push(b);
            }
            if !neigh[b].contains(&a) {
                neigh[b].push(a);
            }
        }
    };
    for &b in &f.order {
        let mut live_now: Vec<VReg> = live
            .live_out(b)
            .iter()
            .map(VReg::new)
            .filter(|&v| f.vregs[v].class == class)
            .collect();
        for &i in f.blocks[b].insts.iter().rev() {
            let inst = &f.insts[i];
            for &d in &inst.outs {
                if f.vregs[d].class != class {
                    continue;
                }
                for &l in &live_now {
                    // A copy's source and destination may share a register.
                    if inst.op == MachOp::Copy && inst.ins.first() == Some(&l) {
                        continue;
                    }
                    add(d, l, &mut neigh);
                }
            }
            for &d in &inst.outs {
                live_now.retain(|&v| v != d);
            }
            for &u in &inst.ins {
                if f.vregs[u].class == class && !live_now.contains(&u) {
                    live_now.push(u);
                }
            }
        }
    }
    neigh
}

/// Estimate spill costs: uses weighted by loop depth.
fn estimate_spill_costs(f: &mut MachFunction) {
    let mut cost: SecondaryMap<VReg, f32> = SecondaryMap::new();
    for &b in &f.order {
        let weight = 5f32.powi(f.blocks[b].loop_depth.min(4) as i32);
        for &i in &f.blocks[b].insts {
            for &v in f.insts[i].ins.iter().chain(&f.insts[i].outs) {
                cost[v] += weight;
            }
        }
    }
    for (v, data) in f.vregs.iter_mut() {
        data.spill_cost = cost[v].max(1.0);
    }
}

/// Collect affinity edges of one class from copies.
fn collect_affinities(env: &Env) -> Vec<AffEdge> {
    let mut edges = Vec::new();
    for data in env.f.insts.values() {
        if data.op != MachOp::Copy {
            continue;
        }
        let (Some(&src), Some(&dst)) = (data.ins.first(), data.outs.first()) else {
            continue;
        };
        if env.f.vregs[src].class != env.class || env.f.vregs[dst].class != env.class {
            continue;
        }
        if env.interferes(src, dst) {
            continue;
        }
        let saved = env.f.vregs[src].spill_cost + env.f.vregs[dst].spill_cost;
        // Affinity neighbours that interfere with the other endpoint damp
        // the edge: satisfying it is less likely to pay off.
        let mut damp = 0usize;
        for &n in env.neigh[src].iter().chain(&env.neigh[dst]) {
            if env.interferes(n, src) && env.interferes(n, dst) {
                damp += 1;
            }
        }
        edges.push(AffEdge {
            a: src,
            b: dst,
            cost: saved / (1.0 + damp as f32),
        });
    }
    edges
}

/// Greedy chunk construction: merge affinity endpoints unless that puts
/// interfering values into one chunk.
fn build_chunks(env: &mut Env, members: &[VReg]) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for &v in members {
        let id = chunks.len() as u32;
        let mut interfere = BitSet::new();
        for &n in &env.neigh[v] {
            interfere.insert(n.index());
        }
        chunks.push(Chunk {
            id,
            nodes: vec![v],
            interfere,
            weight: 0.0,
        });
        env.chunk_of[v] = id;
    }

    let mut order: Vec<usize> = (0..env.edges.len()).collect();
    order.sort_by(|&x, &y| env.edges[y].cost.total_cmp(&env.edges[x].cost));
    for ei in order {
        let (a, b) = (env.edges[ei].a, env.edges[ei].b);
        let (ca, cb) = (env.chunk_of[a], env.chunk_of[b]);
        if ca == cb {
            continue;
        }
        // Would any member of b's chunk interfere with a's chunk?
        let cbn = chunks[cb as usize].nodes.clone();
        if cbn.iter().any(|&n| chunks[ca as usize].interfere.contains(n.index())) {
            continue;
        }
        let other = std::mem::take(&mut chunks[cb as usize]);
        for &n in &other.nodes {
            env.chunk_of[n] = ca;
        }
        let target = &mut chunks[ca as usize];
        target.nodes.extend_from_slice(&other.nodes);
        target.interfere.union_with(&other.interfere);
    }

    let mut out: Vec<Chunk> = chunks.into_iter().filter(|c| !c.nodes.is_empty()).collect();
    for c in &mut out {
        c.weight = chunk_weight(env, c);
    }
    out
}

/// The weight of a chunk: the affinity costs it can still satisfy.
fn chunk_weight(env: &Env, c: &Chunk) -> f32 {
    env.edges
        .iter()
        .filter(|e| env.chunk_of[e.a] == c.id && env.chunk_of[e.b] == c.id)
        .map(|e| e.cost)
        .sum::<f32>()
        + c.nodes.len() as f32
}

/// Try to move `v` to `c`, recursively pushing interfering neighbours to
/// other colors. All tentative moves land on `changed`.
fn change_node_color(
    env: &mut Env,
    v: VReg,
    c: u8,
    changed: &mut Vec<(VReg, Option<u8>)>,
    depth: usize,
) -> bool {
    if env.col[v] == Some(c) {
        return true;
    }
    if env.fixed[v] || !env.admissible(v, c) || depth > MAX_RECOLOR_DEPTH {
        return false;
    }
    let undo_mark = changed.len();
    changed.push((v, env.col[v]));
    env.col[v] = Some(c);

    let conflicting: Vec<VReg> = env.neigh[v]
        .iter()
        .copied()
        .filter(|&n| env.col[n] == Some(c))
        .collect();
    for n in conflicting {
        if !recolor_node(env, n, c, changed, depth + 1) {
            // Roll back everything from this attempt.
            for &(u, old) in changed[undo_mark..].iter().rev() {
                env.col[u] = old;
            }
            changed.truncate(undo_mark);
            return false;
        }
    }
    true
}

/// Find a different color for `n`, cheapest conflicts first.
fn recolor_node(
    env: &mut Env,
    n: VReg,
    exclude: u8,
    changed: &mut Vec<(VReg, Option<u8>)>,
    depth: usize,
) -> bool {
    if env.fixed[n] {
        return false;
    }
    // Cost per candidate color: occupied neighbours; inadmissible is
    // infinite.
    let mut costs: Vec<(u8, usize)> = Vec::new();
    for c in 0..env.colors {
        if c == exclude || !env.admissible(n, c) {
            continue;
        }
        let occupied = env.neigh[n]
            .iter()
            .filter(|&&m| env.col[m] == Some(c))
            .count();
        costs.push((c, occupied));
    }
    costs.sort_by_key(|&(_, occ)| occ);
    for (c, _) in costs {
        if change_node_color(env, n, c, changed, depth) {
            return true;
        }
    }
    false
}

#[derive(PartialEq)]
struct QueueEntry {
    weight: f32,
    slot: usize,
    stamp: u64,
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then(self.slot.cmp(&other.slot))
    }
}

fn color_class(f: &mut MachFunction, class: RegClass) -> Vec<VReg> {
    let colors = class.colors(f.target);
    let live = Liveness::compute(f);
    let neigh = build_interference(f, &live, class);
    let members: Vec<VReg> = f
        .vregs
        .keys()
        .filter(|&v| f.vregs[v].class == class)
        .collect();
    if members.is_empty() {
        return Vec::new();
    }

    let mut env = Env {
        f,
        class,
        colors,
        neigh,
        col: SecondaryMap::new(),
        fixed: SecondaryMap::new(),
        chunk_of: SecondaryMap::new(),
        edges: Vec::new(),
    };
    env.edges = collect_affinities(&env);
    let mut chunks = build_chunks(&mut env, &members);

    let mut queue: BinaryHeap<QueueEntry> = BinaryHeap::new();
    let mut stamps: Vec<u64> = vec![0; chunks.len()];
    let mut stamp = 0u64;
    for (slot, c) in chunks.iter().enumerate() {
        queue.push(QueueEntry {
            weight: c.weight,
            slot,
            stamp: 0,
        });
    }

    let mut spill: Vec<VReg> = Vec::new();
    while let Some(entry) = queue.pop() {
        if stamps[entry.slot] != entry.stamp {
            continue; // stale weight
        }
        let chunk = chunks[entry.slot].clone();
        let loose: Vec<VReg> = chunk.nodes.iter().copied().filter(|&v| !env.fixed[v]).collect();
        if loose.is_empty() {
            continue;
        }

        // Try every admissible color; keep the best-satisfied fragment.
        let mut best: Option<(u8, Vec<VReg>)> = None;
        for c in 0..colors {
            let mut changed: Vec<(VReg, Option<u8>)> = Vec::new();
            let mut accepted: Vec<VReg> = Vec::new();
            for &v in &loose {
                if change_node_color(&mut env, v, c, &mut changed, 0) {
                    accepted.push(v);
                }
            }
            let better = match &best {
                None => !accepted.is_empty(),
                Some((_, prev)) => accepted.len() > prev.len(),
            };
            if better {
                best = Some((c, accepted));
            }
            // Tentative moves are rolled back; the winner is re-applied.
            for &(u, old) in changed.iter().rev() {
                env.col[u] = old;
            }
        }

        match best {
            Some((c, fragment)) => {
                let mut changed: Vec<(VReg, Option<u8>)> = Vec::new();
                let mut committed = Vec::new();
                for &v in &fragment {
                    if change_node_color(&mut env, v, c, &mut changed, 0) {
                        committed.push(v);
                    }
                }
                // Materialize: the fragment is fixed at its color.
                for &v in &committed {
                    env.fixed[v] = true;
                }
                log::trace!(
                    "chunk {}: fixed {} of {} nodes at color {}",
                    chunk.id,
                    committed.len(),
                    chunk.nodes.len(),
                    c
                );
                let rest: Vec<VReg> = loose
                    .into_iter()
                    .filter(|v| !committed.contains(v))
                    .collect();
                if !rest.is_empty() {
                    chunks[entry.slot].nodes = rest;
                    let w = chunk_weight(&env, &chunks[entry.slot]);
                    chunks[entry.slot].weight = w;
                    stamp += 1;
                    stamps[entry.slot] = stamp;
                    queue.push(QueueEntry {
                        weight: w,
                        slot: entry.slot,
                        stamp,
                    });
                }
            }
            None => {
                // No color took a single node: everything here needs the
                // spiller.
                spill.extend(loose);
            }
        }
    }

    // Fall back to any free color for nodes that stayed loose, then write
    // the assignment back.
    for &v in &members {
        if env.col[v].is_none() && !spill.contains(&v) {
            let found = (0..colors).find(|&c| {
                env.admissible(v, c) && !env.neigh[v].iter().any(|&n| env.col[n] == Some(c))
            });
            match found {
                Some(c) => env.col[v] = Some(c),
                None => spill.push(v),
            }
        }
    }
    for &v in &members {
        if let Some(c) = env.col[v] {
            env.f.vregs[v].reg = Some(c);
        }
    }
    spill
}

/// Allocate registers for every class of `f`.
pub fn allocate(f: &mut MachFunction) -> AllocOutcome {
    estimate_spill_costs(f);

    let mut spill = Vec::new();
    spill.extend(color_class(f, RegClass::Gp));
    spill.extend(color_class(f, RegClass::Fp));
    // The flag register is architectural; everything shares it.
    let flags: Vec<VReg> = f
        .vregs
        .keys()
        .filter(|&v| f.vregs[v].class == RegClass::Flags)
        .collect();
    for v in flags {
        f.vregs[v].reg = Some(0);
    }

    if spill.is_empty() {
        AllocOutcome::Done
    } else {
        log::debug!("allocation needs spills: {} values", spill.len());
        AllocOutcome::NeedsSpill(spill)
    }
}

/// Check a finished allocation: interfering values never share a register
/// and every assignment is admissible.
pub fn verify_allocation(f: &MachFunction) -> bool {
    let live = Liveness::compute(f);
    for class in [RegClass::Gp, RegClass::Fp] {
        let neigh = build_interference(f, &live, class);
        for v in f.vregs.keys() {
            if f.vregs[v].class != class {
                continue;
            }
            let Some(c) = f.vregs[v].reg else {
                return false;
            };
            if f.vregs[v].admissible & (1 << c) == 0 {
                return false;
            }
            for &n in &neigh[v] {
                if f.vregs[n].reg == Some(c) {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::{MInstData, Target};

    /// Scenario: two non-interfering values joined by one affinity edge,
    /// both admissible for colors {0, 1}: they land in one chunk and share
    /// color 0.
    #[test]
    fn affine_pair_shares_a_color() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let a = f.new_vreg(RegClass::Gp);
        let bb = f.new_vreg(RegClass::Gp);
        f.vregs[a].admissible = 0b11;
        f.vregs[bb].admissible = 0b11;
        f.push_inst(b, MInstData::new(MachOp::MovImm).with_outs(&[a]).with_imm(7));
        f.push_inst(b, MInstData::new(MachOp::Copy).with_ins(&[a]).with_outs(&[bb]));
        f.push_inst(b, MInstData::new(MachOp::Ret).with_ins(&[bb]));

        assert_eq!(allocate(&mut f), AllocOutcome::Done);
        assert_eq!(f.vregs[a].reg, f.vregs[bb].reg);
        assert!(f.vregs[a].reg == Some(0) || f.vregs[a].reg == Some(1));
        assert!(verify_allocation(&f));
    }

    /// Interfering values get distinct registers.
    #[test]
    fn interference_respected() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let x = f.new_vreg(RegClass::Gp);
        let y = f.new_vreg(RegClass::Gp);
        let z = f.new_vreg(RegClass::Gp);
        f.push_inst(b, MInstData::new(MachOp::MovImm).with_outs(&[x]).with_imm(1));
        f.push_inst(b, MInstData::new(MachOp::MovImm).with_outs(&[y]).with_imm(2));
        f.push_inst(b, MInstData::new(MachOp::Add).with_ins(&[x, y]).with_outs(&[z]));
        f.push_inst(b, MInstData::new(MachOp::Ret).with_ins(&[z]));

        assert_eq!(allocate(&mut f), AllocOutcome::Done);
        assert_ne!(f.vregs[x].reg, f.vregs[y].reg);
        assert!(verify_allocation(&f));
    }

    /// A singleton with an empty admissible set is reported for spilling.
    #[test]
    fn uncolorable_singleton_reports_spill() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let x = f.new_vreg(RegClass::Gp);
        f.vregs[x].admissible = 0;
        f.push_inst(b, MInstData::new(MachOp::MovImm).with_outs(&[x]).with_imm(1));
        f.push_inst(b, MInstData::new(MachOp::Ret).with_ins(&[x]));

        match allocate(&mut f) {
            AllocOutcome::NeedsSpill(list) => assert_eq!(list, vec![x]),
            AllocOutcome::Done => panic!("expected a spill report"),
        }
    }
}
