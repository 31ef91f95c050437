//! The IR verifier: on-demand structural invariant checking.
//!
//! Checks every reachable node against its opcode schema: admissible modes
//! on every input, fixed arities respected, Phi arity matching the block's
//! predecessor count, blocks fed only by control edges. A failed check is a
//! compiler bug; callers normally abort via [`assert_verify`].

use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::mode::{self, Mode};
use crate::ir::opcode::{Arity, Op};
use crate::result::{FirmError, FirmResult};

fn err(node: Node, message: impl Into<String>) -> FirmError {
    FirmError::Verifier {
        node,
        message: message.into(),
    }
}

fn check_mode(g: &Graph, n: Node, expected: Mode) -> FirmResult<()> {
    if g.mode(n) != expected {
        return Err(err(
            n,
            format!("expected mode {}, found {}", expected, g.mode(n)),
        ));
    }
    Ok(())
}

fn check_node(g: &Graph, n: Node) -> FirmResult<()> {
    let op = g.op(n);

    // Arity schema.
    if let Arity::Fixed(want) = op.arity() {
        if g.arity(n) != want {
            return Err(err(
                n,
                format!("{} expects {} inputs, has {}", op.name(), want, g.arity(n)),
            ));
        }
    }

    // Block membership: every non-block node lives in a Block (or Bad).
    if op != Op::Block {
        let b = g.block_of(n);
        if g.op(b) != Op::Block && g.op(b) != Op::Bad {
            return Err(err(n, "node's block attribute is not a Block"));
        }
    }

    match op {
        Op::Block => {
            for i in 0..g.arity(n) {
                let pred = g.in_at(n, i);
                if g.mode(pred) != mode::X && g.op(pred) != Op::Bad {
                    return Err(err(
                        n,
                        format!("block predecessor {} is not a control edge", pred),
                    ));
                }
            }
            check_mode(g, n, mode::BB)
        }
        Op::Phi => {
            let b = g.block_of(n);
            if g.is_matured(b) && g.arity(n) != g.arity(b) {
                return Err(err(
                    n,
                    format!(
                        "Phi arity {} does not match block arity {}",
                        g.arity(n),
                        g.arity(b)
                    ),
                ));
            }
            for i in 0..g.arity(n) {
                let input = g.in_at(n, i);
                if g.op(input) != Op::Bad && g.op(input) != Op::Unknown {
                    check_mode(g, input, g.mode(n))?;
                }
            }
            Ok(())
        }
        _ if op.is_binop() => {
            let m = g.mode(n);
            check_mode(g, g.in_at(n, 0), m)?;
            match op {
                // Shift counts may use any integer mode.
                Op::Shl | Op::Shr | Op::Shrs | Op::Rotl => {
                    if !g.mode(g.in_at(n, 1)).is_int() {
                        return Err(err(n, "shift count must be an integer"));
                    }
                    Ok(())
                }
                _ => check_mode(g, g.in_at(n, 1), m),
            }
        }
        Op::Cmp => {
            let l = g.in_at(n, 0);
            let r = g.in_at(n, 1);
            if g.mode(l) != g.mode(r) {
                return Err(err(n, "Cmp operands must share a mode"));
            }
            if !g.mode(l).is_datab() {
                return Err(err(n, "Cmp operands must be data"));
            }
            check_mode(g, n, mode::B)
        }
        Op::Conv => {
            let from = g.mode(g.in_at(n, 0));
            if !from.is_conv_legal(g.mode(n)) {
                return Err(err(
                    n,
                    format!("illegal Conv from {} to {}", from, g.mode(n)),
                ));
            }
            Ok(())
        }
        Op::Minus | Op::Abs | Op::Not => check_mode(g, g.in_at(n, 0), g.mode(n)),
        Op::Cond => {
            check_mode(g, g.in_at(n, 0), mode::B)?;
            check_mode(g, n, mode::T)
        }
        Op::Jmp => check_mode(g, n, mode::X),
        Op::Return | Op::Raise => {
            check_mode(g, g.in_at(n, 0), mode::M)?;
            check_mode(g, n, mode::X)
        }
        Op::Load => {
            check_mode(g, g.in_at(n, 0), mode::M)?;
            check_mode(g, g.in_at(n, 1), mode::P)?;
            check_mode(g, n, mode::T)
        }
        Op::Store => {
            check_mode(g, g.in_at(n, 0), mode::M)?;
            check_mode(g, g.in_at(n, 1), mode::P)?;
            if !g.mode(g.in_at(n, 2)).is_datab() {
                return Err(err(n, "stored value must be data"));
            }
            check_mode(g, n, mode::T)
        }
        Op::Div | Op::Mod => {
            check_mode(g, g.in_at(n, 0), mode::M)?;
            let l = g.in_at(n, 1);
            let r = g.in_at(n, 2);
            if g.mode(l) != g.mode(r) || !g.mode(l).is_num() {
                return Err(err(n, "division operands must share a numeric mode"));
            }
            check_mode(g, n, mode::T)
        }
        Op::Call => {
            check_mode(g, g.in_at(n, 0), mode::M)?;
            check_mode(g, g.in_at(n, 1), mode::P)?;
            check_mode(g, n, mode::T)
        }
        Op::Sync => {
            for i in 0..g.arity(n) {
                check_mode(g, g.in_at(n, i), mode::M)?;
            }
            check_mode(g, n, mode::M)
        }
        Op::Sel => {
            check_mode(g, g.in_at(n, 0), mode::P)?;
            check_mode(g, n, mode::P)
        }
        Op::Proj => {
            let pred = g.in_at(n, 0);
            if g.mode(pred) != mode::T {
                return Err(err(n, "Proj predecessor must be a tuple"));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Verify every reachable node of `g`.
pub fn verify_graph(g: &mut Graph) -> FirmResult<()> {
    let order = g.reachable_postorder();
    for n in order {
        if g.op(n) == Op::Id {
            continue;
        }
        check_node(g, n)?;
    }
    Ok(())
}

/// Verify and abort on failure. Structural corruption is not recoverable.
pub fn assert_verify(g: &mut Graph) {
    if let Err(e) = verify_graph(g) {
        panic!("IR verification failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::Attr;
    use crate::ir::tarval::Tarval;

    #[test]
    fn fresh_graph_verifies() {
        let mut g = Graph::new(None);
        g.finalize_construction().unwrap();
        assert!(verify_graph(&mut g).is_ok());
    }

    #[test]
    fn mode_mismatch_detected() {
        let mut g = Graph::new(None);
        let a = g.new_const(Tarval::new_int(mode::IS, 1));
        let b = g.new_const(Tarval::new_int(mode::LS, 2));
        let block = g.start_block();
        // Bypass the optimizing constructors to build a broken node.
        let add = g.add_raw(Op::Add, mode::IS, Some(block), &[a, b], Attr::None);
        g.keep_alive(add);
        assert!(matches!(
            verify_graph(&mut g),
            Err(FirmError::Verifier { .. })
        ));
    }

    #[test]
    fn phi_arity_mismatch_detected() {
        let mut g = Graph::new(None);
        let j1 = g.new_jmp(g.start_block());
        let b = g.new_block(&[j1]);
        let c = g.new_const(Tarval::new_int(mode::IS, 1));
        let phi = g.add_raw(Op::Phi, mode::IS, Some(b), &[c, c], Attr::None);
        g.keep_alive(phi);
        assert!(matches!(
            verify_graph(&mut g),
            Err(FirmError::Verifier { .. })
        ));
    }
}
