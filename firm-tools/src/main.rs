//! Reference command-line driver: builds a translation unit, runs the
//! optimization pipeline, and prints GNU-assembler output for the selected
//! target.
//!
//! Frontend parsers are external collaborators; this driver carries a
//! built-in demonstration unit (an accumulation loop) exercising SSA
//! construction, the scalar optimizations and a full backend run.
//!
//! Exit codes: 0 on success, 1 on a compile error, 2 on an internal error.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use firm_codegen::be::sparc::SparcCpu;
use firm_codegen::be::{ia32, regalloc, sparc, transform, Target};
use firm_codegen::flags::OptFlags;
use firm_codegen::ir::node::pn;
use firm_codegen::ir::tarval::{Relation, Tarval};
use firm_codegen::ir::verify::assert_verify;
use firm_codegen::ir::{mode, Program};
use firm_codegen::opt;
use firm_frontend::GraphBuilder;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "firm-util", about = "Translate one unit to assembly")]
struct Args {
    /// Code generation target.
    #[arg(long, default_value = "ia32", value_parser = parse_target)]
    target: Target,

    /// Optimization level (0, 1 or 2).
    #[arg(short = 'O', default_value_t = 2)]
    opt_level: u8,

    /// Avoid hardware floating point.
    #[arg(long = "msoft-float")]
    soft_float: bool,

    /// SPARC processor selection.
    #[arg(long = "mcpu")]
    mcpu: Option<String>,

    /// Hoist FPU control-word spills to the function entry.
    #[arg(long = "use-unsafe-floatconv")]
    unsafe_floatconv: bool,

    /// Write assembly here instead of stdout.
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Annotate the assembly with back-references.
    #[arg(long)]
    verbose_asm: bool,
}

fn parse_target(s: &str) -> Result<Target, String> {
    match s {
        "ia32" => Ok(Target::Ia32),
        "sparc" => Ok(Target::Sparc),
        "arm" => Ok(Target::Arm),
        _ => Err(format!("unknown target '{}'", s)),
    }
}

/// Build the demonstration unit:
/// `int checksum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i * 5; return s; }`
fn build_demo(prog: &mut Program, opt: OptFlags) -> Result<firm_codegen::ir::GraphRef> {
    let int_ty = prog.types.new_primitive(mode::IS);
    let (_ent, graph_ref) =
        prog.new_method_graph("checksum", vec![int_ty], vec![int_ty])?;
    let g = prog.graph_mut(graph_ref);
    g.opt = opt;

    let mut b = GraphBuilder::new(g);
    let s_var = b.new_var();
    let i_var = b.new_var();

    let entry = b.cur_block();
    let args = b.graph().args();
    let n = b.graph().new_proj(args, 0, mode::IS);
    let zero = b.graph().new_const(Tarval::new_int(mode::IS, 0));
    b.set_value(s_var, zero);
    b.set_value(i_var, zero);
    let j0 = b.graph().new_jmp(entry);

    let header = b.new_block();
    b.add_pred(header, j0)?;
    b.set_cur_block(header);
    let i_cur = b.get_value(i_var, mode::IS);
    let cmp = b.graph().new_cmp(header, i_cur, n, Relation::LESS);
    let cond = b.graph().new_cond(header, cmp);
    let pt = b.graph().new_proj(cond, pn::cond::TRUE, mode::X);
    let pf = b.graph().new_proj(cond, pn::cond::FALSE, mode::X);

    let body = b.new_block();
    b.add_pred(body, pt)?;
    b.mature_block(body)?;
    b.set_cur_block(body);
    let five = b.graph().new_const(Tarval::new_int(mode::IS, 5));
    let i_body = b.get_value(i_var, mode::IS);
    let scaled = b.graph().new_mul(body, i_body, five, mode::IS);
    let s_cur = b.get_value(s_var, mode::IS);
    let s_next = b.graph().new_add(body, s_cur, scaled, mode::IS);
    b.set_value(s_var, s_next);
    let one = b.graph().new_const(Tarval::new_int(mode::IS, 1));
    let i_next = b.graph().new_add(body, i_body, one, mode::IS);
    b.set_value(i_var, i_next);
    let jb = b.graph().new_jmp(body);
    b.add_pred(header, jb)?;
    b.mature_block(header)?;

    let exit = b.new_block();
    b.add_pred(exit, pf)?;
    b.mature_block(exit)?;
    b.set_cur_block(exit);
    let result = b.get_value(s_var, mode::IS);
    let mem = b.get_store();
    let ret = b.graph().new_return(exit, mem, &[result]);
    let end_block = b.graph().end_block();
    b.graph().add_block_pred(end_block, ret)?;
    b.finalize()?;
    Ok(graph_ref)
}

fn run(args: &Args) -> Result<String> {
    let opt = OptFlags::for_level(args.opt_level);
    let mut prog = Program::new();
    let graph_ref = build_demo(&mut prog, opt).context("building the unit")?;

    {
        let g = prog.graph_mut(graph_ref);
        assert_verify(g);
        if opt.contains(OptFlags::CONST_FOLD) {
            opt::local::optimize_graph(g);
        }
        if opt.contains(OptFlags::LDST) {
            opt::ldst::optimize_load_store(g);
        }
        if opt.contains(OptFlags::OSR) {
            opt::osr::optimize_osr(g);
            opt::osr::remove_phi_cycles(g);
        }
        if opt.contains(OptFlags::PLACEMENT) {
            opt::placement::place_code(g);
        }
        if opt.contains(OptFlags::DEAD_CODE) {
            opt::dce::dead_node_elimination(g);
        }
        assert_verify(g);
    }

    let name = {
        let ent = prog.graph(graph_ref).entity.ok_or_else(|| anyhow!("graph has no entity"))?;
        prog.types.entity_name(ent).to_string()
    };
    let types = std::mem::take(&mut prog.types);
    let g = prog.graph_mut(graph_ref);
    let mut mach = transform::transform_graph(g, &types, &name, args.target)
        .map_err(|e| anyhow!("transform: {}", e))?;

    match regalloc::allocate(&mut mach) {
        regalloc::AllocOutcome::Done => {}
        regalloc::AllocOutcome::NeedsSpill(values) => {
            return Err(anyhow!(
                "register allocation needs spills for {} values and no spill handler is installed",
                values.len()
            ));
        }
    }

    let asm = match args.target {
        Target::Ia32 => {
            if !args.soft_float {
                ia32::x87::run(&mut mach, args.unsafe_floatconv);
            }
            ia32::emit::emit_function(&mach, args.verbose_asm)
        }
        Target::Sparc => {
            let cpu = match &args.mcpu {
                Some(s) => SparcCpu::parse(s)
                    .ok_or_else(|| anyhow!("unknown -mcpu '{}'", s))?,
                None => SparcCpu::default(),
            };
            sparc::emit::emit_function(&mut mach, cpu, args.verbose_asm)
        }
        Target::Arm => return Err(anyhow!("the arm backend is not built in")),
    };
    Ok(asm)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let outcome = std::panic::catch_unwind(|| run(&args));
    match outcome {
        Ok(Ok(asm)) => {
            let result = match &args.output {
                Some(path) => std::fs::write(path, asm).map_err(|e| anyhow!(e)),
                None => std::io::stdout()
                    .write_all(asm.as_bytes())
                    .map_err(|e| anyhow!(e)),
            };
            if let Err(e) = result {
                eprintln!("firm-util: {}", e);
                std::process::exit(1);
            }
        }
        Ok(Err(e)) => {
            eprintln!("firm-util: {:#}", e);
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("firm-util: internal error");
            std::process::exit(2);
        }
    }
}
