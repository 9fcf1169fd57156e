use crate::ir::{
    BasicBlock, Definition, Ident, Instr, Module, Stmt, Symbol, Type, TypedValue, Value,
};
use crate::ir_reader::read_module;

#[cfg(test)]
use crate::errors::TranslationError;
#[cfg(test)]
use crate::ir::Declaration;

#[cfg(test)]
use crate::cfg::{Atom, Block, Cfg, Expr, Label, Literal, RegId, TargetStmt, Terminator};
#[cfg(test)]
use crate::module_translator::{
    translate_module_with_config, ConstantGlobalInitBuilder, ModuleTranslation,
};
#[cfg(test)]
use crate::source_location::Position;
#[cfg(test)]
use crate::structuring::JumpGraphStructurer;
#[cfg(test)]
use crate::translation_config::TranslationConfig;
#[cfg(test)]
use crate::types::StandardTypeLifter;

/// Two loop-carried values exchanged on every iteration. The back edge must assign both phi
/// registers simultaneously.
pub const SWAP_LOOP: &str = r#"
define i32 @swap(i32 %a, i32 %b, i32 %n) {
entry:
  br label %loop

loop:
  %x = phi i32 [ %a, %entry ], [ %y, %loop ]
  %y = phi i32 [ %b, %entry ], [ %x, %loop ]
  %i = phi i32 [ 0, %entry ], [ %next, %loop ]
  %next = add nsw i32 %i, 1
  %again = icmp slt i32 %next, %n
  br i1 %again, label %loop, label %exit

exit:
  ret i32 %x
}
"#;

/// A variable whose declaration appears in a later block than its allocation, and another
/// declared through a reinterpreting cast.
pub const DEBUG_VARIABLES: &str = r#"
source_filename = "vars.c"

define void @vars() !dbg !2 {
entry:
  %p = alloca i32, align 4
  %w = alloca i64, align 8
  %q = bitcast ptr %w to ptr
  store i32 1, ptr %p, align 4, !dbg !8
  br label %body

body:
  call void @llvm.dbg.declare(metadata ptr %p, metadata !5, metadata !DIExpression()), !dbg !7
  call void @llvm.dbg.declare(metadata ptr %q, metadata !6, metadata !DIExpression(DW_OP_LLVM_fragment, 0, 32)), !dbg !7
  ret void
}

!1 = !DIFile(filename: "vars.c", directory: "/src")
!2 = distinct !DISubprogram(name: "vars", scope: !1, file: !1, line: 1, spFlags: DISPFlagDefinition)
!3 = !DILexicalBlock(scope: !2, file: !1, line: 2, column: 3)
!5 = !DILocalVariable(name: "x", scope: !2, file: !1, line: 2, type: !9)
!6 = !DILocalVariable(name: "wide", scope: !3, file: !1, line: 3, type: !9)
!7 = !DILocation(line: 2, column: 7, scope: !2)
!8 = !DILocation(line: 4, column: 5, scope: !3)
!9 = !DIBasicType(name: "int", size: 32, encoding: DW_ATE_signed)
"#;

/// Statements with and without locations, over two blocks
pub const CARRIED_LOCATIONS: &str = r#"
define i32 @carry(i32 %v) !dbg !2 {
entry:
  %a = add i32 %v, 1, !dbg !5
  %b = mul i32 %a, 2
  br label %next

next:
  %c = sub i32 %b, 3
  %d = xor i32 %c, 4, !dbg !6
  ret i32 %d
}

!1 = !DIFile(filename: "/abs/carry.c", directory: "/ignored")
!2 = distinct !DISubprogram(name: "carry", scope: !1, file: !1, line: 1)
!5 = !DILocation(line: 10, column: 2, scope: !2)
!6 = !DILocation(line: 11, column: 4, scope: !2)
"#;

/// Calls between definitions and declarations, a switch, and initialized globals
pub const SMALL_PROGRAM: &str = r#"
source_filename = "small.c"

@counter = dso_local global i32 7, align 4
@callback = dso_local global ptr @pick, align 8
@name = private unnamed_addr constant [6 x i8] c"small\00", align 1
@ext = external global i32

declare i32 @puts(ptr noundef) #1
declare i32 @pick(i32 noundef)

define dso_local i32 @pick(i32 noundef %0) #0 {
  switch i32 %0, label %3 [
    i32 0, label %2
    i32 1, label %2
  ]

2:
  ret i32 10

3:
  %4 = call i32 @puts(ptr noundef @name)
  ret i32 %4
}

define dso_local i32 @main() #0 {
  %1 = load i32, ptr @counter, align 4
  %2 = call i32 @pick(i32 noundef %1)
  %3 = load ptr, ptr @callback, align 8
  %4 = call i32 %3(i32 noundef %2)
  ret i32 %4
}

attributes #0 = { noinline nounwind "frame-pointer"="all" }
"#;

/// Declarations that appear before the statements they describe: one in an earlier block than
/// its allocation, and one ahead of both the allocation and the cast it names.
pub const EARLY_DECLARATIONS: &str = r#"
define void @early() !dbg !2 {
entry:
  call void @llvm.dbg.declare(metadata ptr %slot, metadata !5, metadata !DIExpression()), !dbg !7
  call void @llvm.dbg.declare(metadata ptr %view, metadata !6, metadata !DIExpression()), !dbg !7
  br label %storage

storage:
  %slot = alloca i32, align 4
  %wide = alloca i64, align 8
  %view = bitcast ptr %wide to ptr
  store i32 3, ptr %slot, align 4, !dbg !8
  ret void
}

!1 = !DIFile(filename: "early.c", directory: "/src")
!2 = distinct !DISubprogram(name: "early", scope: !1, file: !1, line: 1)
!5 = !DILocalVariable(name: "slot", scope: !2, file: !1, line: 2, type: !9)
!6 = !DILocalVariable(name: "wide", scope: !2, file: !1, line: 3, type: !9)
!7 = !DILocation(line: 2, column: 3, scope: !2)
!8 = !DILocation(line: 5, column: 1, scope: !2)
!9 = !DIBasicType(name: "int", size: 32, encoding: DW_ATE_signed)
"#;

/// A declaration whose parameter type has no known layout
pub const OPAQUE_PARAMETER: &str = r#"
%struct.hidden = type opaque

declare void @consume(%struct.hidden)

define i32 @main() {
entry:
  ret i32 0
}
"#;

/// A call to a routine that is neither declared nor defined
pub const UNDECLARED_CALLEE: &str = r#"
define i32 @main() {
entry:
  %r = call i32 @missing(i32 1)
  ret i32 %r
}
"#;

pub fn swap_loop() -> Module {
    read_module(SWAP_LOOP).unwrap()
}

pub fn debug_variables() -> Module {
    read_module(DEBUG_VARIABLES).unwrap()
}

pub fn carried_locations() -> Module {
    read_module(CARRIED_LOCATIONS).unwrap()
}

pub fn small_program() -> Module {
    read_module(SMALL_PROGRAM).unwrap()
}

pub fn early_declarations() -> Module {
    read_module(EARLY_DECLARATIONS).unwrap()
}

pub fn opaque_parameter() -> Module {
    read_module(OPAQUE_PARAMETER).unwrap()
}

pub fn undeclared_callee() -> Module {
    read_module(UNDECLARED_CALLEE).unwrap()
}

fn i32_value(v: Value) -> TypedValue {
    TypedValue::new(Type::Int(32), v)
}

/// A module with a single definition `@f(i32 %arg)` with the given body
pub fn single_routine(blocks: Vec<BasicBlock>) -> Module {
    Module {
        definitions: vec![Definition {
            symbol: Symbol::from("f"),
            params: vec![(Type::Int(32), Ident::from("arg"))],
            ret: Type::Int(32),
            varargs: false,
            blocks,
        }],
        ..Default::default()
    }
}

/// `%x` assigned twice
pub fn double_assignment() -> Module {
    let add = || Instr::Binary {
        op: crate::ir::BinOp::Add,
        lhs: i32_value(Value::Ident(Ident::from("arg"))),
        rhs: Value::Int(1),
    };
    single_routine(vec![BasicBlock::new(
        "entry",
        vec![
            Stmt::define("x", add()),
            Stmt::define("x", add()),
            Stmt::effect(Instr::Ret(Some(i32_value(Value::Ident(Ident::from("x")))))),
        ],
    )])
}

#[cfg(test)]
fn translate_with(
    module: &Module,
    config: &TranslationConfig,
) -> Result<ModuleTranslation, TranslationError> {
    let lifter = StandardTypeLifter::for_module(module);
    translate_module_with_config(
        module,
        &lifter,
        &JumpGraphStructurer,
        &ConstantGlobalInitBuilder,
        config,
    )
}

#[cfg(test)]
fn translate(module: &Module) -> Result<ModuleTranslation, TranslationError> {
    translate_with(module, &TranslationConfig::default())
}

#[cfg(test)]
fn source_block<'a>(cfg: &'a Cfg, label: &str) -> &'a Block {
    let label = Ident::from(label);
    cfg.blocks
        .iter()
        .find(|b| b.source_label.as_ref() == Some(&label))
        .unwrap()
}

/// Run a sequence of register copies over a register file
#[cfg(test)]
fn run_copies(
    stmts: &[crate::cfg::Posd<TargetStmt>],
    regs: &mut std::collections::HashMap<RegId, i64>,
) {
    for s in stmts {
        match &s.value {
            TargetStmt::Set(dst, Expr::Atom(Atom::Reg(src))) => {
                let v = regs[src];
                regs.insert(*dst, v);
            }
            TargetStmt::Set(dst, Expr::Atom(Atom::Lit(Literal::BitVector { value, .. }))) => {
                regs.insert(*dst, *value as i64);
            }
            s => panic!("not a copy: {:?}", s),
        }
    }
}

/// The registers the routine's arguments are copied into on the way into `cfg`'s first loop
#[cfg(test)]
fn argument_registers(block: &Block) -> Vec<(usize, RegId)> {
    block
        .stmts
        .iter()
        .filter_map(|s| match &s.value {
            TargetStmt::Set(r, Expr::Atom(Atom::Arg(i))) => Some((*i, *r)),
            _ => None,
        })
        .collect()
}

#[test]
fn phi_swap_is_a_parallel_copy() {
    let translation = translate(&swap_loop()).unwrap();
    let cfg = translation.cfg(&Symbol::from("swap")).unwrap();

    let entry = source_block(cfg, "entry");
    let args = argument_registers(entry);
    assert_eq!(args.len(), 2);
    let (x, y) = (args[0].1, args[1].1);
    assert_eq!(args[0].0, 0);
    assert_eq!(args[1].0, 1);

    let loop_block = source_block(cfg, "loop");
    let back_edge = match &loop_block.terminator.value {
        Terminator::Branch { then_label, .. } => cfg.block(*then_label).unwrap(),
        t => panic!("expected a branch, got {:?}", t),
    };
    assert_eq!(back_edge.source_label, None);
    assert_eq!(
        back_edge.terminator.value,
        Terminator::Jump(loop_block.label)
    );

    let mut regs = std::collections::HashMap::new();
    for r in &cfg.registers {
        regs.insert(r.id, -1);
    }
    regs.insert(x, 1);
    regs.insert(y, 2);
    run_copies(&back_edge.stmts, &mut regs);
    assert_eq!(regs[&x], 2);
    assert_eq!(regs[&y], 1);

    // The exit edge carries no phi assignments, so it goes straight to the exit block
    match &loop_block.terminator.value {
        Terminator::Branch { else_label, .. } => assert_eq!(
            cfg.block(*else_label).unwrap().source_label,
            Some(Ident::from("exit"))
        ),
        _ => unreachable!(),
    }
}

#[test]
fn entry_block_is_synthetic_and_unique() {
    for module in [swap_loop(), debug_variables(), carried_locations(), small_program()] {
        let translation = translate(&module).unwrap();
        for (symbol, cfg) in translation.cfg_map().iter() {
            let def = module
                .definitions
                .iter()
                .find(|d| &d.symbol == symbol)
                .unwrap();
            let entry = cfg.entry_block().unwrap();
            assert_eq!(cfg.blocks[0].label, cfg.entry);
            assert!(cfg.predecessors_of(cfg.entry).is_empty());
            assert!(entry.stmts.is_empty());
            assert_eq!(entry.source_label, None);
            assert_eq!(entry.terminator.position, Position::Internal);
            match entry.terminator.value {
                Terminator::Jump(first) => assert_eq!(
                    cfg.block(first).unwrap().source_label,
                    def.blocks[0].label
                ),
                ref t => panic!("entry block ends in {:?}", t),
            }
            for b in &cfg.blocks {
                assert!(!b.successors().contains(&cfg.entry));
            }
        }
    }
}

#[test]
fn double_assignment_is_rejected() {
    assert_eq!(
        translate(&double_assignment()).unwrap_err(),
        TranslationError::DuplicateAssignment {
            symbol: Symbol::from("f"),
            ident: Ident::from("x"),
        }
    );
}

#[test]
fn declared_variables_are_annotated_at_their_allocation() {
    let translation = translate(&debug_variables()).unwrap();
    let cfg = translation.cfg(&Symbol::from("vars")).unwrap();
    let entry = source_block(cfg, "entry");

    fn annotation_after(entry: &Block, alloca_index: usize) -> (RegId, &TargetStmt) {
        let allocated = entry
            .stmts
            .iter()
            .filter_map(|s| match &s.value {
                TargetStmt::Set(r, Expr::Alloca { .. }) => Some(*r),
                _ => None,
            })
            .nth(alloca_index)
            .unwrap();
        let at = entry
            .stmts
            .iter()
            .position(|s| matches!(s.value, TargetStmt::Set(r, _) if r == allocated))
            .unwrap();
        (allocated, &entry.stmts[at + 1].value)
    }

    let (p, annotate) = annotation_after(entry, 0);
    match annotate {
        TargetStmt::Annotate {
            reg,
            name,
            fragment,
            position,
        } => {
            assert_eq!(*reg, p);
            assert_eq!(name, "x");
            assert_eq!(*fragment, None);
            assert_eq!(position.to_string(), "/src/vars.c:2:7");
        }
        s => panic!("expected an annotation, got {:?}", s),
    }

    // Declared through the bitcast `%q`, but annotated on the allocation of `%w`
    let (w, annotate) = annotation_after(entry, 1);
    match annotate {
        TargetStmt::Annotate {
            reg,
            name,
            fragment,
            ..
        } => {
            assert_eq!(*reg, w);
            assert_eq!(name, "wide");
            assert_eq!(*fragment, Some((0, 32)));
        }
        s => panic!("expected an annotation, got {:?}", s),
    }

    // The intrinsic calls themselves are gone
    let body = source_block(cfg, "body");
    assert!(body.stmts.is_empty());
}

#[test]
fn annotations_flow_through_reinterpreting_casts() {
    use crate::debug_metadata::propagate_debug_annotations;

    let module = debug_variables();
    let def = &module.definitions[0];
    let annotations =
        propagate_debug_annotations(def, &module.metadata, &TranslationConfig::default());
    let names = |i: &str| -> Vec<String> {
        annotations
            .get(&Ident::from(i))
            .iter()
            .map(|a| a.name.clone())
            .collect()
    };
    assert_eq!(names("q"), vec!["wide".to_owned()]);
    assert_eq!(names("w"), vec!["wide".to_owned()]);
    assert_eq!(names("p"), vec!["x".to_owned()]);

    let no_casts = TranslationConfig {
        propagate_debug_through_casts: false,
        ..Default::default()
    };
    let annotations = propagate_debug_annotations(def, &module.metadata, &no_casts);
    assert!(annotations.get(&Ident::from("w")).is_empty());
    assert_eq!(annotations.get(&Ident::from("q")).len(), 1);
}

#[test]
fn locations_carry_forward_across_statements_and_blocks() {
    let translation = translate(&carried_locations()).unwrap();
    let cfg = translation.cfg(&Symbol::from("carry")).unwrap();
    let positions = |label: &str| -> Vec<String> {
        let b = source_block(cfg, label);
        b.stmts
            .iter()
            .map(|s| &s.position)
            .chain(std::iter::once(&b.terminator.position))
            .map(|p| p.to_string())
            .collect()
    };
    assert_eq!(
        positions("entry"),
        vec!["/abs/carry.c:10:2", "/abs/carry.c:10:2", "/abs/carry.c:10:2"]
    );
    assert_eq!(
        positions("next"),
        vec!["/abs/carry.c:10:2", "/abs/carry.c:11:4", "/abs/carry.c:11:4"]
    );

    let untracked = TranslationConfig {
        track_source_locations: false,
        ..Default::default()
    };
    let translation = translate_with(&carried_locations(), &untracked).unwrap();
    let cfg = translation.cfg(&Symbol::from("carry")).unwrap();
    assert!(cfg
        .blocks
        .iter()
        .flat_map(|b| b.stmts.iter().map(|s| &s.position))
        .all(|p| *p == Position::Internal));
}

#[test]
fn handles_are_shared_per_symbol() {
    use crate::handle_registry::{Handle, HandleRegistry};

    let lifter = StandardTypeLifter::new();
    let config = TranslationConfig::default();
    let decl = Declaration {
        symbol: Symbol::from("g"),
        params: vec![Type::ptr()],
        ret: Type::Void,
        varargs: false,
    };
    let mut handles = HandleRegistry::new();
    let a = handles.declare(&decl, &lifter, &config).unwrap();
    let b = handles.declare(&decl, &lifter, &config).unwrap();
    assert!(Handle::same(&a, &b));
    assert_eq!(handles.len(), 1);

    // `@pick` is both declared and defined; calls and the definition all see one handle
    let translation = translate(&small_program()).unwrap();
    assert_eq!(translation.handles().len(), 3);
    let pick = translation.handles().lookup(&Symbol::from("pick")).unwrap();
    assert!(Handle::same(
        pick,
        &translation.cfg(&Symbol::from("pick")).unwrap().handle
    ));
}

#[test]
fn incompatible_redeclaration_is_rejected_only_when_validating() {
    let mut module = small_program();
    module.declarations.push(Declaration {
        symbol: Symbol::from("pick"),
        params: vec![Type::Int(64)],
        ret: Type::Int(32),
        varargs: false,
    });
    assert!(translate(&module).is_ok());

    let validating = TranslationConfig {
        validate_redeclared_signatures: true,
        ..Default::default()
    };
    assert_eq!(
        translate_with(&module, &validating).unwrap_err(),
        TranslationError::IncompatibleRedeclaration {
            symbol: Symbol::from("pick")
        }
    );
    assert!(translate_with(&small_program(), &validating).is_ok());
}

#[test]
fn calls_globals_and_switches() {
    let translation = translate(&small_program()).unwrap();

    let globals = translation.global_init_map();
    assert_eq!(
        globals.get(&Symbol::from("counter")).unwrap().value,
        Some(Literal::BitVector {
            width: 32,
            value: 7
        })
    );
    assert_eq!(
        globals.get(&Symbol::from("callback")).unwrap().value,
        Some(Literal::FunctionHandle(Symbol::from("pick")))
    );
    assert_eq!(globals.get(&Symbol::from("name")).unwrap().value, None);
    assert_eq!(globals.get(&Symbol::from("ext")).unwrap().value, None);

    let main = translation.cfg(&Symbol::from("main")).unwrap();
    let calls: Vec<&Expr> = main
        .blocks
        .iter()
        .flat_map(|b| b.stmts.iter())
        .filter_map(|s| match &s.value {
            TargetStmt::Set(_, e @ Expr::Call { .. }) => Some(e),
            _ => None,
        })
        .collect();
    assert_eq!(calls.len(), 2);
    assert!(matches!(
        calls[0],
        Expr::Call { callee: crate::cfg::Callee::Handle(s), .. } if s.as_str() == "pick"
    ));
    assert!(matches!(
        calls[1],
        Expr::Call {
            callee: crate::cfg::Callee::Pointer(Atom::Reg(_)),
            ..
        }
    ));

    let pick = translation.cfg(&Symbol::from("pick")).unwrap();
    let first = pick.block(match pick.entry_block().unwrap().terminator.value {
        Terminator::Jump(l) => l,
        _ => unreachable!(),
    });
    match &first.unwrap().terminator.value {
        Terminator::Switch {
            scrutinee, cases, ..
        } => {
            assert_eq!(*scrutinee, Atom::Arg(0));
            assert_eq!(cases.len(), 2);
            assert_eq!(cases[0].1, cases[1].1);
        }
        t => panic!("expected a switch, got {:?}", t),
    }
    // Both cases and the default lead to the blocks they name
    let two: Vec<Label> = pick
        .blocks
        .iter()
        .filter(|b| b.source_label == Some(Ident::Anon(2)))
        .map(|b| b.label)
        .collect();
    assert_eq!(two.len(), 1);
    assert_eq!(pick.predecessors_of(two[0]).len(), 1);

    let dot = main.generate_dot();
    assert!(dot.starts_with("digraph cfg_main"));
}

#[test]
fn malformed_routines_are_rejected() {
    let ret = || Stmt::effect(Instr::Ret(Some(i32_value(Value::Int(0)))));

    assert_eq!(
        translate(&single_routine(vec![])).unwrap_err(),
        TranslationError::EmptyBody {
            symbol: Symbol::from("f")
        }
    );

    assert_eq!(
        translate(&single_routine(vec![BasicBlock {
            label: None,
            stmts: vec![ret()],
        }]))
        .unwrap_err(),
        TranslationError::MissingEntryLabel {
            symbol: Symbol::from("f")
        }
    );

    assert!(matches!(
        translate(&single_routine(vec![BasicBlock::new(
            "entry",
            vec![Stmt::define(
                "x",
                Instr::Binary {
                    op: crate::ir::BinOp::Mul,
                    lhs: i32_value(Value::Int(2)),
                    rhs: Value::Int(3),
                }
            )]
        )])),
        Err(TranslationError::MissingTerminator { .. })
    ));

    assert_eq!(
        translate(&single_routine(vec![BasicBlock::new(
            "entry",
            vec![Stmt::effect(Instr::Br(Ident::from("nowhere")))]
        )]))
        .unwrap_err(),
        TranslationError::UndefinedBlock {
            symbol: Symbol::from("f"),
            label: Ident::from("nowhere")
        }
    );

    assert!(matches!(
        translate(&single_routine(vec![BasicBlock::new(
            "entry",
            vec![Stmt::effect(Instr::Ret(Some(i32_value(Value::Ident(
                Ident::from("missing")
            )))))]
        )])),
        Err(TranslationError::UndefinedIdent { .. })
    ));

    assert!(matches!(
        translate(&single_routine(vec![BasicBlock::new(
            "entry",
            vec![Stmt::effect(Instr::IndirectBr {
                address: TypedValue::new(Type::ptr(), Value::Null),
                destinations: vec![Ident::from("entry")],
            })]
        )])),
        Err(TranslationError::Unsupported { .. })
    ));

    // A failure in any routine fails the whole module
    let mut module = small_program();
    module.definitions.extend(double_assignment().definitions);
    assert!(translate(&module).is_err());
}

#[test]
fn declarations_ahead_of_their_allocation_are_still_annotated() {
    let translation = translate(&early_declarations()).unwrap();
    let cfg = translation.cfg(&Symbol::from("early")).unwrap();
    let storage = source_block(cfg, "storage");

    let annotated = |name: &str| -> Vec<RegId> {
        storage
            .stmts
            .iter()
            .filter_map(|s| match &s.value {
                TargetStmt::Annotate { reg, name: n, .. } if n == name => Some(*reg),
                _ => None,
            })
            .collect()
    };
    let allocations = storage
        .stmts
        .iter()
        .filter_map(|s| match &s.value {
            TargetStmt::Set(r, Expr::Alloca { .. }) => Some(*r),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(allocations.len(), 2);
    assert_eq!(annotated("slot"), vec![allocations[0]]);
    // Declared through `%view` before the cast, yet annotated on the allocation of `%wide`
    assert_eq!(annotated("wide"), vec![allocations[1]]);

    // Each annotation directly follows its allocation
    for (i, s) in storage.stmts.iter().enumerate() {
        if let TargetStmt::Annotate { reg, position, .. } = &s.value {
            assert!(matches!(
                storage.stmts[i - 1].value,
                TargetStmt::Set(r, Expr::Alloca { .. }) if r == *reg
            ));
            assert_eq!(position.to_string(), "/src/early.c:2:3");
        }
    }
    assert!(source_block(cfg, "entry")
        .stmts
        .iter()
        .all(|s| !matches!(s.value, TargetStmt::Annotate { .. })));
}

#[test]
fn unliftable_declaration_fails_the_module() {
    use crate::errors::TypeLiftError;

    assert_eq!(
        translate(&opaque_parameter()).unwrap_err(),
        TranslationError::TypeLift {
            symbol: Symbol::from("consume"),
            source: TypeLiftError::OpaqueStruct {
                name: "struct.hidden".into()
            }
        }
    );

    let mut recursive = opaque_parameter();
    recursive.named_types = vec![(
        "struct.hidden".into(),
        Some(Type::Struct {
            fields: vec![Type::Int(8), Type::Named("struct.hidden".into())],
            packed: false,
        }),
    )];
    assert!(matches!(
        translate(&recursive),
        Err(TranslationError::TypeLift { symbol, .. }) if symbol == Symbol::from("consume")
    ));
}

#[test]
fn calls_to_undeclared_routines_are_rejected() {
    assert_eq!(
        translate(&undeclared_callee()).unwrap_err(),
        TranslationError::UnknownSymbol {
            symbol: Symbol::from("missing")
        }
    );
}

#[test]
fn quoted_symbols_are_sanitized_for_output_names() {
    let module = read_module(
        "define i32 @\"../a/b.c\"() {\nentry:\n  ret i32 0\n}\n",
    )
    .unwrap();
    let translation = translate(&module).unwrap();
    let cfg = translation.cfg(&Symbol::from("../a/b.c")).unwrap();
    assert_eq!(cfg.sanitized_name(), "___a_b_c");
    assert!(!cfg.sanitized_name().contains('/'));
    assert!(cfg.generate_dot().starts_with("digraph cfg____a_b_c"));
}

#[test]
fn translations_are_equal_only_to_themselves() {
    let module = swap_loop();
    let a = translate(&module).unwrap();
    let b = translate(&module).unwrap();
    assert_eq!(a, a);
    assert_ne!(a, b);
    assert_ne!(a.identity(), b.identity());
    // Same module, same shape
    let (ca, cb) = (
        a.cfg(&Symbol::from("swap")).unwrap(),
        b.cfg(&Symbol::from("swap")).unwrap(),
    );
    assert_eq!(ca.blocks, cb.blocks);
    assert_eq!(ca.registers, cb.registers);
}
