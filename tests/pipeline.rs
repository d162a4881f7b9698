use lemonc::bytecode::compile::{CompiledFunction, FunctionCompiler};
use lemonc::bytecode::compile_error::WarningCode;
use lemonc::bytecode::disasm::Disassembler;
use lemonc::bytecode::ir::{Function, FunctionFlags, Parameter, ScriptFunction};
use lemonc::bytecode::{OpcodeFlags, OpcodeType};
use lemonc::config::CompileOptions;
use lemonc::frontend::globals::Globals;
use lemonc::frontend::{Token, TokenArena};
use lemonc::lang::data_type::DataType;
use lemonc::lang::operators::Operator;
use lemonc::lang::variable::Variable;

fn ident(name: &str) -> Token {
    Token::identifier(name)
}

fn op(op: Operator) -> Token {
    Token::operator(op)
}

fn int(value: i64) -> Token {
    Token::constant(value, DataType::ConstInt)
}

fn globals() -> Globals {
    let mut globals = Globals::new();
    globals.add_variable(Variable::global("score", 0, DataType::U32, 0));
    globals
}

/// Feeds one statement per entry through the compiler.
fn compile(globals: &Globals, function: Function, statements: Vec<Vec<Token>>) -> CompiledFunction {
    let mut compiler = FunctionCompiler::new(function, globals, CompileOptions::default()).unwrap();
    let mut arena = TokenArena::new();
    for (line, tokens) in statements.into_iter().enumerate() {
        let mut list = arena.push_all(tokens);
        compiler.compile_statement(&mut arena, &mut list, line as u32 + 1).unwrap();
    }
    compiler.finish().unwrap()
}

fn script(compiled: &CompiledFunction) -> &ScriptFunction {
    compiled.function.as_script().unwrap()
}

fn kinds(compiled: &CompiledFunction) -> Vec<OpcodeType> {
    script(compiled).opcodes.iter().map(|op| op.kind).collect()
}

#[test]
fn test_function_with_parameters() {
    let globals = globals();
    let function = Function::script(
        "add",
        DataType::U32,
        vec![Parameter::new("a", DataType::U32), Parameter::new("b", DataType::U32)],
    );
    let mut compiler = FunctionCompiler::new(function, &globals, CompileOptions::default()).unwrap();
    let mut arena = TokenArena::new();
    let mut list = arena.push_all(vec![ident("a"), op(Operator::BinaryPlus), ident("b")]);
    compiler.compile_return(&mut arena, &mut list, 2).unwrap();
    let compiled = compiler.finish().unwrap();

    use OpcodeType::*;
    assert_eq!(
        kinds(&compiled),
        vec![
            MoveVarStack,
            SetVariableValue,
            MoveStack,
            SetVariableValue,
            MoveStack,
            GetVariableValue,
            GetVariableValue,
            ArithmAdd,
            Return
        ]
    );
    let ops = &script(&compiled).opcodes;
    assert_eq!(ops[0].parameter, 2);
    assert_eq!(ops[1].parameter, 1);
    assert_eq!(ops[3].parameter, 0);
    assert!(ops[5].flags.contains(OpcodeFlags::NEW_LINE));
    assert!(ops[4].flags.contains(OpcodeFlags::SEQ_BREAK));
    assert_eq!(script(&compiled).local_variables.len(), 2);
}

#[test]
fn test_constant_condition_removes_block() {
    let globals = globals();
    let mut compiler = FunctionCompiler::new(
        Function::script("main", DataType::Void, Vec::new()),
        &globals,
        CompileOptions::default(),
    )
    .unwrap();
    let mut arena = TokenArena::new();
    let mut condition = arena.push_all(vec![int(0)]);
    let block = compiler.begin_if(&mut arena, &mut condition, 1).unwrap();
    let mut assignment = arena.push_all(vec![ident("score"), op(Operator::Assign), int(3)]);
    compiler.compile_statement(&mut arena, &mut assignment, 2).unwrap();
    compiler.end_if(block);
    let compiled = compiler.finish().unwrap();

    assert!(kinds(&compiled).iter().all(|kind| *kind == OpcodeType::Return));
    let stats = compiled.stats.unwrap();
    assert_eq!(stats.opcodes_before, 6);
    assert!(stats.branches_folded >= 1);
}

#[test]
fn test_deprecated_call_warning_is_returned() {
    let mut globals = globals();
    globals.add_function(Function::script("old", DataType::Void, Vec::new()).with_flags(FunctionFlags::DEPRECATED));
    let compiled = compile(
        &globals,
        Function::script("main", DataType::Void, Vec::new()),
        vec![vec![ident("old"), op(Operator::ParenthesisLeft), op(Operator::ParenthesisRight)]],
    );

    assert_eq!(kinds(&compiled), vec![OpcodeType::Call, OpcodeType::Return]);
    assert_eq!(compiled.warnings.len(), 1);
    assert_eq!(compiled.warnings[0].code, WarningCode::DeprecatedFunction);
    assert!(compiled.warnings[0].to_string().contains("warning in line 1"));
}

#[test]
fn test_loop_survives_serialization_and_listing() {
    let globals = globals();
    let mut compiler = FunctionCompiler::new(
        Function::script("count", DataType::Void, Vec::new()),
        &globals,
        CompileOptions::default(),
    )
    .unwrap();
    let mut arena = TokenArena::new();
    compiler.add_label("again", 1).unwrap();
    let mut increment = arena.push_all(vec![ident("score"), op(Operator::AssignPlus), int(1)]);
    compiler.compile_statement(&mut arena, &mut increment, 2).unwrap();
    let mut condition = arena.push_all(vec![ident("score"), op(Operator::CompareLess), int(10)]);
    let block = compiler.begin_if(&mut arena, &mut condition, 3).unwrap();
    compiler.add_jump_to_label("again", 3);
    compiler.end_if(block);
    let compiled = compiler.finish().unwrap();

    let script = script(&compiled);
    assert_eq!(script.labels[0].offset, 0);
    assert!(script.opcodes[0].flags.contains(OpcodeFlags::LABEL | OpcodeFlags::JUMP_TARGET));
    assert!(script.opcodes.iter().any(|op| op.kind == OpcodeType::CompareLt));

    let decoded = ScriptFunction::from_bytes(&script.to_bytes().unwrap()).unwrap();
    assert_eq!(&decoded, script);
    assert_eq!(decoded.compiled_hash(0), script.compiled_hash(0));

    let listing = Disassembler::new().no_color().function_to_string(&compiled.function);
    assert!(listing.contains("again:"));
    assert!(listing.contains("COMPARE_LT"));
}
