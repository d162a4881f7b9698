use std::sync::Arc;

use tracing::{debug, trace};

use crate::bytecode::compile_error::{CompileError, CompilerWarning, Result};
use crate::bytecode::ir::{Function, ScriptFunction};
use crate::bytecode::optimize::{self, OptimizerStats, OptimizerWorkspace};
use crate::bytecode::verify;
use crate::bytecode::{Opcode, OpcodeFlags, OpcodeType};
use crate::config::CompileOptions;
use crate::frontend::globals::GlobalsLookup;
use crate::frontend::token::{TokenArena, TokenId, TokenKind, TokenList};
use crate::frontend::token_processing::{Context, TokenProcessor};
use crate::lang::base_type::BaseType;
use crate::lang::data_type::DataType;
use crate::lang::operators::{Operator, OperatorType};
use crate::lang::type_casting::{CastHandling, TypeCasting};

/// Target of `call` / `jump` statements with a native address argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Call,
    Jump,
}

/// Open `if` block. Must be closed with [`FunctionCompiler::end_if`].
#[derive(Debug)]
#[must_use]
pub struct IfBlock {
    condition_jump: usize,
    else_jump: Option<usize>,
}

/// Open loop. Must be closed with [`FunctionCompiler::end_loop`].
#[derive(Debug)]
#[must_use]
pub struct LoopBlock {
    start: usize,
    condition_jump: Option<usize>,
    continue_target: Option<usize>,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

#[derive(Debug)]
struct PendingLabelJump {
    label: String,
    position: usize,
    line: u32,
}

/// Result of [`FunctionCompiler::finish`].
#[derive(Debug)]
pub struct CompiledFunction {
    pub function: Function,
    pub warnings: Vec<CompilerWarning>,
    /// `None` when optimization was switched off
    pub stats: Option<OptimizerStats>,
}

// =============================================================================
// FUNCTION COMPILER - opcodes for the statements of one script function
// =============================================================================

/// Turns the statements of one script function into opcodes.
///
/// Statements are passed in source order as raw token lists; the compiler
/// runs the token processor on each of them and emits opcodes right away.
/// Jumps to labels may refer to labels defined later, they are resolved
/// in [`FunctionCompiler::finish`].
pub struct FunctionCompiler<'g> {
    processor: TokenProcessor<'g>,
    context: Context,
    options: CompileOptions,
    type_casting: TypeCasting,
    opcodes: Vec<Opcode>,
    line: u32,
    label_jumps: Vec<PendingLabelJump>,
}

impl<'g> FunctionCompiler<'g> {
    /// Starts compiling `function`, which must be a script function.
    /// Its parameters become the first local variables.
    pub fn new(mut function: Function, globals: &'g dyn GlobalsLookup, options: CompileOptions) -> Result<Self> {
        let parameters = function.parameters.clone();
        let script = script_of(&mut function)?;
        let start_line = script.source.start_line;

        let mut locals = Vec::with_capacity(parameters.len());
        for parameter in &parameters {
            let local = script
                .add_local_variable(parameter.name.clone(), parameter.data_type)
                .map_err(|_| {
                    CompileError::new(
                        start_line,
                        format!("Parameter name '{}' is used more than once", parameter.name),
                    )
                })?;
            locals.push(Arc::new(local.to_variable()));
        }

        let mut context = Context::new(function);
        context.local_variables.extend(locals);

        Ok(Self {
            processor: TokenProcessor::new(globals),
            context,
            options,
            type_casting: TypeCasting::new(),
            opcodes: Vec::new(),
            line: start_line,
            label_jumps: Vec::new(),
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// For registering local constants and constant arrays.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Opcodes emitted so far, without the parameter prologue.
    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    pub fn warnings(&self) -> &[CompilerWarning] {
        self.processor.warnings()
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(self.line, message)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Compiles one statement whose result is discarded. An empty token
    /// list emits nothing.
    pub fn compile_statement(&mut self, arena: &mut TokenArena, tokens: &mut TokenList, line: u32) -> Result<()> {
        self.rollback_on_error(|this| {
            if let Some(statement) = this.process_statement(arena, tokens, line, None)? {
                this.compile_token(arena, statement, true, false)?;
            }
            Ok(())
        })
    }

    /// `return` with an optional value; an empty list returns nothing.
    pub fn compile_return(&mut self, arena: &mut TokenArena, tokens: &mut TokenList, line: u32) -> Result<()> {
        self.rollback_on_error(|this| this.emit_return(arena, tokens, line))
    }

    fn emit_return(&mut self, arena: &mut TokenArena, tokens: &mut TokenList, line: u32) -> Result<()> {
        let return_type = self.context.function.return_type;
        match self.process_statement(arena, tokens, line, None)? {
            Some(value) => {
                if return_type == DataType::Void {
                    return Err(self.error(format!(
                        "Function '{}' with 'void' return type cannot return a value",
                        self.context.function.name
                    )));
                }
                self.compile_token(arena, value, false, false)?;
                self.add_cast_if_necessary(arena.data_type(value), return_type)?;
            }
            None => {
                if return_type != DataType::Void {
                    return Err(self.error(format!(
                        "Function '{}' must return a {} value",
                        self.context.function.name, return_type
                    )));
                }
            }
        }
        self.add_opcode(OpcodeType::Return, BaseType::Void, 0);
        Ok(())
    }

    /// `call addr` / `jump addr`: the address is cast to the external
    /// address type.
    pub fn compile_external(
        &mut self,
        arena: &mut TokenArena,
        tokens: &mut TokenList,
        line: u32,
        kind: ExternalKind,
    ) -> Result<()> {
        self.rollback_on_error(|this| {
            let Some(address) = this.process_statement(arena, tokens, line, None)? else {
                return Err(this.error("Call/jump must have an integer argument"));
            };
            this.compile_token(arena, address, false, false)?;
            this.add_cast_if_necessary(arena.data_type(address), CompileOptions::EXTERNAL_ADDRESS_TYPE)?;

            let opcode = match kind {
                ExternalKind::Call => OpcodeType::ExternalCall,
                ExternalKind::Jump => OpcodeType::ExternalJump,
            };
            this.add_opcode(opcode, BaseType::Void, 0);
            Ok(())
        })
    }

    /// Runs `emit` for one statement. When it fails, the locals it defined
    /// and the opcodes and label jumps it emitted are dropped again, so the
    /// caller can report the error and go on with the next statement.
    fn rollback_on_error<T>(&mut self, emit: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let scope = self.context.begin_scope();
        let slots = self
            .context
            .function
            .as_script()
            .map(|script| (script.local_variables.len(), script.local_variables_memory_size));
        let opcodes = self.opcodes.len();
        let label_jumps = self.label_jumps.len();

        let result = emit(self);
        if result.is_err() {
            self.context.end_scope(scope);
            if let (Some(script), Some((count, memory_size))) = (self.context.function.as_script_mut(), slots) {
                script.local_variables.truncate(count);
                script.local_variables_memory_size = memory_size;
            }
            self.opcodes.truncate(opcodes);
            self.label_jumps.truncate(label_jumps);
        }
        result
    }

    /// Runs the token processor and checks that a single statement is left.
    fn process_statement(
        &mut self,
        arena: &mut TokenArena,
        tokens: &mut TokenList,
        line: u32,
        result_type: Option<DataType>,
    ) -> Result<Option<TokenId>> {
        self.line = line;
        if tokens.is_empty() {
            return Ok(None);
        }
        self.processor
            .process_tokens(&mut self.context, arena, tokens, line, result_type)?;

        match tokens.as_slice() {
            [id] if arena.is_statement(*id) => Ok(Some(*id)),
            [id] => Err(self.error(format!("Expected a statement, found {}", arena.kind(*id).name()))),
            _ => Err(self.error("Statement contains more than a single token tree root")),
        }
    }

    // =========================================================================
    // Labels, jumps and scopes
    // =========================================================================

    /// Places a label at the next opcode.
    pub fn add_label(&mut self, name: &str, line: u32) -> Result<()> {
        self.line = line;
        let offset = self.opcodes.len();
        let script = script_of(&mut self.context.function)?;
        if script.find_label_by_name(name).is_some() {
            return Err(CompileError::new(line, format!("Label is defined more than once: {}", name)));
        }
        script.add_label(name, offset, Vec::new());
        Ok(())
    }

    pub fn add_jump_to_label(&mut self, name: &str, line: u32) {
        self.line = line;
        self.add_label_jump(OpcodeType::Jump, name);
    }

    /// Indirect jump: evaluates the index and jumps to the label with that
    /// position in `labels`. An index out of range falls through.
    pub fn add_jump_switch(
        &mut self,
        arena: &mut TokenArena,
        tokens: &mut TokenList,
        labels: &[&str],
        line: u32,
    ) -> Result<()> {
        if labels.is_empty() {
            return Err(CompileError::new(line, "Indirect jump must have at least one label"));
        }
        self.rollback_on_error(|this| {
            let Some(index) = this.process_statement(arena, tokens, line, None)? else {
                return Err(this.error("Indirect jump must have an index"));
            };
            this.compile_token(arena, index, false, false)?;
            for label in labels {
                this.add_label_jump(OpcodeType::JumpSwitch, label);
            }
            // the index is still on the stack when none of the jumps was taken
            this.add_opcode(OpcodeType::MoveStack, BaseType::Void, -1);
            Ok(())
        })
    }

    fn add_label_jump(&mut self, kind: OpcodeType, label: &str) {
        let position = self.add_opcode(kind, BaseType::Void, -1);
        self.label_jumps.push(PendingLabelJump {
            label: label.to_string(),
            position,
            line: self.line,
        });
    }

    /// Opens a block scope; locals defined inside are visible until
    /// [`FunctionCompiler::end_scope`] is called with the returned mark.
    pub fn begin_scope(&self) -> usize {
        self.context.begin_scope()
    }

    /// Locals keep their slots after the scope ends; the prologue reserves
    /// space for all of them at once.
    pub fn end_scope(&mut self, mark: usize) {
        let removed = self.context.end_scope(mark);
        trace!(removed, "scope closed");
    }

    // =========================================================================
    // Structured control flow
    // =========================================================================

    /// Evaluates the condition and opens the conditional part.
    pub fn begin_if(&mut self, arena: &mut TokenArena, tokens: &mut TokenList, line: u32) -> Result<IfBlock> {
        self.rollback_on_error(|this| {
            let Some(condition) = this.process_statement(arena, tokens, line, None)? else {
                return Err(this.error("Condition of if-statement must not be empty"));
            };
            this.compile_token(arena, condition, false, false)?;
            Ok(this.open_if())
        })
    }

    pub fn begin_else(&mut self, block: &mut IfBlock) {
        block.else_jump = Some(self.add_opcode(OpcodeType::Jump, BaseType::Void, -1));
        self.patch_jump(block.condition_jump);
    }

    pub fn end_if(&mut self, block: IfBlock) {
        self.patch_jump(block.else_jump.unwrap_or(block.condition_jump));
    }

    /// Expects the condition value on the stack.
    fn open_if(&mut self) -> IfBlock {
        IfBlock {
            condition_jump: self.add_opcode(OpcodeType::JumpConditional, BaseType::Void, -1),
            else_jump: None,
        }
    }

    /// Marks the loop start. For `for` loops, compile the initial statement
    /// before calling this.
    pub fn begin_loop(&mut self) -> LoopBlock {
        LoopBlock {
            start: self.opcodes.len(),
            condition_jump: None,
            continue_target: None,
            breaks: Vec::new(),
            continues: Vec::new(),
        }
    }

    /// Leaves the loop when the condition is false. Loops without a call
    /// to this run until a `break`.
    pub fn loop_condition(
        &mut self,
        block: &mut LoopBlock,
        arena: &mut TokenArena,
        tokens: &mut TokenList,
        line: u32,
    ) -> Result<()> {
        block.condition_jump = self.rollback_on_error(|this| {
            let Some(condition) = this.process_statement(arena, tokens, line, None)? else {
                return Ok(None);
            };
            this.compile_token(arena, condition, false, false)?;
            Ok(Some(this.add_opcode(OpcodeType::JumpConditional, BaseType::Void, -1)))
        })?;
        Ok(())
    }

    /// Marks where the iteration statement of a `for` loop starts; `continue`
    /// jumps here instead of to the condition.
    pub fn begin_loop_iteration(&mut self, block: &mut LoopBlock) {
        block.continue_target = Some(self.opcodes.len());
    }

    pub fn add_break(&mut self, block: &mut LoopBlock, line: u32) {
        self.line = line;
        block.breaks.push(self.add_opcode(OpcodeType::Jump, BaseType::Void, -1));
    }

    pub fn add_continue(&mut self, block: &mut LoopBlock, line: u32) {
        self.line = line;
        block.continues.push(self.add_opcode(OpcodeType::Jump, BaseType::Void, -1));
    }

    pub fn end_loop(&mut self, block: LoopBlock) {
        self.add_opcode(OpcodeType::Jump, BaseType::Void, block.start as i64);
        let end = self.opcodes.len() as i64;
        for position in block.condition_jump.into_iter().chain(block.breaks) {
            self.opcodes[position].parameter = end;
        }
        let continue_target = block.continue_target.unwrap_or(block.start) as i64;
        for position in block.continues {
            self.opcodes[position].parameter = continue_target;
        }
    }

    fn patch_jump(&mut self, position: usize) {
        self.opcodes[position].parameter = self.opcodes.len() as i64;
    }

    // =========================================================================
    // Opcode emission
    // =========================================================================

    fn add_opcode(&mut self, kind: OpcodeType, data_type: BaseType, parameter: i64) -> usize {
        self.opcodes.push(make_opcode(kind, data_type, parameter, self.line));
        self.opcodes.len() - 1
    }

    fn add_cast_if_necessary(&mut self, from: DataType, to: DataType) -> Result<()> {
        match self.type_casting.cast_handling(from, to) {
            CastHandling::NoCast => {}
            CastHandling::BaseCast(cast) => {
                self.add_opcode(OpcodeType::CastValue, BaseType::Void, cast.0 as i64);
            }
            CastHandling::Invalid => return Err(CompileError::invalid_cast(self.line, from, to)),
        }
        Ok(())
    }

    /// Emits the opcodes of a statement tree. The value ends up on the
    /// stack unless `consume_result` pops it again; an lvalue stores the
    /// value on top of the stack instead of loading.
    fn compile_token(&mut self, arena: &TokenArena, id: TokenId, consume_result: bool, is_lvalue: bool) -> Result<()> {
        let token = &arena[id];
        let data_type = token.data_type.base_type();

        match &token.kind {
            TokenKind::UnaryOperation { op, argument } => {
                if is_lvalue {
                    return Err(self.error("Cannot assign value to a unary operation"));
                }
                let kind = match op {
                    Operator::BinaryMinus => OpcodeType::ArithmNeg,
                    Operator::UnaryNot => OpcodeType::ArithmNot,
                    Operator::UnaryBitNot => OpcodeType::ArithmBitnot,
                    Operator::UnaryIncrement | Operator::UnaryDecrement => {
                        let step = if *op == Operator::UnaryDecrement { -1 } else { 1 };
                        self.compile_token(arena, *argument, false, false)?;
                        self.add_opcode(OpcodeType::PushConstant, BaseType::IntConst, step);
                        self.add_opcode(OpcodeType::ArithmAdd, data_type, 0);
                        self.compile_token(arena, *argument, false, true)?;
                        return self.finish_token(token.data_type, consume_result);
                    }
                    _ => return Err(self.error("Unrecognized operator")),
                };
                self.compile_token(arena, *argument, false, false)?;
                self.add_opcode(kind, data_type, 0);
            }

            TokenKind::BinaryOperation {
                op,
                left,
                right,
                function,
            } => {
                if is_lvalue {
                    return Err(self.error("Cannot assign value to a binary operation"));
                }
                match function {
                    // Operator implemented by a function, compiled like a call
                    Some(function) => {
                        self.compile_token(arena, *left, false, false)?;
                        self.compile_token(arena, *right, false, false)?;
                        self.add_opcode(OpcodeType::Call, BaseType::Void, function.name_and_signature_hash() as i64);
                    }
                    None => self.compile_binary_operation(arena, id, *op, *left, *right, consume_result)?,
                }
            }

            TokenKind::Parenthesis { content, .. } => {
                if is_lvalue {
                    return Err(self.error("Cannot assign value to an expression in parentheses"));
                }
                match content.as_slice() {
                    [] => {}
                    [inner] if arena.is_statement(*inner) => self.compile_token(arena, *inner, false, false)?,
                    [_] => return Err(self.error("Parenthesis content is not a statement")),
                    _ => return Err(self.error("Too many tokens left inside parenthesis")),
                }
            }

            TokenKind::Constant(value) => {
                if is_lvalue {
                    return Err(self.error("Cannot assign value to a constant"));
                }
                self.add_opcode(OpcodeType::PushConstant, data_type, *value);
            }

            TokenKind::Variable(variable) => {
                let kind = if is_lvalue {
                    OpcodeType::SetVariableValue
                } else {
                    OpcodeType::GetVariableValue
                };
                self.add_opcode(kind, data_type, variable.id().0 as i64);
            }

            TokenKind::FunctionCall {
                function,
                parameters,
                is_base_call,
            } => {
                if is_lvalue {
                    return Err(self.error("Cannot assign value to a function call"));
                }
                let Some(function) = function else {
                    return Err(CompileError::internal("function call without a resolved function"));
                };
                if parameters.len() != function.parameters.len() {
                    return Err(CompileError::internal(format!(
                        "call of '{}' has {} parameters, expected {}",
                        function.name,
                        parameters.len(),
                        function.parameters.len()
                    )));
                }
                for (&parameter, target) in parameters.iter().zip(&function.parameters) {
                    self.compile_token(arena, parameter, false, false)?;
                    self.add_cast_if_necessary(arena.data_type(parameter), target.data_type)?;
                }
                let position = self.add_opcode(OpcodeType::Call, BaseType::Void, function.name_and_signature_hash() as i64);
                if *is_base_call {
                    self.opcodes[position].flags.insert(OpcodeFlags::BASE_CALL);
                }
            }

            TokenKind::MemoryAccess { address } => {
                self.compile_token(arena, *address, false, false)?;
                let kind = if is_lvalue {
                    OpcodeType::WriteMemory
                } else {
                    OpcodeType::ReadMemory
                };
                self.add_opcode(kind, data_type, 0);
            }

            TokenKind::ValueCast { argument } => {
                if is_lvalue {
                    return Err(self.error("Cannot assign value to a type cast"));
                }
                self.compile_token(arena, *argument, false, false)?;
                self.add_cast_if_necessary(arena.data_type(*argument), token.data_type)?;
            }

            other => {
                return Err(self.error(format!(
                    "Token type '{}' should be eliminated by now",
                    other.name()
                )));
            }
        }

        self.finish_token(token.data_type, consume_result)
    }

    fn finish_token(&mut self, data_type: DataType, consume_result: bool) -> Result<()> {
        if consume_result && data_type != DataType::Void {
            self.add_opcode(OpcodeType::MoveStack, BaseType::Void, -1);
        }
        Ok(())
    }

    fn compile_binary_operation(
        &mut self,
        arena: &TokenArena,
        id: TokenId,
        op: Operator,
        left: TokenId,
        right: TokenId,
        consume_result: bool,
    ) -> Result<()> {
        match op {
            Operator::Assign => {
                self.compile_token(arena, right, false, false)?;
                self.add_cast_if_necessary(arena.data_type(right), arena.data_type(left))?;
                self.compile_token(arena, left, false, true)?;
            }

            Operator::LogicalAnd => {
                // a && b  is  a ? b : false
                self.compile_token(arena, left, false, false)?;
                let mut block = self.open_if();
                self.compile_token(arena, right, false, false)?;
                self.begin_else(&mut block);
                self.add_opcode(OpcodeType::PushConstant, BaseType::IntConst, 0);
                self.end_if(block);
            }

            Operator::LogicalOr => {
                // a || b  is  a ? true : b
                self.compile_token(arena, left, false, false)?;
                let mut block = self.open_if();
                self.add_opcode(OpcodeType::PushConstant, BaseType::IntConst, 1);
                self.begin_else(&mut block);
                self.compile_token(arena, right, false, false)?;
                self.end_if(block);
            }

            Operator::QuestionMark => {
                let TokenKind::BinaryOperation {
                    op: colon,
                    left: first,
                    right: second,
                    ..
                } = arena.kind(right)
                else {
                    return Err(self.error("Expected : after ? operator, but no binary operation found at all"));
                };
                if *colon != Operator::Colon {
                    return Err(self.error("Expected : after ? operator, but found wrong binary operation there"));
                }
                self.compile_token(arena, left, false, false)?;
                let mut block = self.open_if();
                self.compile_token(arena, *first, false, false)?;
                self.begin_else(&mut block);
                self.compile_token(arena, *second, false, false)?;
                self.end_if(block);
            }

            Operator::Colon => return Err(self.error("Found : without outer ? operator")),

            op => {
                let kind = operator_opcode(op).ok_or_else(|| self.error("Unrecognized operator"))?;
                if op.operator_type() == OperatorType::Assignment {
                    self.compile_compound_assignment(arena, kind, arena.data_type(id), left, right)?;
                } else {
                    if op == Operator::CompareEqual && consume_result && self.options.script_feature_level >= 2 {
                        return Err(self.error(
                            "Result of comparison is not used, this is certainly a mistake in the script",
                        ));
                    }
                    self.compile_arithmetic(arena, op, kind, left, right)?;
                }
            }
        }
        Ok(())
    }

    fn compile_arithmetic(
        &mut self,
        arena: &TokenArena,
        op: Operator,
        kind: OpcodeType,
        left: TokenId,
        right: TokenId,
    ) -> Result<()> {
        // Constants go right, the peephole rules only look there
        let swap = op.is_commutative()
            && arena.constant_value(left).is_some()
            && arena.constant_value(right).is_none();
        let (left, right) = if swap { (right, left) } else { (left, right) };

        self.compile_token(arena, left, false, false)?;
        self.compile_token(arena, right, false, false)?;
        // Comparisons have a bool result, so use the operand type
        self.add_opcode(kind, arena.data_type(left).base_type(), 0);
        Ok(())
    }

    fn compile_compound_assignment(
        &mut self,
        arena: &TokenArena,
        kind: OpcodeType,
        data_type: DataType,
        left: TokenId,
        right: TokenId,
    ) -> Result<()> {
        if let TokenKind::MemoryAccess { address } = arena.kind(left) {
            // The address is evaluated once; READ_MEMORY with parameter 1
            // keeps it on the stack and WRITE_MEMORY with parameter 1 takes
            // value and address in swapped order.
            let memory_type = arena.data_type(left).base_type();
            self.compile_token(arena, *address, false, false)?;
            self.add_opcode(OpcodeType::ReadMemory, memory_type, 1);
            self.compile_token(arena, right, false, false)?;
            self.add_opcode(kind, data_type.base_type(), 0);
            self.add_opcode(OpcodeType::WriteMemory, memory_type, 1);
        } else {
            self.compile_token(arena, left, false, false)?;
            self.compile_token(arena, right, false, false)?;
            self.add_opcode(kind, data_type.base_type(), 0);
            self.compile_token(arena, left, false, true)?;
        }
        Ok(())
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    pub fn finish(self) -> Result<CompiledFunction> {
        self.finish_with_workspace(&mut OptimizerWorkspace::new())
    }

    /// Completes the function: parameter prologue, label jumps, final
    /// `RETURN`, optimization, verification and opcode flags.
    pub fn finish_with_workspace(mut self, workspace: &mut OptimizerWorkspace) -> Result<CompiledFunction> {
        self.insert_prologue()?;
        self.resolve_label_jumps()?;
        self.ensure_final_return()?;

        let FunctionCompiler {
            mut processor,
            mut context,
            options,
            opcodes,
            ..
        } = self;
        let name = context.function.name.clone();
        let script = script_of(&mut context.function)?;
        script.opcodes = opcodes;

        let mut stats = None;
        if options.optimize {
            stats = Some(optimize::optimize_function(
                script,
                workspace,
                options.max_optimizer_rounds,
            )?);
            if options.verify {
                verify::verify_optimized(&script.opcodes, &script.labels)?;
            }
        } else if options.verify {
            verify::check_input(&script.opcodes, &script.labels)?;
        }
        assign_opcode_flags(script);

        debug!(function = %name, opcodes = script.opcodes.len(), labels = script.labels.len(), "compiled function");
        Ok(CompiledFunction {
            function: context.function,
            warnings: processor.take_warnings(),
            stats,
        })
    }

    /// Reserves the local variable slots and moves the parameters from the
    /// stack into their variables, last parameter first.
    fn insert_prologue(&mut self) -> Result<()> {
        let parameters = self.context.function.parameters.clone();
        let script = script_of(&mut self.context.function)?;
        if script.local_variables.is_empty() {
            return Ok(());
        }

        let line = script.source.start_line;
        let mut prologue = vec![make_opcode(
            OpcodeType::MoveVarStack,
            BaseType::Void,
            script.local_variables.len() as i64,
            line,
        )];
        for parameter in parameters.iter().rev() {
            let Some(local) = script.local_variables.iter().find(|v| v.name == parameter.name) else {
                return Err(CompileError::internal(format!(
                    "parameter '{}' has no local variable",
                    parameter.name
                )));
            };
            prologue.push(make_opcode(
                OpcodeType::SetVariableValue,
                local.data_type.base_type(),
                local.id as i64,
                line,
            ));
            prologue.push(make_opcode(OpcodeType::MoveStack, BaseType::Void, -1, line));
        }

        let shift = prologue.len();
        for op in &mut self.opcodes {
            if op.kind.has_jump_target() && op.parameter >= 0 {
                op.parameter += shift as i64;
            }
        }
        for label in &mut script.labels {
            label.offset += shift as u32;
        }
        for jump in &mut self.label_jumps {
            jump.position += shift;
        }
        self.opcodes.splice(0..0, prologue);
        Ok(())
    }

    fn resolve_label_jumps(&mut self) -> Result<()> {
        let script = script_of(&mut self.context.function)?;
        for jump in &self.label_jumps {
            let Some(label) = script.find_label_by_name(&jump.label) else {
                return Err(CompileError::new(
                    jump.line,
                    format!("Jump target label not found: {}", jump.label),
                ));
            };
            self.opcodes[jump.position].parameter = label.offset as i64;
        }
        self.label_jumps.clear();
        Ok(())
    }

    fn ensure_final_return(&mut self) -> Result<()> {
        if self.opcodes.last().is_some_and(|op| op.kind == OpcodeType::Return) {
            // Jumps and labels after the final return, e.g. behind an
            // if-block ending in a return, move onto it
            let last = self.opcodes.len() - 1;
            for op in &mut self.opcodes {
                if op.kind.has_jump_target() && op.parameter > last as i64 {
                    op.parameter = last as i64;
                }
            }
            let script = script_of(&mut self.context.function)?;
            for label in &mut script.labels {
                label.offset = label.offset.min(last as u32);
            }
            return Ok(());
        }

        let function = &self.context.function;
        if function.return_type != DataType::Void {
            return Err(self.error(format!(
                "Function '{}' must return a {} value",
                function.name, function.return_type
            )));
        }
        self.add_opcode(OpcodeType::Return, BaseType::Void, 0);
        Ok(())
    }
}

fn script_of(function: &mut Function) -> Result<&mut ScriptFunction> {
    function
        .as_script_mut()
        .ok_or_else(|| CompileError::internal("opcodes can only be built for script functions"))
}

/// Opcode with the signed flag removed where signedness does not matter.
fn make_opcode(kind: OpcodeType, data_type: BaseType, parameter: i64, line: u32) -> Opcode {
    let data_type = if kind.ignores_signedness() {
        data_type.make_unsigned()
    } else {
        data_type
    };
    Opcode::new(kind, parameter).with_data_type(data_type).with_line(line)
}

fn operator_opcode(op: Operator) -> Option<OpcodeType> {
    use Operator::*;
    Some(match op {
        AssignPlus | BinaryPlus => OpcodeType::ArithmAdd,
        AssignMinus | BinaryMinus => OpcodeType::ArithmSub,
        AssignMultiply | BinaryMultiply => OpcodeType::ArithmMul,
        AssignDivide | BinaryDivide => OpcodeType::ArithmDiv,
        AssignModulo | BinaryModulo => OpcodeType::ArithmMod,
        AssignShiftLeft | BinaryShiftLeft => OpcodeType::ArithmShl,
        AssignShiftRight | BinaryShiftRight => OpcodeType::ArithmShr,
        AssignAnd | BinaryAnd => OpcodeType::ArithmAnd,
        AssignOr | BinaryOr => OpcodeType::ArithmOr,
        AssignXor | BinaryXor => OpcodeType::ArithmXor,
        CompareEqual => OpcodeType::CompareEq,
        CompareNotEqual => OpcodeType::CompareNeq,
        CompareLess => OpcodeType::CompareLt,
        CompareLessOrEqual => OpcodeType::CompareLe,
        CompareGreater => OpcodeType::CompareGt,
        CompareGreaterOrEqual => OpcodeType::CompareGe,
        _ => return None,
    })
}

/// Recomputes the flags the runtime uses to split opcodes into sequences.
/// `BASE_CALL` is the only flag kept from before.
pub fn assign_opcode_flags(script: &mut ScriptFunction) {
    let opcodes = &mut script.opcodes;
    let len = opcodes.len();
    if len == 0 {
        return;
    }

    let mut last_line = u32::MAX;
    for op in opcodes.iter_mut() {
        op.flags &= OpcodeFlags::BASE_CALL;
        match op.kind {
            OpcodeType::Jump | OpcodeType::JumpConditional => {
                op.flags |= OpcodeFlags::CTRLFLOW | OpcodeFlags::JUMP;
            }
            OpcodeType::Call | OpcodeType::Return | OpcodeType::ExternalCall | OpcodeType::ExternalJump => {
                op.flags |= OpcodeFlags::CTRLFLOW;
            }
            _ => {}
        }
        if op.line != last_line {
            op.flags |= OpcodeFlags::NEW_LINE;
            last_line = op.line;
        }
    }

    for label in &script.labels {
        if let Some(op) = opcodes.get_mut(label.offset as usize) {
            op.flags |= OpcodeFlags::LABEL;
        }
    }

    for i in 0..len {
        if opcodes[i].flags.contains(OpcodeFlags::JUMP) {
            let target = (opcodes[i].parameter.max(0) as usize).min(len - 1);
            opcodes[target].flags |= OpcodeFlags::JUMP_TARGET;
        }
    }

    let breaks_before =
        OpcodeFlags::LABEL | OpcodeFlags::JUMP_TARGET | OpcodeFlags::NEW_LINE | OpcodeFlags::CTRLFLOW;
    for i in 0..len {
        let is_break = opcodes[i].flags.contains(OpcodeFlags::CTRLFLOW)
            || opcodes.get(i + 1).is_some_and(|next| next.flags.intersects(breaks_before));
        if is_break {
            opcodes[i].flags |= OpcodeFlags::SEQ_BREAK;
        }
    }
}
