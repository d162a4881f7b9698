use std::sync::Arc;

use tracing::{trace, warn};

use crate::bytecode::compile_error::{CompileError, CompilerWarning, Result, WarningCode};
use crate::bytecode::ir::{Function, FunctionFlags};
use crate::frontend::globals::{CONSTANT_ARRAY_ACCESS, FunctionReference, GlobalsLookup, Identifier, name_hash};
use crate::frontend::token::{Keyword, ParenthesisType, Token, TokenArena, TokenId, TokenKind, TokenList};
use crate::lang::constant::{Constant, ConstantArray};
use crate::lang::data_type::{DataType, DataTypeClass, IntegerSemantics};
use crate::lang::operators::{Operator, OperatorType};
use crate::lang::type_casting::{BinaryOperatorSignature, CastHandling, INVALID_SIGNATURE_PRIORITY, TypeCasting};
use crate::lang::variable::Variable;

// =============================================================================
// CONTEXT - per-function state shared by all statements of a function
// =============================================================================

/// Scoped symbols of the function being compiled. Owned by the caller and
/// reused for every statement of the function.
#[derive(Debug)]
pub struct Context {
    pub function: Function,
    /// Locals visible at the current point, innermost last.
    pub local_variables: Vec<Arc<Variable>>,
    pub local_constants: Vec<Arc<Constant>>,
    pub local_constant_arrays: Vec<Arc<ConstantArray>>,
}

impl Context {
    pub fn new(function: Function) -> Self {
        Self {
            function,
            local_variables: Vec::new(),
            local_constants: Vec::new(),
            local_constant_arrays: Vec::new(),
        }
    }

    pub fn find_local_variable(&self, hash: u64) -> Option<&Arc<Variable>> {
        self.local_variables.iter().rev().find(|v| v.name_hash() == hash)
    }

    pub fn find_local_constant(&self, hash: u64) -> Option<&Arc<Constant>> {
        self.local_constants.iter().rev().find(|c| c.name_hash == hash)
    }

    pub fn find_local_constant_array(&self, hash: u64) -> Option<&Arc<ConstantArray>> {
        self.local_constant_arrays.iter().rev().find(|a| a.name_hash == hash)
    }

    /// Number of visible locals; pass it to [`Context::end_scope`] later.
    pub fn begin_scope(&self) -> usize {
        self.local_variables.len()
    }

    /// Drops the locals defined since `mark`, returning how many went away.
    pub fn end_scope(&mut self, mark: usize) -> usize {
        let removed = self.local_variables.len().saturating_sub(mark);
        self.local_variables.truncate(mark);
        removed
    }
}

// =============================================================================
// TOKEN PROCESSOR
// =============================================================================

/// Rewrites the flat token list of one statement into a typed tree.
pub struct TokenProcessor<'g> {
    globals: &'g dyn GlobalsLookup,
    type_casting: TypeCasting,
    line: u32,
    warnings: Vec<CompilerWarning>,
}

impl<'g> TokenProcessor<'g> {
    pub fn new(globals: &'g dyn GlobalsLookup) -> Self {
        Self {
            globals,
            type_casting: TypeCasting::new(),
            line: 0,
            warnings: Vec::new(),
        }
    }

    pub fn warnings(&self) -> &[CompilerWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<CompilerWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Full pipeline. On success `tokens` holds the reduced statement(s),
    /// each with its data type assigned.
    pub fn process_tokens(
        &mut self,
        ctx: &mut Context,
        arena: &mut TokenArena,
        tokens: &mut TokenList,
        line: u32,
        result_type: Option<DataType>,
    ) -> Result<()> {
        self.line = line;

        self.resolve_identifiers(arena, tokens);
        self.process_defines(arena, tokens);
        self.process_constants(ctx, arena, tokens);
        self.process_parentheses(arena, tokens)?;
        self.process_comma_separators(arena, tokens)?;
        self.process_token_list_recursive(ctx, arena, tokens)?;
        self.assign_statement_data_types(arena, tokens, result_type)?;

        trace!(line, tokens = tokens.len(), "processed statement");
        Ok(())
    }

    /// Reduced pipeline for preprocessor conditions: structure and
    /// operators only, identifiers are left alone.
    pub fn process_for_preprocessor(&mut self, arena: &mut TokenArena, tokens: &mut TokenList, line: u32) -> Result<()> {
        self.line = line;
        self.process_parentheses(arena, tokens)?;
        self.process_preprocessor_recursive(arena, tokens)
    }

    fn process_preprocessor_recursive(&mut self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        for i in 0..tokens.len() {
            if matches!(arena.kind(tokens[i]), TokenKind::Parenthesis { .. }) {
                let mut content = take_content(arena, tokens[i]);
                self.process_preprocessor_recursive(arena, &mut content)?;
                put_content(arena, tokens[i], content);
            }
        }
        self.process_unary_operations(arena, tokens)?;
        self.process_binary_operations(arena, tokens)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(self.line, message)
    }

    // =========================================================================
    // Identifiers, defines and constants
    // =========================================================================

    fn resolve_identifiers(&self, arena: &mut TokenArena, tokens: &mut TokenList) {
        let globals = self.globals;
        for i in 0..tokens.len() {
            let TokenKind::Identifier { hash, resolved, .. } = &mut arena[tokens[i]].kind else {
                continue;
            };
            if resolved.is_some() {
                continue;
            }
            *resolved = globals.resolve_identifier(*hash).cloned();
            if let Some(Identifier::DataType(data_type)) = resolved {
                let data_type = *data_type;
                tokens[i] = arena.push(Token::var_type(data_type));
            }
        }
    }

    fn process_defines(&self, arena: &mut TokenArena, tokens: &mut TokenList) {
        let mut any_define = false;
        let mut i = 0;
        while i < tokens.len() {
            if let TokenKind::Identifier {
                resolved: Some(Identifier::Define(define)),
                ..
            } = arena.kind(tokens[i])
            {
                let define = define.clone();
                tokens.remove(i);
                for (k, token) in define.content.iter().enumerate() {
                    let id = arena.push(token.clone());
                    tokens.insert(i + k, id);
                }
                any_define = true;
            }
            i += 1;
        }

        if any_define {
            self.resolve_identifiers(arena, tokens);
        }
    }

    fn process_constants(&self, ctx: &Context, arena: &mut TokenArena, tokens: &mut TokenList) {
        for i in 0..tokens.len() {
            let TokenKind::Identifier { hash, resolved, .. } = arena.kind(tokens[i]) else {
                continue;
            };
            // Locals and names being defined right here shadow constants
            let is_definition = i > 0 && matches!(arena.kind(tokens[i - 1]), TokenKind::VarType);
            if is_definition || ctx.find_local_variable(*hash).is_some() {
                continue;
            }
            let constant = match resolved {
                Some(Identifier::Constant(constant)) => Some(constant.clone()),
                Some(_) => None,
                None => ctx.find_local_constant(*hash).cloned(),
            };
            if let Some(constant) = constant {
                tokens[i] = arena.push(Token::constant(constant.value, constant.data_type));
            }
        }
    }

    // =========================================================================
    // Structure: parentheses and comma separated lists
    // =========================================================================

    fn process_parentheses(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        let mut open: Vec<(ParenthesisType, usize)> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if let TokenKind::Operator(op) = *arena.kind(tokens[i]) {
                match op {
                    Operator::ParenthesisLeft => open.push((ParenthesisType::Parenthesis, i)),
                    Operator::BracketLeft => open.push((ParenthesisType::Bracket, i)),
                    Operator::ParenthesisRight | Operator::BracketRight => {
                        let kind = if op == Operator::ParenthesisRight {
                            ParenthesisType::Parenthesis
                        } else {
                            ParenthesisType::Bracket
                        };
                        let start = match open.last() {
                            Some(&(open_kind, start)) if open_kind == kind => start,
                            _ => return Err(self.error("Parenthesis not matching (too many closed)")),
                        };
                        open.pop();

                        let content: TokenList = tokens.drain(start + 1..i).collect();
                        // Closing token has moved right behind the opening one
                        tokens.remove(start + 1);
                        tokens[start] = arena.push(Token::new(
                            TokenKind::Parenthesis { kind, content },
                            DataType::Void,
                        ));
                        i = start;
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        if !open.is_empty() {
            return Err(self.error("Parenthesis not matching (too many open)"));
        }
        Ok(())
    }

    fn process_comma_separators(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        for i in 0..tokens.len() {
            if matches!(arena.kind(tokens[i]), TokenKind::Parenthesis { .. }) {
                let mut content = take_content(arena, tokens[i]);
                self.process_comma_separators(arena, &mut content)?;
                put_content(arena, tokens[i], content);
            }
        }

        let has_comma = tokens
            .iter()
            .any(|&id| arena[id].is_operator(Operator::CommaSeparator));
        if !has_comma {
            return Ok(());
        }

        let mut lists: Vec<TokenList> = vec![TokenList::new()];
        for &id in tokens.iter() {
            if arena[id].is_operator(Operator::CommaSeparator) {
                lists.push(TokenList::new());
            } else if let Some(last) = lists.last_mut() {
                last.push(id);
            }
        }
        let separated = arena.push(Token::new(TokenKind::CommaSeparated(lists), DataType::Void));
        *tokens = vec![separated];
        Ok(())
    }

    // =========================================================================
    // Per-list passes, children first
    // =========================================================================

    fn process_token_list_recursive(&mut self, ctx: &mut Context, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        // Has to come before the function names are looked at
        self.resolve_address_of_functions(arena, tokens)?;

        for i in 0..tokens.len() {
            match arena.kind(tokens[i]) {
                TokenKind::Parenthesis { .. } => {
                    let mut content = take_content(arena, tokens[i]);
                    self.process_token_list_recursive(ctx, arena, &mut content)?;
                    put_content(arena, tokens[i], content);
                }
                TokenKind::CommaSeparated(_) => {
                    let mut lists = take_lists(arena, tokens[i]);
                    for list in lists.iter_mut() {
                        self.process_token_list_recursive(ctx, arena, list)?;
                    }
                    put_lists(arena, tokens[i], lists);
                }
                _ => {}
            }
        }

        self.process_variable_definitions(ctx, arena, tokens)?;
        self.process_function_calls(ctx, arena, tokens)?;
        self.process_memory_accesses(arena, tokens)?;
        self.process_array_accesses(ctx, arena, tokens)?;
        self.process_explicit_casts(arena, tokens);
        self.process_variables(ctx, arena, tokens)?;
        self.resolve_address_of_memory_accesses(arena, tokens)?;

        self.process_unary_operations(arena, tokens)?;
        self.process_binary_operations(arena, tokens)?;

        self.evaluate_compile_time_constants(arena, tokens)
    }

    fn process_variable_definitions(&mut self, ctx: &mut Context, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        let mut i = 0;
        while i < tokens.len() {
            match arena.kind(tokens[i]) {
                TokenKind::Keyword(Keyword::Function) => {
                    let followed_by_identifier = tokens
                        .get(i + 1)
                        .is_some_and(|&id| matches!(arena.kind(id), TokenKind::Identifier { .. }));
                    if !followed_by_identifier {
                        return Err(self.error("Function keyword must be followed by an identifier"));
                    }
                }
                TokenKind::VarType => {
                    let var_type = arena.data_type(tokens[i]);
                    let Some(&next) = tokens.get(i + 1) else {
                        return Err(self.error("Type name must not be the last token"));
                    };
                    if let TokenKind::Identifier { name, hash, .. } = arena.kind(next) {
                        let (name, hash) = (name.clone(), *hash);
                        if var_type == DataType::Void {
                            return Err(self.error("void variables not allowed"));
                        }
                        if ctx.find_local_variable(hash).is_some() {
                            return Err(self.error(format!("Variable name '{}' already used", name)));
                        }

                        let Some(script) = ctx.function.as_script_mut() else {
                            return Err(CompileError::internal("local variables need a script function"));
                        };
                        let local = match script.local_variable_by_hash(hash) {
                            // Same name in a closed scope, the slot is reused
                            Some(existing) => existing.to_variable(),
                            None => script
                                .add_local_variable(name, var_type)
                                .map_err(|e| self.error(e.to_string()))?
                                .to_variable(),
                        };
                        let variable = Arc::new(local);
                        ctx.local_variables.push(variable.clone());

                        tokens[i] = arena.push(Token::variable(variable));
                        tokens.remove(i + 1);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }

    fn process_function_calls(&mut self, ctx: &Context, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        let globals = self.globals;
        let mut i = 0;
        while i + 1 < tokens.len() {
            let TokenKind::Identifier { name, .. } = arena.kind(tokens[i]) else {
                i += 1;
                continue;
            };
            if !arena[tokens[i + 1]].is_parenthesis(ParenthesisType::Parenthesis) {
                i += 1;
                continue;
            }
            let name = name.clone();

            let mut candidates = globals.functions_by_name(name_hash(&name));
            let mut is_base_call = false;
            let mut base_function = None;

            if candidates.is_empty() {
                if let Some(base_name) = name.strip_prefix("base.") {
                    let current = &ctx.function;
                    if base_name != current.name {
                        return Err(self.error(format!(
                            "Base call '{}' goes to a different function, expected 'base.{}' instead",
                            name, current.name
                        )));
                    }
                    is_base_call = true;
                    candidates = globals.functions_by_name(name_hash(base_name));
                    let signature = current.signature_hash();
                    base_function = candidates
                        .iter()
                        .find(|c| c.function.signature_hash() == signature && c.function.id != current.id)
                        .map(|c| c.function.clone());
                } else {
                    let is_empty_call = matches!(
                        arena.kind(tokens[i + 1]),
                        TokenKind::Parenthesis { content, .. } if content.is_empty()
                    );
                    if let Some(array_name) = name.strip_suffix(".length")
                        && is_empty_call
                        && let Some(array) = self.find_constant_array(ctx, name_hash(array_name))
                    {
                        tokens[i] = arena.push(Token::constant(array.len() as i64, DataType::ConstInt));
                        tokens.remove(i + 1);
                        i += 1;
                        continue;
                    }
                    return Err(self.error(format!("Unknown function name '{}'", name)));
                }
            }

            let content = take_content(arena, tokens[i + 1]);
            let mut parameters = Vec::new();
            if let Some(&first) = content.first() {
                if let TokenKind::CommaSeparated(lists) = arena.kind(first) {
                    for list in lists {
                        if list.len() != 1 {
                            return Err(self.error("Function parameters must be separated by commas"));
                        }
                        if !arena.is_statement(list[0]) {
                            return Err(self.error("Function parameter is no statement"));
                        }
                        parameters.push(list[0]);
                    }
                } else {
                    if content.len() != 1 {
                        return Err(self.error("Function parameter content must be one token"));
                    }
                    if !arena.is_statement(first) {
                        return Err(self.error("Function parameter is no statement"));
                    }
                    parameters.push(first);
                }
            }
            tokens.remove(i + 1);

            let mut parameter_types = Vec::with_capacity(parameters.len());
            for &parameter in &parameters {
                parameter_types.push(self.assign_statement_data_type(arena, parameter, None)?);
            }

            let function = if is_base_call {
                let current = &ctx.function;
                if parameters.len() != current.parameters.len() {
                    return Err(self.error(format!(
                        "Base function call for '{}' has different parameter count",
                        name
                    )));
                }
                let current_types = current.parameter_types();
                if let Some(k) = self.type_casting.first_mismatch(&parameter_types, &current_types) {
                    return Err(self.error(format!(
                        "Can't cast parameters of '{}' function call to match base function, parameter '{}' has the wrong type",
                        name, current.parameters[k].name
                    )));
                }

                match base_function {
                    Some(function) => function,
                    None => {
                        // No base implementation, the call does nothing
                        match current.return_type.class() {
                            DataTypeClass::Void => {
                                tokens.remove(i);
                            }
                            _ => {
                                tokens[i] = arena.push(Token::constant(0, current.return_type));
                            }
                        }
                        return Ok(());
                    }
                }
            } else {
                let mut best: Option<(u32, &FunctionReference)> = None;
                for candidate in candidates {
                    let priority = self
                        .type_casting
                        .parameter_list_priority(&parameter_types, &candidate.function.parameter_types());
                    if best.is_none_or(|(p, _)| priority < p) {
                        best = Some((priority, candidate));
                    }
                }
                let Some((priority, reference)) = best else {
                    return Err(self.error(format!("Unknown function name '{}'", name)));
                };
                if priority >= INVALID_SIGNATURE_PRIORITY {
                    return Err(self.error(format!(
                        "No appropriate function overload found calling '{}', the number or types of parameters passed are wrong",
                        name
                    )));
                }

                if reference.function.flags.contains(FunctionFlags::DEPRECATED) {
                    self.warn(
                        WarningCode::DeprecatedFunction,
                        format!("Call to deprecated function '{}'", reference.function.name),
                    );
                } else if reference.is_deprecated {
                    self.warn(
                        WarningCode::DeprecatedFunctionAlias,
                        format!(
                            "Call to function '{}' using deprecated alias name '{}'",
                            reference.function.name, name
                        ),
                    );
                }
                reference.function.clone()
            };

            let return_type = function.return_type;
            tokens[i] = arena.push(Token::new(
                TokenKind::FunctionCall {
                    function: Some(function),
                    parameters,
                    is_base_call,
                },
                return_type,
            ));
            i += 1;
        }
        Ok(())
    }

    fn warn(&mut self, code: WarningCode, message: String) {
        warn!(line = self.line, "{}", message);
        self.warnings.push(CompilerWarning {
            line: self.line,
            code,
            message,
        });
    }

    fn process_memory_accesses(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        let mut i = 0;
        while i + 1 < tokens.len() {
            if !matches!(arena.kind(tokens[i]), TokenKind::VarType)
                || !arena[tokens[i + 1]].is_parenthesis(ParenthesisType::Bracket)
            {
                i += 1;
                continue;
            }

            let data_type = arena.data_type(tokens[i]);
            let content = take_content(arena, tokens[i + 1]);
            if content.len() != 1 {
                return Err(self.error("Expected exactly one token inside brackets"));
            }
            if !arena.is_statement(content[0]) {
                return Err(self.error("Expected statement token inside brackets"));
            }
            if data_type.semantics() != Some(IntegerSemantics::Default) {
                return Err(self.error(format!(
                    "Memory access is only possible using basic integer types, but not '{}'",
                    data_type
                )));
            }

            let address = content[0];
            tokens[i] = arena.push(Token::new(TokenKind::MemoryAccess { address }, data_type));
            tokens.remove(i + 1);
            self.assign_statement_data_type(arena, address, Some(DataType::U32))?;
            i += 1;
        }
        Ok(())
    }

    fn process_array_accesses(&self, ctx: &Context, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        let globals = self.globals;
        let mut i = 0;
        while i + 1 < tokens.len() {
            let TokenKind::Identifier { name, hash, resolved } = arena.kind(tokens[i]) else {
                i += 1;
                continue;
            };
            if !arena[tokens[i + 1]].is_parenthesis(ParenthesisType::Bracket) {
                i += 1;
                continue;
            }

            // Locals shadow globals of the same name
            let array = if ctx.find_local_variable(*hash).is_some() {
                None
            } else if let Some(array) = ctx.find_local_constant_array(*hash) {
                Some(array.clone())
            } else {
                match resolved {
                    Some(Identifier::ConstantArray(array)) => Some(array.clone()),
                    Some(Identifier::Variable(_)) => None,
                    _ => return Err(CompileError::unresolved_identifier(self.line, name)),
                }
            };
            let Some(array) = array else {
                return Err(self.error(format!("Variable {} can't be followed by the brackets []", name)));
            };

            let content = take_content(arena, tokens[i + 1]);
            if content.len() != 1 {
                return Err(self.error("Expected exactly one token inside brackets"));
            }
            if !arena.is_statement(content[0]) {
                return Err(self.error("Expected statement token inside brackets"));
            }

            let accessor = globals
                .functions_by_name(name_hash(CONSTANT_ARRAY_ACCESS))
                .iter()
                .find(|r| r.function.return_type == array.element_type)
                .map(|r| r.function.clone())
                .ok_or_else(|| {
                    self.error(format!(
                        "Could not find fitting type implementation for constant array {}",
                        array.name
                    ))
                })?;

            let id_token = arena.push(Token::constant(array.id as i64, DataType::U32));
            let parameters = vec![id_token, content[0]];
            for (&parameter, expected) in parameters.iter().zip(accessor.parameter_types()) {
                self.assign_statement_data_type(arena, parameter, Some(expected))?;
            }

            let return_type = accessor.return_type;
            tokens[i] = arena.push(Token::new(
                TokenKind::FunctionCall {
                    function: Some(accessor),
                    parameters,
                    is_base_call: false,
                },
                return_type,
            ));
            tokens.remove(i + 1);
            i += 1;
        }
        Ok(())
    }

    fn process_explicit_casts(&self, arena: &mut TokenArena, tokens: &mut TokenList) {
        let mut i = 0;
        while i + 1 < tokens.len() {
            if matches!(arena.kind(tokens[i]), TokenKind::VarType)
                && arena[tokens[i + 1]].is_parenthesis(ParenthesisType::Parenthesis)
            {
                let target = arena.data_type(tokens[i]);
                let argument = tokens[i + 1];
                tokens[i] = arena.push(Token::new(TokenKind::ValueCast { argument }, target));
                tokens.remove(i + 1);
            }
            i += 1;
        }
    }

    fn process_variables(&self, ctx: &Context, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        for i in 0..tokens.len() {
            let TokenKind::Identifier { name, hash, resolved } = arena.kind(tokens[i]) else {
                continue;
            };
            let variable = match (ctx.find_local_variable(*hash), resolved) {
                (Some(local), _) => local.clone(),
                (None, Some(Identifier::Variable(global))) => global.clone(),
                (None, _) => return Err(CompileError::unresolved_identifier(self.line, name)),
            };
            tokens[i] = arena.push(Token::variable(variable));
        }
        Ok(())
    }

    fn resolve_address_of_functions(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        let globals = self.globals;
        let mut i = 0;
        while i + 1 < tokens.len() {
            if !arena[tokens[i]].is_keyword(Keyword::Addressof) {
                i += 1;
                continue;
            }
            let TokenKind::Parenthesis {
                kind: ParenthesisType::Parenthesis,
                content,
            } = arena.kind(tokens[i + 1])
            else {
                return Err(self.error("addressof must be followed by parentheses"));
            };

            // Anything but a single function name is handled later on
            let [single] = content.as_slice() else {
                i += 1;
                continue;
            };
            let TokenKind::Identifier { name, hash, .. } = arena.kind(*single) else {
                i += 1;
                continue;
            };

            let candidates = globals.functions_by_name(*hash);
            if candidates.is_empty() {
                return Err(self.error(format!("Unknown function '{}' in addressof", name)));
            }
            let address = candidates
                .iter()
                .filter_map(|c| c.function.as_script())
                .find_map(|script| script.address_hooks.first())
                .map(|hook| hook.address)
                .ok_or_else(|| self.error(format!("No address hook found for function '{}'", name)))?;

            tokens[i] = arena.push(Token::constant(address as i64, DataType::U32));
            tokens.remove(i + 1);
            i += 1;
        }
        Ok(())
    }

    fn resolve_address_of_memory_accesses(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        let mut i = 0;
        while i + 1 < tokens.len() {
            if !arena[tokens[i]].is_keyword(Keyword::Addressof) {
                i += 1;
                continue;
            }
            let TokenKind::Parenthesis {
                kind: ParenthesisType::Parenthesis,
                content,
            } = arena.kind(tokens[i + 1])
            else {
                return Err(self.error("addressof must be followed by parentheses"));
            };
            let [single] = content.as_slice() else {
                return Err(self.error("Expected a single token in parentheses after addressof"));
            };
            let TokenKind::MemoryAccess { address } = arena.kind(*single) else {
                return Err(self.error("Unsupported use of addressof"));
            };

            tokens[i] = *address;
            tokens.remove(i + 1);
            i += 1;
        }
        Ok(())
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn process_unary_operations(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        // Postfix increment and decrement, left to right
        let mut i = 1;
        while i < tokens.len() {
            if let TokenKind::Operator(op @ (Operator::UnaryDecrement | Operator::UnaryIncrement)) = *arena.kind(tokens[i])
                && arena.is_statement(tokens[i - 1])
            {
                let argument = tokens[i - 1];
                tokens[i] = arena.push(Token::new(TokenKind::UnaryOperation { op, argument }, DataType::Void));
                tokens.remove(i - 1);
            }
            i += 1;
        }

        // Prefix operators, right to left
        for i in (0..tokens.len()).rev() {
            let TokenKind::Operator(op) = *arena.kind(tokens[i]) else {
                continue;
            };
            match op {
                Operator::BinaryMinus | Operator::UnaryNot | Operator::UnaryBitNot => {
                    if i + 1 == tokens.len() {
                        return Err(self.error("Unary operator not allowed as last"));
                    }
                    // Minus right after a statement is a binary one
                    if op == Operator::BinaryMinus && i > 0 && !matches!(arena.kind(tokens[i - 1]), TokenKind::Operator(_)) {
                        continue;
                    }
                    if !arena.is_statement(tokens[i + 1]) {
                        return Err(self.error("Right of operator is no statement"));
                    }
                }
                Operator::UnaryDecrement | Operator::UnaryIncrement => {
                    if i + 1 == tokens.len() || !arena.is_statement(tokens[i + 1]) {
                        continue;
                    }
                }
                _ => continue,
            }

            let argument = tokens[i + 1];
            tokens[i] = arena.push(Token::new(TokenKind::UnaryOperation { op, argument }, DataType::Void));
            tokens.remove(i + 1);
        }
        Ok(())
    }

    fn process_binary_operations(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        loop {
            let mut best_priority = u8::MAX;
            let mut best_position = 0;

            let len = tokens.len();
            for i in 0..len {
                let TokenKind::Operator(op) = *arena.kind(tokens[i]) else {
                    continue;
                };
                if i == 0 || i + 1 == len || op == Operator::SemicolonSeparator {
                    return Err(self.error(op.not_allowed_message()));
                }

                let priority = op.priority();
                let takes_precedence = if priority == best_priority {
                    op.is_right_associative()
                } else {
                    priority < best_priority
                };
                if takes_precedence {
                    best_priority = priority;
                    best_position = i;
                }
            }

            if best_position == 0 {
                return Ok(());
            }

            let op = match arena.kind(tokens[best_position]) {
                TokenKind::Operator(op) => *op,
                _ => return Err(CompileError::internal("binary reduction lost its operator")),
            };
            let left = tokens[best_position - 1];
            let right = tokens[best_position + 1];
            if !arena.is_statement(left) {
                return Err(self.error(format!("Left of operator {} is no statement", op)));
            }
            if !arena.is_statement(right) {
                return Err(self.error(format!("Right of operator {} is no statement", op)));
            }

            tokens[best_position] = arena.push(Token::new(
                TokenKind::BinaryOperation {
                    op,
                    left,
                    right,
                    function: None,
                },
                DataType::Void,
            ));
            tokens.remove(best_position + 1);
            tokens.remove(best_position - 1);
        }
    }

    // =========================================================================
    // Compile-time evaluation
    // =========================================================================

    fn evaluate_compile_time_constants(&self, arena: &mut TokenArena, tokens: &mut TokenList) -> Result<()> {
        for i in 0..tokens.len() {
            if let Some(replacement) = self.evaluate_compile_time_constants_recursive(arena, tokens[i])? {
                tokens[i] = replacement;
            }
        }
        Ok(())
    }

    /// Returns a replacement token if `id` could be simplified.
    fn evaluate_compile_time_constants_recursive(&self, arena: &mut TokenArena, id: TokenId) -> Result<Option<TokenId>> {
        match arena.kind(id).clone() {
            TokenKind::Parenthesis {
                kind: ParenthesisType::Parenthesis,
                content,
            } => {
                let [inner] = content.as_slice() else {
                    return Ok(None);
                };
                if !arena.is_statement(*inner) {
                    return Ok(None);
                }
                let inner = *inner;
                Ok(Some(self.evaluate_compile_time_constants_recursive(arena, inner)?.unwrap_or(inner)))
            }

            TokenKind::UnaryOperation { op, argument } => {
                let argument = self.replace_child(arena, argument)?;
                if let TokenKind::UnaryOperation { argument: a, .. } = &mut arena[id].kind {
                    *a = argument;
                }

                let Some(value) = integer_constant(arena, argument) else {
                    return Ok(None);
                };
                let result = match op {
                    Operator::BinaryMinus => value.wrapping_neg(),
                    Operator::UnaryNot => (value == 0) as i64,
                    Operator::UnaryBitNot => !value,
                    _ => return Ok(None),
                };
                let data_type = arena.data_type(argument);
                Ok(Some(arena.push(Token::constant(result, data_type))))
            }

            TokenKind::BinaryOperation { op, left, right, .. } => {
                let left = self.replace_child(arena, left)?;
                let right = self.replace_child(arena, right)?;
                if let TokenKind::BinaryOperation { left: l, right: r, .. } = &mut arena[id].kind {
                    *l = left;
                    *r = right;
                }

                let (Some(a), Some(b)) = (integer_constant(arena, left), integer_constant(arena, right)) else {
                    return Ok(None);
                };
                let Some(result) = fold_binary(op, a, b) else {
                    return Ok(None);
                };
                let data_type = arena.data_type(left);
                Ok(Some(arena.push(Token::constant(result, data_type))))
            }

            TokenKind::FunctionCall { function, parameters, .. } => {
                let mut all_constant = true;
                let mut evaluated = Vec::with_capacity(parameters.len());
                for parameter in parameters {
                    let parameter = self.replace_child(arena, parameter)?;
                    all_constant &= matches!(arena.kind(parameter), TokenKind::Constant(_));
                    evaluated.push(parameter);
                }
                if let TokenKind::FunctionCall { parameters, .. } = &mut arena[id].kind {
                    *parameters = evaluated.clone();
                }

                let Some(function) = function else {
                    return Ok(None);
                };
                if !all_constant
                    || !function.flags.contains(FunctionFlags::COMPILE_TIME_CONSTANT)
                    || function.parameters.len() != evaluated.len()
                {
                    return Ok(None);
                }
                let Some(native) = function.as_native() else {
                    return Ok(None);
                };

                let mut arguments = Vec::with_capacity(evaluated.len());
                for (&parameter, expected) in evaluated.iter().zip(&function.parameters) {
                    let value = arena.constant_value(parameter).unwrap_or_default();
                    let value = self
                        .type_casting
                        .cast_constant_value(value, arena.data_type(parameter), expected.data_type)
                        .ok_or_else(|| self.error("Invalid cast of constants"))?;
                    arguments.push(value);
                }

                match native.call(&arguments) {
                    Some(result) => {
                        let data_type = arena.data_type(id);
                        Ok(Some(arena.push(Token::constant(result, data_type))))
                    }
                    None => Ok(None),
                }
            }

            _ => Ok(None),
        }
    }

    fn replace_child(&self, arena: &mut TokenArena, child: TokenId) -> Result<TokenId> {
        Ok(self
            .evaluate_compile_time_constants_recursive(arena, child)?
            .unwrap_or(child))
    }

    // =========================================================================
    // Data types
    // =========================================================================

    fn assign_statement_data_types(&self, arena: &mut TokenArena, tokens: &TokenList, result_type: Option<DataType>) -> Result<()> {
        for &id in tokens {
            if arena.is_statement(id) {
                self.assign_statement_data_type(arena, id, result_type)?;
            }
        }
        Ok(())
    }

    /// Assigns types bottom-up and inserts implicit casts. Returns the
    /// statement's resulting type.
    fn assign_statement_data_type(&self, arena: &mut TokenArena, id: TokenId, result_type: Option<DataType>) -> Result<DataType> {
        match arena.kind(id).clone() {
            TokenKind::Constant(_) => {
                if arena.data_type(id).class() == DataTypeClass::Integer {
                    arena[id].data_type = match result_type {
                        Some(t) if t.class() == DataTypeClass::Integer => t,
                        _ => DataType::ConstInt,
                    };
                }
            }

            TokenKind::Parenthesis { content, .. } => {
                let [inner] = content.as_slice() else {
                    return Err(self.error("Parenthesis content must be one token"));
                };
                if !arena.is_statement(*inner) {
                    return Err(self.error("Parenthesis content must be a statement"));
                }
                let data_type = self.assign_statement_data_type(arena, *inner, result_type)?;
                arena[id].data_type = data_type;
            }

            TokenKind::UnaryOperation { argument, .. } => {
                let data_type = self.assign_statement_data_type(arena, argument, result_type)?;
                arena[id].data_type = data_type;
            }

            TokenKind::BinaryOperation { op, left, right, .. } => {
                let op_type = op.operator_type();
                let expected = if op_type == OperatorType::Symmetric { result_type } else { None };

                let left_type = self.assign_statement_data_type(arena, left, expected)?;
                let right_expected = if op_type == OperatorType::Assignment {
                    Some(left_type)
                } else {
                    expected
                };
                let right_type = self.assign_statement_data_type(arena, right, right_expected)?;

                let signature = self
                    .type_casting
                    .best_operator_signature(op, left_type, right_type)
                    .or_else(|| {
                        (op == Operator::Assign && left_type == right_type)
                            .then(|| BinaryOperatorSignature::new(left_type, left_type, left_type))
                    })
                    .ok_or_else(|| {
                        self.error(format!(
                            "Cannot apply binary operator {} between types '{}' and '{}'",
                            op, left_type, right_type
                        ))
                    })?;

                arena[id].data_type = signature.result;
                if op_type != OperatorType::Trinary {
                    let left = self.insert_cast_if_necessary(arena, left, signature.left);
                    let right = self.insert_cast_if_necessary(arena, right, signature.right);
                    if let TokenKind::BinaryOperation { left: l, right: r, .. } = &mut arena[id].kind {
                        *l = left;
                        *r = right;
                    }
                }
            }

            TokenKind::ValueCast { argument } => {
                let target = arena.data_type(id);
                self.assign_statement_data_type(arena, argument, Some(target))?;
                let original = arena.data_type(argument);
                if !self.type_casting.can_explicitly_cast(original, target) {
                    return Err(self.error(format!(
                        "Explicit cast not possible from {} to {}",
                        original, target
                    )));
                }
            }

            // Variables, calls and memory accesses carry their type already
            _ => {}
        }
        Ok(arena.data_type(id))
    }

    fn insert_cast_if_necessary(&self, arena: &mut TokenArena, id: TokenId, target: DataType) -> TokenId {
        match self.type_casting.cast_handling(arena.data_type(id), target) {
            CastHandling::BaseCast(_) => arena.push(Token::new(TokenKind::ValueCast { argument: id }, target)),
            CastHandling::NoCast | CastHandling::Invalid => id,
        }
    }

    fn find_constant_array(&self, ctx: &Context, hash: u64) -> Option<Arc<ConstantArray>> {
        if let Some(array) = ctx.find_local_constant_array(hash) {
            return Some(array.clone());
        }
        match self.globals.resolve_identifier(hash) {
            Some(Identifier::ConstantArray(array)) => Some(array.clone()),
            _ => None,
        }
    }
}

fn take_content(arena: &mut TokenArena, id: TokenId) -> TokenList {
    match &mut arena[id].kind {
        TokenKind::Parenthesis { content, .. } => std::mem::take(content),
        _ => TokenList::new(),
    }
}

fn put_content(arena: &mut TokenArena, id: TokenId, list: TokenList) {
    if let TokenKind::Parenthesis { content, .. } = &mut arena[id].kind {
        *content = list;
    }
}

fn take_lists(arena: &mut TokenArena, id: TokenId) -> Vec<TokenList> {
    match &mut arena[id].kind {
        TokenKind::CommaSeparated(lists) => std::mem::take(lists),
        _ => Vec::new(),
    }
}

fn put_lists(arena: &mut TokenArena, id: TokenId, lists: Vec<TokenList>) {
    if let TokenKind::CommaSeparated(l) = &mut arena[id].kind {
        *l = lists;
    }
}

fn integer_constant(arena: &TokenArena, id: TokenId) -> Option<i64> {
    if arena.data_type(id).class() != DataTypeClass::Integer {
        return None;
    }
    arena.constant_value(id)
}

/// Integer folding used for constant subexpressions. Division and modulo
/// by zero give 0, as they do at runtime.
fn fold_binary(op: Operator, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        Operator::BinaryPlus => a.wrapping_add(b),
        Operator::BinaryMinus => a.wrapping_sub(b),
        Operator::BinaryMultiply => a.wrapping_mul(b),
        Operator::BinaryDivide => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
        Operator::BinaryModulo => {
            if b == 0 {
                0
            } else {
                a.wrapping_rem(b)
            }
        }
        Operator::BinaryShiftLeft => a.wrapping_shl(b as u32),
        Operator::BinaryShiftRight => a.wrapping_shr(b as u32),
        Operator::BinaryAnd => a & b,
        Operator::BinaryOr => a | b,
        Operator::BinaryXor => a ^ b,
        _ => return None,
    })
}
