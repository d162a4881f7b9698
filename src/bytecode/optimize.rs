//! Opcode optimizer.
//!
//! Rewrites one function's opcode array in place. A round runs these phases
//! in a fixed order:
//!
//! - A: peephole rules on same-line pairs until nothing changes
//! - B: jump chains collapse onto their final target
//! - C: conditional jumps on a pushed constant become plain jumps
//! - D: jumps to `RETURN` / `EXTERNAL_JUMP` become a copy of the target
//! - E: opcodes unreachable from index 0 and the labels become NOPs
//! - F: jumps that only skip NOPs are dropped
//! - G: NOPs are removed and all jump targets and labels are remapped
//!
//! Rounds repeat until one leaves opcodes and labels unchanged, so the
//! output is a fixed point.

use tracing::{debug, trace, warn};

use crate::bytecode::ir::{Label, ScriptFunction};
use crate::bytecode::verify::{self, VerifyError};
use crate::bytecode::{Opcode, OpcodeFlags, OpcodeType};
use crate::lang::base_type::{BaseCastType, BaseType};

/// Scratch buffers reused across optimizer calls. Each concurrent
/// optimization needs its own workspace.
#[derive(Debug, Default)]
pub struct OptimizerWorkspace {
    jump_targets: Vec<bool>,
    index_remap: Vec<usize>,
    open_seeds: Vec<usize>,
}

impl OptimizerWorkspace {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizerStats {
    pub rounds: u32,
    pub opcodes_before: usize,
    pub opcodes_after: usize,
    pub peephole_rewrites: usize,
    pub jumps_shortened: usize,
    pub branches_folded: usize,
    pub terminals_inlined: usize,
    pub unreachable_removed: usize,
    pub redundant_jumps_removed: usize,
}

pub fn optimize_function(
    function: &mut ScriptFunction,
    workspace: &mut OptimizerWorkspace,
    max_rounds: u32,
) -> Result<OptimizerStats, VerifyError> {
    optimize_opcodes(&mut function.opcodes, &mut function.labels, workspace, max_rounds)
}

/// Optimizes `opcodes` and `labels` in place.
///
/// Input must end in `RETURN` or `EXTERNAL_JUMP` and have all jump targets
/// and label offsets in range; otherwise nothing is touched and
/// [`VerifyError::InvalidInput`] is returned. An empty list is left alone.
pub fn optimize_opcodes(
    opcodes: &mut Vec<Opcode>,
    labels: &mut [Label],
    workspace: &mut OptimizerWorkspace,
    max_rounds: u32,
) -> Result<OptimizerStats, VerifyError> {
    let mut stats = OptimizerStats {
        opcodes_before: opcodes.len(),
        opcodes_after: opcodes.len(),
        ..OptimizerStats::default()
    };
    if opcodes.is_empty() {
        return Ok(stats);
    }
    verify::check_input(opcodes, labels).map_err(VerifyError::invalid_input)?;

    let mut optimizer = Optimizer {
        opcodes: &mut *opcodes,
        labels: &mut *labels,
        ws: &mut *workspace,
        stats: &mut stats,
    };
    let max_rounds = max_rounds.max(1);
    loop {
        let previous_opcodes = optimizer.opcodes.clone();
        let previous_offsets: Vec<u32> = optimizer.labels.iter().map(|l| l.offset).collect();

        optimizer.run_round();
        optimizer.stats.rounds += 1;

        let unchanged = *optimizer.opcodes == previous_opcodes
            && optimizer.labels.iter().map(|l| l.offset).eq(previous_offsets);
        if unchanged {
            break;
        }
        if optimizer.stats.rounds >= max_rounds {
            warn!(rounds = max_rounds, "opcode optimizer stopped before reaching a fixed point");
            break;
        }
    }

    stats.opcodes_after = opcodes.len();
    debug!(
        before = stats.opcodes_before,
        after = stats.opcodes_after,
        rounds = stats.rounds,
        peephole = stats.peephole_rewrites,
        jumps_shortened = stats.jumps_shortened,
        branches_folded = stats.branches_folded,
        unreachable = stats.unreachable_removed,
        "optimized opcodes"
    );
    Ok(stats)
}

struct Optimizer<'a> {
    opcodes: &'a mut Vec<Opcode>,
    labels: &'a mut [Label],
    ws: &'a mut OptimizerWorkspace,
    stats: &'a mut OptimizerStats,
}

impl Optimizer<'_> {
    fn run_round(&mut self) {
        self.peephole();
        self.collapse_jump_chains();
        self.fold_constant_branches();
        self.inline_jumps_to_terminals();
        self.remove_unreachable();
        self.remove_redundant_jumps();
        self.cleanup_nops();
        trace!(len = self.opcodes.len(), "optimizer round done");
    }

    // =========================================================================
    // Phase A: peephole
    // =========================================================================

    fn peephole(&mut self) {
        loop {
            self.mark_jump_targets();
            let mut changed = false;

            for i in 0..self.opcodes.len() - 1 {
                let (first, second) = (self.opcodes[i], self.opcodes[i + 1]);
                if first.line != second.line || self.ws.jump_targets[i + 1] {
                    continue;
                }

                // comparison results are boolean already
                if first.kind.is_comparison() && second.kind == OpcodeType::MakeBool {
                    self.opcodes[i + 1].kind = OpcodeType::Nop;
                    self.stats.peephole_rewrites += 1;
                    changed = true;
                    continue;
                }

                if first.kind == OpcodeType::PushConstant && second.kind == OpcodeType::CastValue {
                    let folded = u8::try_from(second.parameter)
                        .ok()
                        .and_then(|cast| BaseCastType(cast).fold_integer_constant(first.parameter));
                    if let Some(value) = folded {
                        self.opcodes[i].parameter = value;
                        self.opcodes[i + 1].kind = OpcodeType::Nop;
                        self.stats.peephole_rewrites += 1;
                        changed = true;
                    }
                }
            }

            self.cleanup_nops();
            if !changed {
                break;
            }
        }
    }

    /// Every index that is a jump parameter or a label offset.
    fn mark_jump_targets(&mut self) {
        let len = self.opcodes.len();
        let targets = &mut self.ws.jump_targets;
        targets.clear();
        targets.resize(len, false);

        for op in self.opcodes.iter() {
            if let Some(target) = op.jump_target() {
                if target < len {
                    targets[target] = true;
                }
            }
        }
        for label in self.labels.iter() {
            if let Some(slot) = targets.get_mut(label.offset as usize) {
                *slot = true;
            }
        }
    }

    // =========================================================================
    // Phase B: jump chains
    // =========================================================================

    fn collapse_jump_chains(&mut self) {
        let len = self.opcodes.len();
        for i in 0..len {
            if !self.opcodes[i].kind.is_jump() {
                continue;
            }
            let mut position = self.opcodes[i].parameter as usize;
            if self.opcodes[position].kind != OpcodeType::Jump {
                continue;
            }

            // chains longer than the function are cycles; leave them alone
            let mut steps = 0;
            while self.opcodes[position].kind == OpcodeType::Jump && steps <= len {
                position = self.opcodes[position].parameter as usize;
                steps += 1;
            }
            if steps > len {
                continue;
            }
            let target = position;

            let mut current = i;
            while current != target {
                let next = self.opcodes[current].parameter as usize;
                self.opcodes[current].parameter = target as i64;
                current = next;
            }
            self.stats.jumps_shortened += 1;
        }
    }

    // =========================================================================
    // Phase C: constant conditions
    // =========================================================================

    fn fold_constant_branches(&mut self) {
        for i in 0..self.opcodes.len() - 1 {
            if self.opcodes[i].kind != OpcodeType::PushConstant {
                continue;
            }

            let next = self.opcodes[i + 1];
            let cond_position = match next.kind {
                OpcodeType::JumpConditional => i + 1,
                OpcodeType::Jump
                    if self.opcodes[next.parameter as usize].kind == OpcodeType::JumpConditional =>
                {
                    next.parameter as usize
                }
                _ => continue,
            };

            let cond = self.opcodes[cond_position];
            let mut target = if self.opcodes[i].parameter != 0 {
                cond_position as i64 + 1
            } else {
                cond.parameter
            };
            if self.opcodes[target as usize].kind == OpcodeType::Jump {
                target = self.opcodes[target as usize].parameter;
            }

            let op = &mut self.opcodes[i];
            op.kind = OpcodeType::Jump;
            op.data_type = BaseType::Void;
            op.flags |= OpcodeFlags::CTRLFLOW | OpcodeFlags::JUMP | OpcodeFlags::SEQ_BREAK;
            op.parameter = target;
            op.line = cond.line;
            self.stats.branches_folded += 1;
        }
    }

    // =========================================================================
    // Phase D: jumps to terminals
    // =========================================================================

    fn inline_jumps_to_terminals(&mut self) {
        for i in 0..self.opcodes.len() {
            if self.opcodes[i].kind != OpcodeType::Jump {
                continue;
            }
            let target = self.opcodes[self.opcodes[i].parameter as usize];
            if target.kind.is_terminal() {
                self.opcodes[i] = target;
                self.stats.terminals_inlined += 1;
            }
        }
    }

    // =========================================================================
    // Phase E: reachability
    // =========================================================================

    fn remove_unreachable(&mut self) {
        let last = self.opcodes.len() - 1;
        for op in &mut self.opcodes[..last] {
            op.flags.insert(OpcodeFlags::TEMP_FLAG);
        }
        // the terminal is never removed
        self.opcodes[last].flags.remove(OpcodeFlags::TEMP_FLAG);

        let seeds = &mut self.ws.open_seeds;
        seeds.clear();
        seeds.push(0);
        seeds.extend(self.labels.iter().map(|l| l.offset as usize));

        while let Some(mut position) = seeds.pop() {
            while let Some(op) = self.opcodes.get_mut(position) {
                if !op.flags.contains(OpcodeFlags::TEMP_FLAG) {
                    break;
                }
                op.flags.remove(OpcodeFlags::TEMP_FLAG);
                match op.kind {
                    OpcodeType::Jump => position = op.parameter as usize,
                    OpcodeType::JumpConditional | OpcodeType::JumpSwitch => {
                        seeds.push(op.parameter as usize);
                        position += 1;
                    }
                    // flag is cleared, so the walk ends here
                    OpcodeType::Return | OpcodeType::ExternalJump => {}
                    _ => position += 1,
                }
            }
        }

        for op in self.opcodes.iter_mut() {
            if op.flags.contains(OpcodeFlags::TEMP_FLAG) {
                op.flags.remove(OpcodeFlags::TEMP_FLAG);
                if op.kind != OpcodeType::Nop {
                    op.kind = OpcodeType::Nop;
                    self.stats.unreachable_removed += 1;
                }
            }
        }
    }

    // =========================================================================
    // Phase F: jumps over NOPs
    // =========================================================================

    fn remove_redundant_jumps(&mut self) {
        let len = self.opcodes.len();
        if len < 3 {
            return;
        }

        let mut i = 0;
        while i < len - 1 {
            let op = self.opcodes[i];
            if op.kind.is_jump() {
                let target = op.parameter as usize;
                let mut position = i + 1;
                if target >= position {
                    while position < len - 1 && self.opcodes[position].kind == OpcodeType::Nop {
                        position += 1;
                    }

                    if target <= position {
                        let op = &mut self.opcodes[i];
                        if op.kind == OpcodeType::JumpConditional {
                            // the condition still has to be popped
                            op.kind = OpcodeType::MoveStack;
                            op.data_type = BaseType::Void;
                            op.parameter = -1;
                            op.flags = OpcodeFlags::NEW_LINE;
                        } else {
                            op.kind = OpcodeType::Nop;
                        }
                        self.stats.redundant_jumps_removed += 1;
                        i = position - 1;
                    }
                }
            }
            i += 1;
        }
    }

    // =========================================================================
    // Phase G: NOP compaction
    // =========================================================================

    fn cleanup_nops(&mut self) {
        let len = self.opcodes.len();
        let remap = &mut self.ws.index_remap;
        remap.clear();
        remap.reserve(len);

        let mut new_size = 0;
        for op in self.opcodes.iter() {
            remap.push(new_size);
            if op.kind != OpcodeType::Nop {
                new_size += 1;
            }
        }
        if new_size == len {
            return;
        }

        // the terminal always survives, so this is never negative
        let last = new_size.saturating_sub(1);
        let relocate = |target: usize| if target < len { remap[target] } else { last };

        self.opcodes.retain(|op| op.kind != OpcodeType::Nop);
        for op in self.opcodes.iter_mut() {
            if op.kind.has_jump_target() {
                op.parameter = relocate(op.parameter as usize) as i64;
            }
        }
        for label in self.labels.iter_mut() {
            label.offset = relocate(label.offset as usize) as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::AddressHook;

    fn at(op: Opcode, line: u32) -> Opcode {
        op.with_line(line)
    }

    fn get_var() -> Opcode {
        Opcode::new(OpcodeType::GetVariableValue, 0x1000_0000).with_data_type(BaseType::U32)
    }

    fn label(name: &str, offset: u32) -> Label {
        Label {
            name: name.to_string(),
            offset,
            address_hooks: Vec::<AddressHook>::new(),
        }
    }

    fn run(opcodes: &mut Vec<Opcode>, labels: &mut [Label]) -> OptimizerStats {
        let mut ws = OptimizerWorkspace::new();
        optimize_opcodes(opcodes, labels, &mut ws, 16).unwrap()
    }

    fn kinds(opcodes: &[Opcode]) -> Vec<OpcodeType> {
        opcodes.iter().map(|op| op.kind).collect()
    }

    // =========================================================================
    // Phase A
    // =========================================================================

    #[test]
    fn test_constant_cast_is_folded() {
        // u32 -> u8
        let mut ops = vec![
            Opcode::push_constant(300),
            Opcode::new(OpcodeType::CastValue, 0x08),
            Opcode::ret(),
        ];
        run(&mut ops, &mut []);
        assert_eq!(kinds(&ops), vec![OpcodeType::PushConstant, OpcodeType::Return]);
        assert_eq!(ops[0].parameter, 44);
    }

    #[test]
    fn test_signed_up_cast_sign_extends() {
        // s8 -> s16
        let mut ops = vec![
            Opcode::push_constant(0xffff),
            Opcode::new(OpcodeType::CastValue, 0x11),
            Opcode::ret(),
        ];
        run(&mut ops, &mut []);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].parameter, -1);
    }

    #[test]
    fn test_float_cast_is_kept() {
        let mut ops = vec![
            Opcode::push_constant(3),
            Opcode::new(OpcodeType::CastValue, 0x22),
            Opcode::ret(),
        ];
        run(&mut ops, &mut []);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].parameter, 3);
    }

    #[test]
    fn test_make_bool_after_comparison_removed() {
        let mut ops = vec![
            Opcode::new(OpcodeType::CompareEq, 0).with_data_type(BaseType::U8),
            Opcode::new(OpcodeType::MakeBool, 0),
            Opcode::ret(),
        ];
        run(&mut ops, &mut []);
        assert_eq!(kinds(&ops), vec![OpcodeType::CompareEq, OpcodeType::Return]);
    }

    #[test]
    fn test_peephole_needs_same_line() {
        let mut ops = vec![
            at(Opcode::push_constant(300), 1),
            at(Opcode::new(OpcodeType::CastValue, 0x08), 2),
            at(Opcode::ret(), 2),
        ];
        run(&mut ops, &mut []);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].parameter, 300);
    }

    #[test]
    fn test_peephole_skips_jump_targets() {
        let mut ops = vec![
            Opcode::push_constant(300),
            Opcode::new(OpcodeType::CastValue, 0x08),
            Opcode::ret(),
        ];
        let mut labels = vec![label("entry", 1)];
        run(&mut ops, &mut labels);
        assert_eq!(kinds(&ops)[1], OpcodeType::CastValue);
        assert_eq!(ops[0].parameter, 300);
        assert_eq!(labels[0].offset, 1);
    }

    // =========================================================================
    // Phases B-F
    // =========================================================================

    #[test]
    fn test_jump_chain_collapses() {
        let mut ops = vec![
            at(get_var(), 1),
            at(Opcode::jump_conditional(4), 1),
            at(Opcode::push_constant(1), 2),
            at(Opcode::new(OpcodeType::MoveStack, -1), 2),
            at(Opcode::jump(5), 3),
            at(Opcode::jump(7), 4),
            at(Opcode::push_constant(2), 5),
            at(Opcode::push_constant(3), 6),
            at(Opcode::ret(), 7),
        ];
        let stats = run(&mut ops, &mut []);

        assert_eq!(
            kinds(&ops),
            vec![
                OpcodeType::GetVariableValue,
                OpcodeType::JumpConditional,
                OpcodeType::PushConstant,
                OpcodeType::MoveStack,
                OpcodeType::PushConstant,
                OpcodeType::Return,
            ]
        );
        assert_eq!(ops[1].parameter, 4);
        assert_eq!(ops[4].parameter, 3);
        assert!(stats.jumps_shortened >= 1);
    }

    #[test]
    fn test_jump_to_jump_to_return() {
        let mut ops = vec![Opcode::jump(1), Opcode::jump(2), Opcode::ret()];
        run(&mut ops, &mut []);
        // the jump chain ends in RETURN, so the head becomes a RETURN itself
        assert_eq!(kinds(&ops), vec![OpcodeType::Return, OpcodeType::Return]);
    }

    #[test]
    fn test_jump_cycle_does_not_hang() {
        let mut ops = vec![
            at(get_var(), 1),
            at(Opcode::jump_conditional(4), 1),
            at(Opcode::jump(3), 2),
            at(Opcode::jump(2), 3),
            at(Opcode::ret(), 4),
        ];
        run(&mut ops, &mut []);
        // the two-jump loop shrinks to a jump onto itself
        assert_eq!(
            kinds(&ops),
            vec![
                OpcodeType::GetVariableValue,
                OpcodeType::JumpConditional,
                OpcodeType::Jump,
                OpcodeType::Return,
            ]
        );
        assert_eq!(ops[1].parameter, 3);
        assert_eq!(ops[2].parameter, 2);
    }

    #[test]
    fn test_constant_true_condition_falls_through() {
        let mut ops = vec![
            at(Opcode::push_constant(1), 1),
            at(Opcode::jump_conditional(4), 1),
            at(Opcode::push_constant(7), 2),
            at(Opcode::jump(5), 2),
            at(Opcode::push_constant(9), 3),
            at(Opcode::ret(), 4),
        ];
        let stats = run(&mut ops, &mut []);
        assert_eq!(
            kinds(&ops),
            vec![OpcodeType::PushConstant, OpcodeType::Return, OpcodeType::Return]
        );
        assert_eq!(ops[0].parameter, 7);
        assert_eq!(stats.branches_folded, 1);
    }

    #[test]
    fn test_constant_false_condition_takes_branch() {
        let mut ops = vec![
            at(Opcode::push_constant(0), 1),
            at(Opcode::jump_conditional(4), 1),
            at(Opcode::push_constant(7), 2),
            at(Opcode::jump(5), 2),
            at(Opcode::push_constant(9), 3),
            at(Opcode::ret(), 4),
        ];
        run(&mut ops, &mut []);
        assert_eq!(kinds(&ops), vec![OpcodeType::PushConstant, OpcodeType::Return]);
        assert_eq!(ops[0].parameter, 9);
    }

    #[test]
    fn test_constant_through_jump_to_condition() {
        // while(true) style: constant, jump to the shared condition check
        let mut ops = vec![
            at(Opcode::push_constant(0), 1),
            at(Opcode::jump(4), 1),
            at(Opcode::push_constant(5), 2),
            at(Opcode::ret(), 2),
            at(Opcode::jump_conditional(2), 3),
            at(Opcode::push_constant(6), 4),
            at(Opcode::ret(), 4),
        ];
        run(&mut ops, &mut []);
        assert_eq!(ops[0].kind, OpcodeType::PushConstant);
        assert_eq!(ops[0].parameter, 5);
        assert_eq!(ops[1].kind, OpcodeType::Return);
    }

    #[test]
    fn test_dead_code_removed_and_label_remapped() {
        let mut ops = vec![
            Opcode::jump(3),
            Opcode::push_constant(1),
            Opcode::push_constant(2),
            Opcode::ret(),
        ];
        let mut labels = vec![label("end", 3)];
        run(&mut ops, &mut labels);
        assert_eq!(kinds(&ops), vec![OpcodeType::Return, OpcodeType::Return]);
        assert_eq!(labels[0].offset, 1);
    }

    #[test]
    fn test_label_keeps_code_alive() {
        let mut ops = vec![
            at(Opcode::jump(3), 1),
            at(Opcode::push_constant(1), 2),
            at(Opcode::new(OpcodeType::MoveStack, -1), 2),
            at(Opcode::push_constant(4), 3),
            at(Opcode::ret(), 3),
        ];
        let mut labels = vec![label("side_entry", 1)];
        run(&mut ops, &mut labels);
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[0].kind, OpcodeType::Jump);
        assert_eq!(ops[0].parameter, 3);
        assert_eq!(labels[0].offset, 1);
    }

    #[test]
    fn test_conditional_jump_to_next_pops_condition() {
        let mut ops = vec![
            at(get_var(), 1),
            at(Opcode::jump_conditional(2), 1),
            at(Opcode::push_constant(3), 2),
            at(Opcode::ret(), 2),
        ];
        run(&mut ops, &mut []);
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[1].kind, OpcodeType::MoveStack);
        assert_eq!(ops[1].parameter, -1);
        assert_eq!(ops[1].data_type, BaseType::Void);
        assert_eq!(ops[1].flags, OpcodeFlags::NEW_LINE);
    }

    #[test]
    fn test_jump_switch_targets_stay_reachable() {
        let mut ops = vec![
            at(get_var(), 1),
            at(Opcode::new(OpcodeType::JumpSwitch, 4), 1),
            at(Opcode::new(OpcodeType::MoveVarStack, -1), 1),
            at(Opcode::ret(), 1),
            at(Opcode::push_constant(9), 2),
            at(Opcode::ret(), 2),
        ];
        run(&mut ops, &mut []);
        assert_eq!(ops.len(), 6);
        assert_eq!(ops[1].parameter, 4);
        assert_eq!(ops[4].parameter, 9);
    }

    #[test]
    fn test_jump_switch_target_remapped() {
        let mut ops = vec![
            at(get_var(), 1),
            at(Opcode::new(OpcodeType::JumpSwitch, 5), 1),
            at(Opcode::new(OpcodeType::MoveVarStack, -1), 1),
            at(Opcode::ret(), 1),
            at(Opcode::push_constant(8), 2),
            at(Opcode::push_constant(9), 3),
            at(Opcode::ret(), 3),
        ];
        run(&mut ops, &mut []);
        // the unreachable constant before the switch target is gone
        assert_eq!(ops.len(), 6);
        assert_eq!(ops[1].parameter, 4);
        assert_eq!(ops[4].parameter, 9);
    }

    // =========================================================================
    // Input handling and fixed point
    // =========================================================================

    #[test]
    fn test_empty_input_is_left_alone() {
        let mut ops = Vec::new();
        let stats = run(&mut ops, &mut []);
        assert_eq!(stats.rounds, 0);
        assert!(ops.is_empty());
    }

    #[test]
    fn test_invalid_input_rejected_untouched() {
        let mut ops = vec![Opcode::jump(7), Opcode::ret()];
        let mut ws = OptimizerWorkspace::new();
        let err = optimize_opcodes(&mut ops, &mut [], &mut ws, 16).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidInput(_)));
        assert_eq!(ops[0].parameter, 7);

        let mut ops = vec![Opcode::push_constant(1)];
        let err = optimize_opcodes(&mut ops, &mut [], &mut ws, 16).unwrap_err();
        assert!(err.to_string().contains("expected RETURN"));
    }

    #[test]
    fn test_result_is_fixed_point() {
        let mut ops = vec![
            at(Opcode::push_constant(1), 1),
            at(Opcode::jump_conditional(4), 1),
            at(Opcode::push_constant(7), 2),
            at(Opcode::jump(5), 2),
            at(Opcode::push_constant(9), 3),
            at(Opcode::ret(), 4),
        ];
        let mut labels = vec![label("l", 4)];
        run(&mut ops, &mut labels);
        let once = (ops.clone(), labels.clone());

        let stats = run(&mut ops, &mut labels);
        assert_eq!((ops, labels), once);
        assert_eq!(stats.rounds, 1);
        assert!(verify::verify_optimized(&once.0, &once.1).is_ok());
    }

    #[test]
    fn test_workspace_is_reusable() {
        let mut ws = OptimizerWorkspace::new();
        let mut a = vec![Opcode::jump(3), Opcode::nop(), Opcode::nop(), Opcode::ret()];
        let mut b = vec![
            Opcode::new(OpcodeType::CompareLt, 0),
            Opcode::new(OpcodeType::MakeBool, 0),
            Opcode::ret(),
        ];
        optimize_opcodes(&mut a, &mut [], &mut ws, 16).unwrap();
        optimize_opcodes(&mut b, &mut [], &mut ws, 16).unwrap();
        assert_eq!(kinds(&a), vec![OpcodeType::Return, OpcodeType::Return]);
        assert_eq!(kinds(&b), vec![OpcodeType::CompareLt, OpcodeType::Return]);
    }

    #[test]
    fn test_optimize_function_uses_labels() {
        let mut function = ScriptFunction::new(vec![
            Opcode::jump(3),
            Opcode::push_constant(1),
            Opcode::push_constant(2),
            Opcode::ret(),
        ]);
        function.add_label("end", 3, Vec::new());
        let mut ws = OptimizerWorkspace::new();
        let stats = optimize_function(&mut function, &mut ws, 16).unwrap();
        assert_eq!(stats.opcodes_before, 4);
        assert_eq!(stats.opcodes_after, 2);
        assert_eq!(function.labels[0].offset, 1);
    }
}
