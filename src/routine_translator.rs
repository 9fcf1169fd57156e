//! Translation of one routine definition into a [`Cfg`].

use crate::block_translator::{BlockInfo, BlockInfoMap, BlockTranslator, PhiObligation};
use crate::cfg::{Block, Cfg, IdAllocator, Posd, RawCfg, Terminator};
use crate::debug_metadata::propagate_debug_annotations;
use crate::errors::TranslationError;
use crate::handle_registry::HandleRegistry;
use crate::ir::{Definition, Instr, Module};
use crate::log::*;
use crate::register_types::RegisterTypeInferencer;
use crate::source_location::Position;
use crate::structuring::CfgStructurer;
use crate::translation_config::TranslationConfig;
use crate::types::TypeLifter;

/// Translates the definitions of one module, against a fully populated handle registry.
pub struct RoutineTranslator<'a> {
    pub module: &'a Module,
    pub handles: &'a HandleRegistry,
    pub lifter: &'a dyn TypeLifter,
    pub structurer: &'a dyn CfgStructurer,
    pub config: &'a TranslationConfig,
}

impl<'a> RoutineTranslator<'a> {
    pub fn translate(&self, def: &Definition) -> Result<Cfg, TranslationError> {
        let symbol = &def.symbol;
        debug!("Translating routine"; "symbol" => %symbol, "blocks" => def.blocks.len());

        let handle = self.handles.resolve(symbol)?;
        let first = def
            .blocks
            .first()
            .ok_or_else(|| TranslationError::EmptyBody {
                symbol: symbol.clone(),
            })?;

        let mut alloc = IdAllocator::new();
        let entry = alloc.fresh_label();
        let block_info = build_block_info(def, &mut alloc)?;
        let first_label = first
            .label
            .as_ref()
            .and_then(|l| block_info.get(l))
            .map(|info| info.label)
            .ok_or_else(|| TranslationError::MissingEntryLabel {
                symbol: symbol.clone(),
            })?;
        let ident_map = RegisterTypeInferencer {
            symbol,
            module: self.module,
            handles: self.handles,
            lifter: self.lifter,
        }
        .infer(def, &handle, &mut alloc)?;
        let annotations = propagate_debug_annotations(def, &self.module.metadata, self.config);

        let mut blocks = vec![Block {
            label: entry,
            source_label: None,
            stmts: vec![],
            terminator: Posd::new(Position::Internal, Terminator::Jump(first_label)),
        }];
        let mut temporaries = vec![];

        let translator = BlockTranslator {
            symbol,
            module: self.module,
            handles: self.handles,
            lifter: self.lifter,
            block_info: &block_info,
            ident_map: &ident_map,
            annotations: &annotations,
            config: self.config,
        };
        let mut cursor = Position::Internal;
        for bb in &def.blocks {
            let label = match bb.label.as_ref().and_then(|l| block_info.get(l)) {
                Some(info) => info.label,
                None => alloc.fresh_label(),
            };
            let lowered = translator.lower(bb, label, cursor, &mut alloc)?;
            cursor = lowered.cursor;
            blocks.extend(lowered.blocks);
            temporaries.extend(lowered.temporaries);
        }

        let mut registers = ident_map.into_registers();
        registers.extend(temporaries);
        registers.sort_by_key(|r| r.id);

        let raw = RawCfg {
            handle,
            entry,
            blocks,
            registers,
        };
        if self.config.debug_print_lowered_blocks {
            trace!("Lowered blocks"; "symbol" => %symbol, "raw" => ?raw.blocks);
        }
        Ok(self.structurer.structure(raw))
    }
}

/// Give every labelled block of `def` a target label, and collect the phi assignments each edge
/// into it must perform.
pub fn build_block_info(
    def: &Definition,
    alloc: &mut IdAllocator,
) -> Result<BlockInfoMap, TranslationError> {
    let symbol = &def.symbol;
    let mut map = BlockInfoMap::new();
    for bb in &def.blocks {
        if let Some(l) = &bb.label {
            let info = BlockInfo {
                label: alloc.fresh_label(),
                phi_obligations: Default::default(),
            };
            if map.insert(l.clone(), info).is_some() {
                return Err(TranslationError::Malformed {
                    symbol: symbol.clone(),
                    detail: format!("block label `{}` defined more than once", l),
                });
            }
        }
    }

    for bb in &def.blocks {
        let phis = bb.stmts.iter().filter_map(|s| match (&s.result, &s.instr) {
            (Some(target), Instr::Phi { ty, incoming }) => Some((target, ty, incoming)),
            _ => None,
        });
        for (target, ty, incoming) in phis {
            let label = match &bb.label {
                Some(l) => l,
                None => {
                    return Err(TranslationError::Malformed {
                        symbol: symbol.clone(),
                        detail: format!("phi `{}` in an unlabeled block", target),
                    })
                }
            };
            for (source, pred) in incoming {
                if !map.contains_key(pred) {
                    return Err(TranslationError::UndefinedBlock {
                        symbol: symbol.clone(),
                        label: pred.clone(),
                    });
                }
                let obligations = map
                    .get_mut(label)
                    .map(|info| info.phi_obligations.entry(pred.clone()).or_default());
                if let Some(obligations) = obligations {
                    // A predecessor may be listed more than once, always with the same value
                    if !obligations.iter().any(|ob| &ob.target == target) {
                        obligations.push(PhiObligation {
                            target: target.clone(),
                            ty: ty.clone(),
                            source: source.clone(),
                        });
                    }
                }
            }
        }
    }
    trace!("Built block info"; "symbol" => %symbol, "blocks" => map.len());
    Ok(map)
}
