use std::collections::BTreeMap;

use log::warn;

use crate::error::{ModelError, PeripheralError};
use crate::field::Bitfield;
use crate::formater::indexed;
use crate::helper::{align_up, DataType};
use crate::parser::{Declaration, RegPos};
use crate::register::{self, Access, Register};
use crate::{Failure, SEGMENT_GRANULE};

/// Fully resolved peripheral instance: one concrete base address, a
/// validated register layout and the aligned span it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    pub name: String,
    pub base: u64,
    pub range: u64,
    pub description: Option<String>,
    pub registers: Vec<Register>,
}

/// Builder output: the concrete peripherals ready for mapping plus the
/// per-peripheral rejections collected along the way.
#[derive(Debug, Default)]
pub struct ModelOutput {
    pub peripherals: Vec<Peripheral>,
    pub rejected: Vec<Failure>,
}

// register as declared, before offsets and arrays are resolved
#[derive(Debug)]
struct RawReg {
    width: DataType,
    pos: RegPos,
    span: u64,
    access: Access,
    name: Option<String>,
    description: Option<String>,
    bitfields: Vec<Bitfield>,
}

#[derive(Debug, Default)]
struct TreeFrame {
    name: String,
    description: Option<String>,
    bases: Vec<u64>,
    regs: Vec<RawReg>,
}

/// Build the semantic model from the declaration stream. Fatal
/// structural problems abort with a [`ModelError`]; problems scoped to
/// one peripheral land in [`ModelOutput::rejected`].
pub fn build(decls: &[Declaration]) -> Result<ModelOutput, ModelError> {
    let mut out = ModelOutput::default();
    let mut stack: Vec<TreeFrame> = Vec::new();
    // peripheral name -> base, for duplicate detection
    let mut seen: BTreeMap<String, u64> = BTreeMap::new();

    for decl in decls {
        match decl {
            Declaration::TreeBegin { name, description } => {
                stack.push(TreeFrame {
                    name: name.clone(),
                    description: description.clone(),
                    ..TreeFrame::default()
                });
            }
            Declaration::TreeEnd => {
                let Some(frame) = stack.pop() else {
                    return Err(ModelError::OutsideTree("tree.end"));
                };
                finalize(frame, &stack, &mut out, &mut seen)?;
            }
            Declaration::Base { addrs } => {
                let Some(frame) = stack.last_mut() else {
                    return Err(ModelError::OutsideTree("base"));
                };
                frame.bases.extend_from_slice(addrs);
            }
            Declaration::Reg {
                width,
                pos,
                span,
                access,
                name,
                description,
            } => {
                let Some(frame) = stack.last_mut() else {
                    return Err(ModelError::OutsideTree("group"));
                };
                frame.regs.push(RawReg {
                    width: *width,
                    pos: *pos,
                    span: *span,
                    access: *access,
                    name: name.clone(),
                    description: description.clone(),
                    bitfields: vec![],
                });
            }
            Declaration::Line { text } => {
                let reg = stack
                    .last_mut()
                    .and_then(|frame| frame.regs.last_mut())
                    .ok_or(ModelError::DanglingAnnotation("line"))?;
                // the format often names a register on the line that
                // follows it
                if reg.name.is_none() {
                    reg.name = Some(text.clone());
                } else if reg.description.is_none() {
                    reg.description = Some(text.clone());
                }
            }
            Declaration::Bitfld {
                lsb,
                msb,
                name,
                description,
            } => {
                let reg = stack
                    .last_mut()
                    .and_then(|frame| frame.regs.last_mut())
                    .ok_or(ModelError::DanglingAnnotation("bitfld"))?;
                reg.bitfields.push(Bitfield {
                    name: name.clone(),
                    lsb: *lsb,
                    width: msb - lsb + 1,
                    description: description.clone(),
                });
            }
        }
    }
    // the parser keeps trees balanced, nothing can be left open here
    Ok(out)
}

fn finalize(
    frame: TreeFrame,
    stack: &[TreeFrame],
    out: &mut ModelOutput,
    seen: &mut BTreeMap<String, u64>,
) -> Result<(), ModelError> {
    if frame.regs.is_empty() {
        // name-prefix only tree
        return Ok(());
    }
    let full_name = stack
        .iter()
        .map(|parent| parent.name.as_str())
        .chain([frame.name.as_str()])
        .collect::<Vec<_>>()
        .join("_");

    let bases = if frame.bases.is_empty() {
        // with no base statement the first absolute register anchors
        // the block
        let Some(addr) = frame.regs.iter().find_map(|reg| match reg.pos {
            RegPos::Absolute(addr) => Some(addr),
            RegPos::Relative(_) => None,
        }) else {
            return Err(ModelError::NoBase(full_name));
        };
        vec![addr]
    } else {
        frame.bases.clone()
    };
    let base0 = bases[0];

    // expand register arrays and resolve offsets against the first
    // instance base
    let mut regs = Vec::new();
    let mut layout_err = None;
    for raw in &frame.regs {
        let Some(name) = raw.name.as_ref() else {
            warn!("{full_name}: skipping unnamed register declaration");
            continue;
        };
        let offset = match raw.pos {
            RegPos::Relative(offset) => offset,
            RegPos::Absolute(addr) => match addr.checked_sub(base0) {
                Some(offset) => offset,
                None => {
                    layout_err = Some(PeripheralError::RegisterBelowBase {
                        register: name.clone(),
                        address: addr,
                        base: base0,
                    });
                    continue;
                }
            },
        };
        let width_bytes = raw.width.bytes();
        let total = raw.span + 1;
        if total % width_bytes != 0 {
            return Err(ModelError::MisalignedArray {
                name: name.clone(),
                span: raw.span,
                width: raw.width.bits(),
            });
        }
        let count = total / width_bytes;
        for index in 0..count {
            regs.push(Register {
                name: if count > 1 {
                    indexed(name, index as usize)
                } else {
                    name.clone()
                },
                offset: offset + index * width_bytes,
                width: raw.width,
                access: raw.access,
                description: raw.description.clone(),
                bitfields: raw.bitfields.clone(),
            });
        }
    }
    if regs.is_empty() && layout_err.is_none() {
        warn!("{full_name}: no usable registers, nothing to map");
        return Ok(());
    }
    if layout_err.is_none() {
        layout_err = register::validate_layout(&mut regs).err();
    }
    let range = align_up(
        regs.iter().map(Register::end).max().unwrap_or(1),
        SEGMENT_GRANULE,
    );

    for (index, &base) in bases.iter().enumerate() {
        let name = if bases.len() > 1 {
            indexed(&full_name, index)
        } else {
            full_name.clone()
        };
        if let Some(&existing) = seen.get(&name) {
            if existing != base {
                out.rejected.push(Failure {
                    peripheral: name,
                    error: PeripheralError::DuplicateName { existing },
                });
                continue;
            }
            // same name at the same base re-declares the layout, the
            // later declaration wins
            out.peripherals.retain(|per| per.name != name);
        }
        if base % SEGMENT_GRANULE != 0 {
            out.rejected.push(Failure {
                peripheral: name,
                error: PeripheralError::UnalignedBase {
                    base,
                    granule: SEGMENT_GRANULE,
                },
            });
            continue;
        }
        if let Some(err) = layout_err.clone() {
            out.rejected.push(Failure {
                peripheral: name,
                error: err,
            });
            continue;
        }
        seen.insert(name.clone(), base);
        out.peripherals.push(Peripheral {
            name,
            base,
            range,
            description: frame.description.clone(),
            registers: regs.clone(),
        });
    }
    Ok(())
}
