use log::debug;

use crate::error::PeripheralError;
use crate::formater::{camel_case, sanitize, snake_case};
use crate::host::{AddressSpace, FieldType, Perms, StructField};
use crate::peripheral::Peripheral;
use crate::register::Register;
use crate::ImportOptions;

/// Concrete artifacts reconciled for one peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub peripheral: String,
    pub base: u64,
    /// false when an equal segment already existed and was reused
    pub segment_created: bool,
    pub type_name: String,
    pub comments: usize,
}

/// Reconcile one peripheral into the target address space: segment,
/// structure type, type binding, comments. Each step converges toward
/// the desired state instead of blindly creating, so re-imports leave
/// the space unchanged.
pub fn map_peripheral(
    space: &mut dyn AddressSpace,
    per: &Peripheral,
    opts: &ImportOptions,
) -> Result<Binding, PeripheralError> {
    let segment_created = reconcile_segment(space, per)?;

    let type_name = camel_case(&sanitize(&per.name));
    let fields = struct_fields(per);
    space.define_struct_type(&type_name, &fields)?;
    space.apply_type_at(per.base, &type_name)?;

    let mut comments = 0;
    if opts.comments {
        for reg in &per.registers {
            space.set_comment(per.base + reg.offset, &register_comment(reg))?;
            comments += 1;
        }
    }

    debug!(
        "{}: {} at {:#x}, {} registers, {} comments",
        per.name,
        if segment_created { "segment created" } else { "segment reused" },
        per.base,
        per.registers.len(),
        comments,
    );
    Ok(Binding {
        peripheral: per.name.clone(),
        base: per.base,
        segment_created,
        type_name,
        comments,
    })
}

fn reconcile_segment(
    space: &mut dyn AddressSpace,
    per: &Peripheral,
) -> Result<bool, PeripheralError> {
    match space.find_segment_at(per.base) {
        Some(seg) if seg.base == per.base && seg.len == per.range => Ok(false),
        Some(seg) => Err(PeripheralError::MappingConflict {
            base: per.base,
            end: per.base + per.range,
            found_base: seg.base,
            found_end: seg.end(),
        }),
        None => {
            // peripherals are MMIO, mapped data but never code
            space.create_segment(per.base, per.range, Perms::READ | Perms::WRITE)?;
            Ok(true)
        }
    }
}

/// Mirror the register layout as structure fields: one scalar per
/// register at its exact offset, reserved fillers for the gaps, so the
/// structure covers the peripheral's whole range.
pub fn struct_fields(per: &Peripheral) -> Vec<StructField> {
    let mut fields = Vec::with_capacity(per.registers.len());
    let mut cursor = 0u64;
    let mut gaps = 0usize;
    // registers come offset sorted out of the builder
    for reg in &per.registers {
        if reg.offset > cursor {
            fields.push(pad(gaps, cursor, reg.offset - cursor));
            gaps += 1;
        }
        fields.push(StructField {
            name: snake_case(&sanitize(&reg.name)),
            offset: reg.offset,
            ty: FieldType::Scalar(reg.width),
        });
        cursor = reg.end();
    }
    if cursor < per.range {
        fields.push(pad(gaps, cursor, per.range - cursor));
    }
    fields
}

fn pad(index: usize, offset: u64, len: u64) -> StructField {
    StructField {
        name: format!("_reserved{index}"),
        offset,
        ty: FieldType::Reserved(len),
    }
}

fn register_comment(reg: &Register) -> String {
    let mut text = format!("{} [{},{}]", reg.name, reg.access.label(), reg.width.bits());
    if let Some(desc) = &reg.description {
        text.push(' ');
        text.push_str(desc);
    }
    for field in &reg.bitfields {
        text.push('\n');
        if field.width == 1 {
            text.push_str(&format!("[{}] {}", field.lsb, field.name));
        } else {
            text.push_str(&format!("[{}:{}] {}", field.msb(), field.lsb, field.name));
        }
        if let Some(desc) = &field.description {
            text.push(' ');
            text.push_str(desc);
        }
    }
    text
}
