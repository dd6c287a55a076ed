use crate::error::PeripheralError;

/// Named sub-range of bits within a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    pub name: String,
    pub lsb: u32,
    pub width: u32,
    pub description: Option<String>,
}

impl Bitfield {
    pub fn msb(&self) -> u32 {
        self.lsb + self.width - 1
    }
}

/// Sort the fields by position and reject any that overlap or spill
/// past the register width.
pub fn check_fit(
    register: &str,
    bits: u32,
    fields: &mut [Bitfield],
) -> Result<(), PeripheralError> {
    fields.sort_by_key(|field| field.lsb);
    for field in fields.iter() {
        if field.msb() >= bits {
            return Err(PeripheralError::BitfieldRange {
                register: register.to_owned(),
                field: field.name.clone(),
                width: bits,
            });
        }
    }
    for pair in fields.windows(2) {
        if pair[1].lsb <= pair[0].msb() {
            return Err(PeripheralError::BitfieldOverlap {
                register: register.to_owned(),
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }
    }
    Ok(())
}
