use std::collections::BTreeSet;

use crate::host::{AddressSpace, FieldType, HostError, Perms, Segment, StructField};

/// Renders an import as a Binary Ninja Python script instead of
/// mutating a live database. Targets a fresh view, so segment lookups
/// always miss and every peripheral takes the create path.
#[derive(Debug, Default)]
pub struct ScriptSpace {
    lines: Vec<String>,
    types: BTreeSet<String>,
}

impl ScriptSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self) -> String {
        let mut script = String::from(
            "from binaryninja.enums import SegmentFlag\n\
             from binaryninja.types import StructureBuilder, Type\n\n",
        );
        for line in &self.lines {
            script.push_str(line);
            script.push('\n');
        }
        script
    }
}

fn py_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn py_type(ty: &FieldType) -> String {
    match ty {
        FieldType::Scalar(scalar) => format!("Type.int({}, False)", scalar.bytes()),
        FieldType::Reserved(len) => {
            format!("Type.array(Type.int(1, False), {len:#x})")
        }
    }
}

impl AddressSpace for ScriptSpace {
    fn create_segment(&mut self, base: u64, len: u64, perms: Perms) -> Result<(), HostError> {
        if len == 0 {
            return Err(HostError::EmptySegment(base));
        }
        let mut flags = Vec::new();
        if perms.contains(Perms::READ) {
            flags.push("SegmentFlag.SegmentReadable");
        }
        if perms.contains(Perms::WRITE) {
            flags.push("SegmentFlag.SegmentWritable");
        }
        if perms.contains(Perms::EXECUTE) {
            flags.push("SegmentFlag.SegmentExecutable");
        }
        self.lines.push(format!(
            "bv.add_user_segment({base:#x}, {len:#x}, 0, 0, {})",
            flags.join(" | "),
        ));
        Ok(())
    }

    fn find_segment_at(&self, _addr: u64) -> Option<Segment> {
        None
    }

    fn define_struct_type(
        &mut self,
        name: &str,
        fields: &[StructField],
    ) -> Result<(), HostError> {
        self.lines.push("_t = StructureBuilder.create()".into());
        for field in fields {
            self.lines.push(format!(
                "_t.add_member_at_offset({}, {}, {:#x})",
                py_str(&field.name),
                py_type(&field.ty),
                field.offset,
            ));
        }
        self.lines.push(format!(
            "bv.define_user_type({}, _t.immutable_copy())",
            py_str(name),
        ));
        self.types.insert(name.to_owned());
        Ok(())
    }

    fn apply_type_at(&mut self, addr: u64, type_name: &str) -> Result<(), HostError> {
        if !self.types.contains(type_name) {
            return Err(HostError::UnknownType(type_name.to_owned()));
        }
        self.lines.push(format!(
            "bv.define_user_data_var({addr:#x}, bv.get_type_by_name({}))",
            py_str(type_name),
        ));
        Ok(())
    }

    fn set_comment(&mut self, addr: u64, text: &str) -> Result<(), HostError> {
        self.lines
            .push(format!("bv.set_comment_at({addr:#x}, {})", py_str(text)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::DataType;

    #[test]
    fn renders_the_expected_calls() {
        let mut space = ScriptSpace::new();
        space
            .create_segment(0x4000_4000, 0x100, Perms::READ | Perms::WRITE)
            .unwrap();
        let fields = [
            StructField {
                name: "ctrl".into(),
                offset: 0,
                ty: FieldType::Scalar(DataType::U32),
            },
            StructField {
                name: "_reserved0".into(),
                offset: 4,
                ty: FieldType::Reserved(0xfc),
            },
        ];
        space.define_struct_type("UART", &fields).unwrap();
        space.apply_type_at(0x4000_4000, "UART").unwrap();
        space
            .set_comment(0x4000_4000, "CTRL [rw,32] line one\nline \"two\"")
            .unwrap();

        let script = space.render();
        assert!(script.contains(
            "bv.add_user_segment(0x40004000, 0x100, 0, 0, \
             SegmentFlag.SegmentReadable | SegmentFlag.SegmentWritable)"
        ));
        assert!(script.contains(
            "_t.add_member_at_offset(\"ctrl\", Type.int(4, False), 0x0)"
        ));
        assert!(script.contains(
            "_t.add_member_at_offset(\"_reserved0\", \
             Type.array(Type.int(1, False), 0xfc), 0x4)"
        ));
        assert!(script.contains("bv.define_user_type(\"UART\", _t.immutable_copy())"));
        assert!(script
            .contains("bv.define_user_data_var(0x40004000, bv.get_type_by_name(\"UART\"))"));
        assert!(script.contains(
            "bv.set_comment_at(0x40004000, \"CTRL [rw,32] line one\\nline \\\"two\\\"\")"
        ));
        assert!(space.apply_type_at(0x1000, "MISSING").is_err());
    }
}
