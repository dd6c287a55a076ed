use std::io::Write;

use per2map::host::{FieldType, Perms};
use per2map::{
    import_per, import_per_file, AddressSpace, Error, ImportOptions, MemorySpace, PeripheralError,
};

const SAMPLE: &str = r#"
; sample peripheral description
tree "UART"
  base d:0x40004000 d:0x40008000
  group.long 0x00++0x3 "CTRL" "Control register"
  bitfld 0 "EN" "enable"
  bitfld 4..6 "MODE"
  group.long 0x04++0x3 r "STAT"
  group.byte 0x10++0x3 "FIFO"
tree.end
tree "WDT"
  base 0x40010000
  group.word 0x00++0x1 w "FEED"
  group.long 0x04++0x3 "TIMEOUT"
  line.long 04 "Timeout value"
tree.end
"#;

#[test]
fn full_import() {
    let mut space = MemorySpace::new();
    let report = import_per(SAMPLE, &mut space, &ImportOptions::default()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.mapped(), 3);

    // two uart instances plus the watchdog
    let bases: Vec<_> = space.segments().iter().map(|seg| seg.base).collect();
    assert_eq!(bases, [0x4000_4000, 0x4000_8000, 0x4001_0000]);
    for seg in space.segments() {
        assert_eq!(seg.perms, Perms::READ | Perms::WRITE);
    }

    // the FIFO group spans four byte registers, layout is identical in
    // both instances
    for name in ["UART0", "UART1"] {
        let fields = space.struct_type(name).unwrap();
        let named: Vec<_> = fields
            .iter()
            .filter(|f| !f.name.starts_with("_reserved"))
            .map(|f| (f.name.as_str(), f.offset))
            .collect();
        assert_eq!(
            named,
            [
                ("ctrl", 0x00),
                ("stat", 0x04),
                ("fifo0", 0x10),
                ("fifo1", 0x11),
                ("fifo2", 0x12),
                ("fifo3", 0x13),
            ]
        );
        let total: u64 = fields.iter().map(|f| f.ty.len()).sum();
        assert_eq!(total, 0x100);
    }
    assert_eq!(space.type_at(0x4000_4000), Some("UART0"));
    assert_eq!(space.type_at(0x4000_8000), Some("UART1"));
    assert_eq!(space.type_at(0x4001_0000), Some("WDT"));

    let ctrl = space.comment_at(0x4000_4000).unwrap();
    assert_eq!(ctrl, "CTRL [rw,32] Control register\n[0] EN enable\n[6:4] MODE");
    assert_eq!(
        space.comment_at(0x4001_0004),
        Some("TIMEOUT [rw,32] Timeout value")
    );
    assert_eq!(space.comment_at(0x4001_0000), Some("FEED [w,16]"));
}

#[test]
fn double_import_is_idempotent() {
    let mut once = MemorySpace::new();
    import_per(SAMPLE, &mut once, &ImportOptions::default()).unwrap();

    let mut twice = MemorySpace::new();
    import_per(SAMPLE, &mut twice, &ImportOptions::default()).unwrap();
    let report = import_per(SAMPLE, &mut twice, &ImportOptions::default()).unwrap();

    assert!(report.is_clean());
    assert_eq!(once, twice);
}

#[test]
fn partial_failure_keeps_the_good_peripheral() {
    let src = r#"
tree "BROKEN"
  base 0x40000000
  group.long 0x00++0x3 "REG_A"
  group.long 0x02++0x3 "REG_B"
tree.end
tree "TIMER"
  base 0x40001000
  group.long 0x00++0x3 "COUNT"
tree.end
"#;
    let mut space = MemorySpace::new();
    let report = import_per(src, &mut space, &ImportOptions::default()).unwrap();

    assert_eq!(report.mapped(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].peripheral, "BROKEN");
    assert_eq!(
        report.failures[0].error,
        PeripheralError::Overlap {
            first: "REG_A".into(),
            second: "REG_B".into(),
        }
    );

    // the healthy peripheral made it into the space, the broken one
    // left no trace
    assert!(space.find_segment_at(0x4000_1000).is_some());
    assert!(space.find_segment_at(0x4000_0000).is_none());
    assert!(space.struct_type("TIMER").is_some());
    assert!(space.struct_type("BROKEN").is_none());
}

#[test]
fn changed_description_replaces_the_comment() {
    let before = "tree \"T\"\nbase 0x1000\ngroup.long 0x0++0x3 \"CTRL\" \"old text\"\ntree.end\n";
    let after = "tree \"T\"\nbase 0x1000\ngroup.long 0x0++0x3 \"CTRL\" \"new text\"\ntree.end\n";

    let mut space = MemorySpace::new();
    import_per(before, &mut space, &ImportOptions::default()).unwrap();
    assert_eq!(space.comment_at(0x1000), Some("CTRL [rw,32] old text"));

    import_per(after, &mut space, &ImportOptions::default()).unwrap();
    assert_eq!(space.comment_at(0x1000), Some("CTRL [rw,32] new text"));
    assert_eq!(space.comments().count(), 1);
    assert_eq!(space.segments().len(), 1);
}

#[test]
fn comment_toggle() {
    let mut space = MemorySpace::new();
    let opts = ImportOptions {
        comments: false,
        ..ImportOptions::default()
    };
    let report = import_per(SAMPLE, &mut space, &opts).unwrap();
    assert_eq!(report.mapped(), 3);
    assert_eq!(space.comments().count(), 0);
    assert_eq!(space.segments().len(), 3);
    assert!(space.struct_type("WDT").is_some());
}

#[test]
fn conflicting_existing_segment_is_reported() {
    let mut space = MemorySpace::new();
    space
        .create_segment(0x4001_0000, 0x80, Perms::READ)
        .unwrap();
    let report = import_per(SAMPLE, &mut space, &ImportOptions::default()).unwrap();
    assert_eq!(report.mapped(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].peripheral, "WDT");
    assert!(matches!(
        report.failures[0].error,
        PeripheralError::MappingConflict { .. }
    ));
}

#[test]
fn import_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let mut space = MemorySpace::new();
    let report =
        import_per_file(file.path(), &mut space, &ImportOptions::default()).unwrap();
    assert_eq!(report.mapped(), 3);

    let missing = import_per_file(
        file.path().with_extension("missing"),
        &mut MemorySpace::new(),
        &ImportOptions::default(),
    );
    assert!(matches!(missing, Err(Error::Io(_))));
}

#[test]
fn parse_failure_leaves_the_space_untouched() {
    let src = "tree \"T\"\nbase 0x1000\ngroup.long 0x0++0x3 \"CTRL\"\n";
    let mut space = MemorySpace::new();
    let err = import_per(src, &mut space, &ImportOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
    assert_eq!(space, MemorySpace::new());
}

#[test]
fn struct_fields_expose_scalar_widths() {
    let src = "tree \"T\"\nbase 0x1000\ngroup.quad 0x0++0x7 \"WIDE\"\ntree.end\n";
    let mut space = MemorySpace::new();
    import_per(src, &mut space, &ImportOptions::default()).unwrap();
    let fields = space.struct_type("T").unwrap();
    assert!(matches!(fields[0].ty, FieldType::Scalar(ty) if ty.bytes() == 8));
}
