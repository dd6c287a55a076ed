use crate::error::{ParseError, ParseErrorKind};
use crate::helper::{parse_number, DataType};
use crate::register::Access;

/// Position of a register declaration: either relative to the owning
/// tree's base address or spelled absolute as `(base+offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegPos {
    Absolute(u64),
    Relative(u64),
}

/// One structural record of the input file, in declaration order. No
/// semantic resolution happens here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    TreeBegin {
        name: String,
        description: Option<String>,
    },
    TreeEnd,
    Base {
        addrs: Vec<u64>,
    },
    Reg {
        width: DataType,
        pos: RegPos,
        span: u64,
        access: Access,
        name: Option<String>,
        description: Option<String>,
    },
    /// annotation line for the most recent register
    Line {
        text: String,
    },
    Bitfld {
        lsb: u32,
        msb: u32,
        name: String,
        description: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    Str(String),
}

struct CondFrame {
    line: usize,
    // a previous sif/elif in this block already selected its lines
    matched: bool,
    active: bool,
}

/// Parse `.per` source into declaration records.
///
/// `cpu` selects `sif`/`elif` branches; with `None` every condition
/// matches, so the first branch of each block wins. Tree structure and
/// base addresses are tracked regardless of conditionals so that blocks
/// stay balanced even when their body lines are filtered out.
pub fn parse(src: &str, cpu: Option<&str>) -> Result<Vec<Declaration>, ParseError> {
    let mut decls = Vec::new();
    let mut conds: Vec<CondFrame> = Vec::new();
    let mut open_trees: Vec<usize> = Vec::new();

    for (index, raw) in src.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        // conditionals work on the raw line, the condition text is not
        // token shaped
        if let Some(cond) = trimmed.strip_prefix("sif ") {
            let matches = condition_matches(cond, cpu);
            conds.push(CondFrame {
                line,
                matched: matches,
                active: matches,
            });
            continue;
        }
        if let Some(cond) = trimmed.strip_prefix("elif ") {
            let Some(frame) = conds.pop() else {
                return Err(ParseError {
                    line,
                    kind: ParseErrorKind::UnbalancedConditional("elif"),
                });
            };
            let matches = !frame.matched && condition_matches(cond, cpu);
            conds.push(CondFrame {
                line: frame.line,
                matched: frame.matched || matches,
                active: matches,
            });
            continue;
        }
        match trimmed.split_whitespace().next() {
            Some("else") => {
                let Some(frame) = conds.pop() else {
                    return Err(ParseError {
                        line,
                        kind: ParseErrorKind::UnbalancedConditional("else"),
                    });
                };
                conds.push(CondFrame {
                    line: frame.line,
                    matched: true,
                    active: !frame.matched,
                });
                continue;
            }
            Some("endif") => {
                if conds.pop().is_none() {
                    return Err(ParseError {
                        line,
                        kind: ParseErrorKind::UnbalancedConditional("endif"),
                    });
                }
                continue;
            }
            _ => {}
        }

        let active = conds.iter().all(|frame| frame.active);
        let toks = tokenize(trimmed, line)?;
        let Some(Tok::Word(keyword)) = toks.first() else {
            continue;
        };

        match keyword.as_str() {
            "tree" => {
                let mut strings = toks[1..].iter().filter_map(|tok| match tok {
                    Tok::Str(s) => Some(s),
                    Tok::Word(_) => None,
                });
                let Some(name) = strings.next() else {
                    return Err(ParseError {
                        line,
                        kind: ParseErrorKind::BadDeclaration {
                            keyword: "tree",
                            reason: "expected a quoted name",
                        },
                    });
                };
                open_trees.push(line);
                decls.push(Declaration::TreeBegin {
                    name: name.clone(),
                    description: strings.next().cloned(),
                });
            }
            "tree.end" => {
                if open_trees.pop().is_none() {
                    return Err(ParseError {
                        line,
                        kind: ParseErrorKind::UnbalancedTree,
                    });
                }
                decls.push(Declaration::TreeEnd);
            }
            "base" => {
                if !active {
                    continue;
                }
                let mut addrs = Vec::new();
                for tok in &toks[1..] {
                    let Tok::Word(word) = tok else {
                        return Err(ParseError {
                            line,
                            kind: ParseErrorKind::BadDeclaration {
                                keyword: "base",
                                reason: "expected an address",
                            },
                        });
                    };
                    addrs.push(number(word, line)?);
                }
                if addrs.is_empty() {
                    return Err(ParseError {
                        line,
                        kind: ParseErrorKind::BadDeclaration {
                            keyword: "base",
                            reason: "expected at least one address",
                        },
                    });
                }
                decls.push(Declaration::Base { addrs });
            }
            word if word.starts_with("group.") => {
                if !active {
                    continue;
                }
                decls.push(parse_group(word, &toks[1..], line)?);
            }
            word if word.starts_with("line.") => {
                if !active {
                    continue;
                }
                // only the quoted text matters, the offset column is
                // presentation data
                if let Some(Tok::Str(text)) = toks[1..]
                    .iter()
                    .find(|tok| matches!(tok, Tok::Str(_)))
                {
                    decls.push(Declaration::Line { text: text.clone() });
                }
            }
            "bitfld" => {
                if !active {
                    continue;
                }
                decls.push(parse_bitfld(&toks[1..], line)?);
            }
            // the format carries plenty of presentation widgets this
            // importer has no use for, skip them
            _ => {}
        }
    }

    if let Some(line) = open_trees.pop() {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::UnterminatedTree,
        });
    }
    if let Some(frame) = conds.pop() {
        return Err(ParseError {
            line: frame.line,
            kind: ParseErrorKind::UnterminatedConditional,
        });
    }
    Ok(decls)
}

fn parse_group(word: &str, rest: &[Tok], line: usize) -> Result<Declaration, ParseError> {
    let suffix = &word["group.".len()..];
    let Some(width) = DataType::from_keyword(suffix) else {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::BadWidth(suffix.to_owned()),
        });
    };

    let Some(Tok::Word(position)) = rest.first() else {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::BadDeclaration {
                keyword: "group",
                reason: "expected an offset",
            },
        });
    };
    let Some((pos, span)) = position.split_once("++") else {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::BadDeclaration {
                keyword: "group",
                reason: "expected a `++` span",
            },
        });
    };
    let span = number(span, line)?;
    let pos = if let Some(inner) = pos.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
        let addr = match inner.split_once('+') {
            Some((base, offset)) => number(base, line)? + number(offset, line)?,
            None => number(inner, line)?,
        };
        RegPos::Absolute(addr)
    } else {
        RegPos::Relative(number(pos, line)?)
    };

    let mut access = Access::default();
    let mut name = None;
    let mut description = None;
    for tok in &rest[1..] {
        match tok {
            Tok::Word(word) => {
                let Some(parsed) = Access::from_keyword(word) else {
                    return Err(ParseError {
                        line,
                        kind: ParseErrorKind::BadDeclaration {
                            keyword: "group",
                            reason: "unexpected token",
                        },
                    });
                };
                access = parsed;
            }
            Tok::Str(text) if name.is_none() => name = Some(text.clone()),
            Tok::Str(text) if description.is_none() => description = Some(text.clone()),
            Tok::Str(_) => {}
        }
    }

    Ok(Declaration::Reg {
        width,
        pos,
        span,
        access,
        name,
        description,
    })
}

fn parse_bitfld(rest: &[Tok], line: usize) -> Result<Declaration, ParseError> {
    let Some(Tok::Word(range)) = rest.first() else {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::BadDeclaration {
                keyword: "bitfld",
                reason: "expected a bit position",
            },
        });
    };
    let (lsb, msb) = match range.split_once("..") {
        Some((lsb, msb)) => (bit_index(lsb, line)?, bit_index(msb, line)?),
        None => {
            let bit = bit_index(range, line)?;
            (bit, bit)
        }
    };
    if msb < lsb {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::BadDeclaration {
                keyword: "bitfld",
                reason: "bit range is reversed",
            },
        });
    }

    let mut strings = rest[1..].iter().filter_map(|tok| match tok {
        Tok::Str(s) => Some(s),
        Tok::Word(_) => None,
    });
    let Some(name) = strings.next() else {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::BadDeclaration {
                keyword: "bitfld",
                reason: "expected a quoted name",
            },
        });
    };
    Ok(Declaration::Bitfld {
        lsb,
        msb,
        name: name.clone(),
        description: strings.next().cloned(),
    })
}

fn number(token: &str, line: usize) -> Result<u64, ParseError> {
    parse_number(token).ok_or_else(|| ParseError {
        line,
        kind: ParseErrorKind::BadNumber(token.to_owned()),
    })
}

fn bit_index(token: &str, line: usize) -> Result<u32, ParseError> {
    u32::try_from(number(token, line)?).map_err(|_| ParseError {
        line,
        kind: ParseErrorKind::BadNumber(token.to_owned()),
    })
}

fn condition_matches(cond: &str, cpu: Option<&str>) -> bool {
    // conditions are disjunctions of cpu()=="NAME" terms
    let Some(cpu) = cpu else { return true };
    let mut rest = cond;
    while let Some(at) = rest.find("cpu()==\"") {
        rest = &rest[at + 8..];
        let Some(end) = rest.find('"') else { break };
        if &rest[..end] == cpu {
            return true;
        }
        rest = &rest[end + 1..];
    }
    false
}

fn tokenize(line: &str, line_no: usize) -> Result<Vec<Tok>, ParseError> {
    let mut toks = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == ';' {
            break;
        } else if c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(ch) => text.push(ch),
                    None => {
                        return Err(ParseError {
                            line: line_no,
                            kind: ParseErrorKind::UnterminatedString,
                        })
                    }
                }
            }
            toks.push(Tok::Str(text));
        } else {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() || ch == '"' || ch == ';' {
                    break;
                }
                word.push(ch);
                chars.next();
            }
            toks.push(Tok::Word(word));
        }
    }
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_unknown_statements_are_skipped() {
        let src = "\
; peripheral description
tree \"UART\"
  autoindent.on
  base d:0x40004000 ; data class
tree.end
";
        let decls = parse(src, None).unwrap();
        assert_eq!(
            decls,
            [
                Declaration::TreeBegin {
                    name: "UART".into(),
                    description: None,
                },
                Declaration::Base {
                    addrs: vec![0x4000_4000],
                },
                Declaration::TreeEnd,
            ]
        );
    }

    #[test]
    fn group_forms() {
        let src = "\
tree \"T\"
base 0x1000
group.long 0x00++0x3 \"CTRL\" \"control\"
group.word 0x08++0x1 r \"STAT\"
group.byte (0x1000+0x10)++0x0 w
tree.end
";
        let decls = parse(src, None).unwrap();
        assert_eq!(
            decls[2],
            Declaration::Reg {
                width: DataType::U32,
                pos: RegPos::Relative(0),
                span: 3,
                access: Access::ReadWrite,
                name: Some("CTRL".into()),
                description: Some("control".into()),
            }
        );
        assert_eq!(
            decls[3],
            Declaration::Reg {
                width: DataType::U16,
                pos: RegPos::Relative(8),
                span: 1,
                access: Access::Read,
                name: Some("STAT".into()),
                description: None,
            }
        );
        assert_eq!(
            decls[4],
            Declaration::Reg {
                width: DataType::U8,
                pos: RegPos::Absolute(0x1010),
                span: 0,
                access: Access::Write,
                name: None,
                description: None,
            }
        );
    }

    #[test]
    fn line_and_bitfld() {
        let src = "\
tree \"T\"
base 0x1000
group.long 0x00++0x3
line.long 00 \"Control Register\"
bitfld 0 \"EN\"
bitfld 4..7 \"MODE\" \"operating mode\"
tree.end
";
        let decls = parse(src, None).unwrap();
        assert_eq!(
            decls[3],
            Declaration::Line {
                text: "Control Register".into(),
            }
        );
        assert_eq!(
            decls[4],
            Declaration::Bitfld {
                lsb: 0,
                msb: 0,
                name: "EN".into(),
                description: None,
            }
        );
        assert_eq!(
            decls[5],
            Declaration::Bitfld {
                lsb: 4,
                msb: 7,
                name: "MODE".into(),
                description: Some("operating mode".into()),
            }
        );
    }

    #[test]
    fn conditionals_select_by_cpu() {
        let src = "\
tree \"T\"
sif (cpu()==\"LPC2880\"||cpu()==\"LPC2888\")
base 0x1000
elif cpu()==\"LPC3000\"
base 0x2000
else
base 0x3000
endif
group.long 0x0++0x3 \"CTRL\"
tree.end
";
        let pick = |cpu: Option<&str>| {
            parse(src, cpu)
                .unwrap()
                .into_iter()
                .find_map(|decl| match decl {
                    Declaration::Base { addrs } => Some(addrs),
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(pick(Some("LPC2888")), [0x1000]);
        assert_eq!(pick(Some("LPC3000")), [0x2000]);
        assert_eq!(pick(Some("OTHER")), [0x3000]);
        // without a cpu selector every condition matches, first branch
        // wins
        assert_eq!(pick(None), [0x1000]);
    }

    #[test]
    fn nested_conditionals() {
        let src = "\
tree \"T\"
sif cpu()==\"A\"
sif cpu()==\"B\"
base 0x1000
endif
base 0x2000
endif
tree.end
";
        let decls = parse(src, Some("A")).unwrap();
        let bases: Vec<_> = decls
            .iter()
            .filter(|d| matches!(d, Declaration::Base { .. }))
            .collect();
        // the inner block does not match cpu A, only the outer base
        // survives
        assert_eq!(
            bases,
            [&Declaration::Base {
                addrs: vec![0x2000],
            }]
        );
    }

    #[test]
    fn structural_errors_carry_line_numbers() {
        let err = parse("tree \"A\"\n", None).unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.kind, ParseErrorKind::UnterminatedTree);

        let err = parse("tree.end\n", None).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnbalancedTree);

        let err = parse("sif cpu()==\"A\"\n", None).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedConditional);

        let err = parse("endif\n", None).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnbalancedConditional("endif"));
    }

    #[test]
    fn malformed_declarations() {
        let err = parse("tree \"T\"\nbase 0xZZ\ntree.end\n", None).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, ParseErrorKind::BadNumber("0xZZ".into()));

        let err =
            parse("tree \"T\"\ngroup.float 0x0++0x3\ntree.end\n", None).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::BadWidth("float".into()));

        let err = parse("tree \"T\"\ngroup.long 0x0\ntree.end\n", None).unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::BadDeclaration { keyword: "group", .. }
        ));

        let err = parse("tree \"unterminated\n", None).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedString);
    }
}
