use std::collections::BTreeMap;

use super::attributes::{relocate_attribute, Attribute, AttributeBody, Code, VerificationType};
use crate::core::error::{PipelineError, PipelineResult};

pub mod op {
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const INVOKEDYNAMIC: u8 = 0xba;
    pub const NEW: u8 = 0xbb;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const WIDE: u8 = 0xc4;
    pub const MULTIANEWARRAY: u8 = 0xc5;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
}

/// A decoded instruction: opcode position and encoded length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    pub offset: u32,
    pub opcode: u8,
    pub len: u32,
}

fn switch_padding(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

fn read_i32(code: &[u8], at: usize) -> PipelineResult<i32> {
    code.get(at..at + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| PipelineError::class_format("<code>", "truncated switch"))
}

fn read_u16(code: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([code[at], code[at + 1]])
}

fn fixed_length(opcode: u8) -> Option<u32> {
    Some(match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        0xb9 | 0xba => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca => 1,
        _ => return None,
    })
}

/// Length of the instruction at `offset` when placed at `at` (switch padding
/// depends on the position).
fn length_at(code: &[u8], offset: u32, at: u32) -> PipelineResult<u32> {
    let opcode = code[offset as usize];
    if let Some(len) = fixed_length(opcode) {
        return Ok(len);
    }
    let old_pad = switch_padding(offset);
    let new_pad = switch_padding(at);
    let base = (offset + 1 + old_pad) as usize;
    match opcode {
        op::TABLESWITCH => {
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            if high < low {
                return Err(PipelineError::class_format("<code>", "tableswitch high < low"));
            }
            let n = (high as i64 - low as i64 + 1) as u32;
            Ok(1 + new_pad + 12 + n * 4)
        }
        op::LOOKUPSWITCH => {
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                return Err(PipelineError::class_format("<code>", "negative lookupswitch size"));
            }
            Ok(1 + new_pad + 8 + pairs as u32 * 8)
        }
        op::WIDE => match code.get(offset as usize + 1) {
            Some(0x84) => Ok(6),
            Some(_) => Ok(4),
            None => Err(PipelineError::class_format("<code>", "truncated wide")),
        },
        other => Err(PipelineError::class_format(
            "<code>",
            format!("unknown opcode 0x{other:02x} at {offset}"),
        )),
    }
}

/// Decode the instruction stream.
pub fn instructions(code: &[u8]) -> PipelineResult<Vec<Insn>> {
    let mut out = Vec::new();
    let mut offset = 0u32;
    while (offset as usize) < code.len() {
        let len = length_at(code, offset, offset)?;
        if offset as usize + len as usize > code.len() {
            return Err(PipelineError::class_format(
                "<code>",
                format!("instruction at {offset} runs past the end"),
            ));
        }
        out.push(Insn {
            offset,
            opcode: code[offset as usize],
            len,
        });
        offset += len;
    }
    Ok(out)
}

/// Constant-pool operand of an instruction, if any.
pub fn constant_operand(code: &[u8], insn: &Insn) -> Option<u16> {
    let at = insn.offset as usize + 1;
    match insn.opcode {
        op::LDC => Some(code[at] as u16),
        op::LDC_W
        | op::LDC2_W
        | op::GETSTATIC..=op::INVOKEDYNAMIC
        | op::NEW
        | op::ANEWARRAY
        | op::CHECKCAST
        | op::INSTANCEOF
        | op::MULTIANEWARRAY => Some(read_u16(code, at)),
        _ => None,
    }
}

fn is_short_branch(opcode: u8) -> bool {
    matches!(opcode, 0x99..=0xa8 | 0xc6 | 0xc7)
}

/// Copy a method body into another constant pool.
///
/// Every constant operand and nested attribute index goes through `map`.
/// When an `ldc` operand no longer fits in one byte, the instruction is
/// widened to `ldc_w` and all offsets (branches, switches, exception
/// ranges, debug tables, stack map frames) are recomputed.
pub fn relocate(
    code: &Code,
    map: &mut dyn FnMut(u16) -> PipelineResult<u16>,
) -> PipelineResult<Code> {
    let insns = instructions(&code.code)?;

    let mut operands: BTreeMap<u32, u16> = BTreeMap::new();
    let mut widen = false;
    for insn in &insns {
        if let Some(index) = constant_operand(&code.code, insn) {
            let mapped = map(index)?;
            if insn.opcode == op::LDC && mapped > 0xff {
                widen = true;
            }
            operands.insert(insn.offset, mapped);
        }
    }

    // New position of every old instruction start, plus the end offset.
    let mut positions: BTreeMap<u32, u32> = BTreeMap::new();
    let mut at = 0u32;
    for insn in &insns {
        positions.insert(insn.offset, at);
        let grows = widen && insn.opcode == op::LDC && operands[&insn.offset] > 0xff;
        at += if grows {
            3
        } else {
            length_at(&code.code, insn.offset, at)?
        };
    }
    positions.insert(code.code.len() as u32, at);
    let new_len = at;

    let relocate_pc = |pc: u32| -> PipelineResult<u32> {
        positions.get(&pc).copied().ok_or_else(|| {
            PipelineError::class_format("<code>", format!("offset {pc} is not an instruction"))
        })
    };

    let mut out = Vec::with_capacity(new_len as usize);
    for insn in &insns {
        let old = insn.offset as usize;
        let new_pos = relocate_pc(insn.offset)?;
        let src = &code.code[old..old + insn.len as usize];
        match insn.opcode {
            op::LDC => {
                let index = operands[&insn.offset];
                if index > 0xff {
                    out.push(op::LDC_W);
                    out.extend_from_slice(&index.to_be_bytes());
                } else {
                    out.push(op::LDC);
                    out.push(index as u8);
                }
            }
            _ if operands.contains_key(&insn.offset) => {
                out.push(insn.opcode);
                out.extend_from_slice(&operands[&insn.offset].to_be_bytes());
                out.extend_from_slice(&src[3..]);
            }
            opcode if is_short_branch(opcode) => {
                let rel = i16::from_be_bytes([src[1], src[2]]) as i64;
                let target = relocate_pc((insn.offset as i64 + rel) as u32)?;
                let new_rel = target as i64 - new_pos as i64;
                let new_rel = i16::try_from(new_rel).map_err(|_| {
                    PipelineError::class_format("<code>", "branch offset overflow after widening")
                })?;
                out.push(opcode);
                out.extend_from_slice(&new_rel.to_be_bytes());
            }
            op::GOTO_W | op::JSR_W => {
                let rel = i32::from_be_bytes([src[1], src[2], src[3], src[4]]) as i64;
                let target = relocate_pc((insn.offset as i64 + rel) as u32)?;
                out.push(insn.opcode);
                out.extend_from_slice(&((target as i64 - new_pos as i64) as i32).to_be_bytes());
            }
            op::TABLESWITCH | op::LOOKUPSWITCH => {
                let base = old + 1 + switch_padding(insn.offset) as usize;
                out.push(insn.opcode);
                out.extend(std::iter::repeat(0).take(switch_padding(new_pos) as usize));
                let jump = |rel: i32| -> PipelineResult<[u8; 4]> {
                    let target = relocate_pc((insn.offset as i64 + rel as i64) as u32)?;
                    Ok(((target as i64 - new_pos as i64) as i32).to_be_bytes())
                };
                out.extend_from_slice(&jump(read_i32(&code.code, base)?)?);
                if insn.opcode == op::TABLESWITCH {
                    let low = read_i32(&code.code, base + 4)?;
                    let high = read_i32(&code.code, base + 8)?;
                    out.extend_from_slice(&low.to_be_bytes());
                    out.extend_from_slice(&high.to_be_bytes());
                    let n = (high as i64 - low as i64 + 1) as usize;
                    for i in 0..n {
                        out.extend_from_slice(&jump(read_i32(&code.code, base + 12 + i * 4)?)?);
                    }
                } else {
                    let pairs = read_i32(&code.code, base + 4)?;
                    out.extend_from_slice(&pairs.to_be_bytes());
                    for i in 0..pairs as usize {
                        let at = base + 8 + i * 8;
                        out.extend_from_slice(&read_i32(&code.code, at)?.to_be_bytes());
                        out.extend_from_slice(&jump(read_i32(&code.code, at + 4)?)?);
                    }
                }
            }
            _ => out.extend_from_slice(src),
        }
    }

    let pc16 = |pc: u16| -> PipelineResult<u16> {
        let new = relocate_pc(pc as u32)?;
        u16::try_from(new)
            .map_err(|_| PipelineError::class_format("<code>", "method body exceeds 64KiB"))
    };

    let mut exception_table = Vec::with_capacity(code.exception_table.len());
    for h in &code.exception_table {
        exception_table.push(super::attributes::ExceptionHandler {
            start_pc: pc16(h.start_pc)?,
            end_pc: pc16(h.end_pc)?,
            handler_pc: pc16(h.handler_pc)?,
            catch_type: map(h.catch_type)?,
        });
    }

    let mut attributes = Vec::new();
    for attr in &code.attributes {
        let Some(mut relocated) = relocate_attribute(attr, map)? else {
            continue;
        };
        if widen {
            shift_offsets(&mut relocated, &pc16)?;
        }
        attributes.push(relocated);
    }

    Ok(Code {
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        code: out,
        exception_table,
        attributes,
    })
}

fn shift_offsets(
    attr: &mut Attribute,
    pc16: &dyn Fn(u16) -> PipelineResult<u16>,
) -> PipelineResult<()> {
    match &mut attr.body {
        AttributeBody::LineNumberTable(list) => {
            for ln in list.iter_mut() {
                ln.start_pc = pc16(ln.start_pc)?;
            }
        }
        AttributeBody::LocalVariableTable(list) | AttributeBody::LocalVariableTypeTable(list) => {
            for lv in list.iter_mut() {
                let start = pc16(lv.start_pc)?;
                let end = pc16(lv.start_pc + lv.length)?;
                lv.start_pc = start;
                lv.length = end - start;
            }
        }
        AttributeBody::StackMapTable(frames) => {
            let mut old_abs: i64 = -1;
            let mut new_abs: i64 = -1;
            for frame in frames.iter_mut() {
                let abs = old_abs + frame.offset_delta() as i64 + 1;
                let moved = pc16(abs as u16)? as i64;
                frame.set_offset_delta((moved - new_abs - 1) as u16);
                for t in frame.types_mut() {
                    if let VerificationType::Uninitialized(offset) = t {
                        *offset = pc16(*offset)?;
                    }
                }
                old_abs = abs;
                new_abs = moved;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classfile::attributes::{ExceptionHandler, LineNumber, StackMapFrame};

    fn body(code: Vec<u8>) -> Code {
        Code {
            max_stack: 2,
            max_locals: 1,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn decodes_switch_padding() {
        // nop; tableswitch at 1 -> pads 2 bytes to align to 4.
        let mut code = vec![0x00, op::TABLESWITCH, 0, 0];
        code.extend_from_slice(&16i32.to_be_bytes()); // default
        code.extend_from_slice(&0i32.to_be_bytes()); // low
        code.extend_from_slice(&0i32.to_be_bytes()); // high
        code.extend_from_slice(&16i32.to_be_bytes()); // case 0
        code.push(0xb1); // return
        let insns = instructions(&code).unwrap();
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[1].len, 1 + 2 + 12 + 4);
        assert_eq!(insns[2].offset, 20);
    }

    #[test]
    fn relocation_without_widening_keeps_layout() {
        // ldc #1; pop; return
        let code = body(vec![op::LDC, 1, 0x57, 0xb1]);
        let out = relocate(&code, &mut |i| Ok(i + 3)).unwrap();
        assert_eq!(out.code, vec![op::LDC, 4, 0x57, 0xb1]);
    }

    #[test]
    fn widening_ldc_shifts_branches_and_tables() {
        // 0: ldc #1   2: ifeq +5 (-> 7)   5: nop   6: nop   7: return
        let mut code = body(vec![op::LDC, 1, 0x99, 0x00, 0x05, 0x00, 0x00, 0xb1]);
        code.exception_table.push(ExceptionHandler {
            start_pc: 2,
            end_pc: 7,
            handler_pc: 7,
            catch_type: 0,
        });
        code.attributes.push(Attribute {
            name_index: 9,
            body: AttributeBody::LineNumberTable(vec![LineNumber { start_pc: 7, line: 3 }]),
        });
        code.attributes.push(Attribute {
            name_index: 10,
            body: AttributeBody::StackMapTable(vec![StackMapFrame::Same {
                offset_delta: 7,
                extended: false,
            }]),
        });

        let out = relocate(&code, &mut |i| Ok(if i == 1 { 300 } else { i })).unwrap();
        assert_eq!(&out.code[..3], &[op::LDC_W, 0x01, 0x2c]);
        // Branch still lands on `return`, now at 8.
        assert_eq!(&out.code[3..6], &[0x99, 0x00, 0x05]);
        assert_eq!(out.code[8], 0xb1);
        assert_eq!(out.exception_table[0].start_pc, 3);
        assert_eq!(out.exception_table[0].end_pc, 8);
        match &out.attributes[0].body {
            AttributeBody::LineNumberTable(l) => assert_eq!(l[0].start_pc, 8),
            other => panic!("unexpected {other:?}"),
        }
        match &out.attributes[1].body {
            AttributeBody::StackMapTable(f) => assert_eq!(f[0].offset_delta(), 8),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_opcodes_are_rejected() {
        assert!(instructions(&[0xfe]).is_err());
    }
}
