//! Persisted binary form of code objects
//!
//! Layout (all integers little endian):
//!
//! ```text
//! image   := "KILN" version:u16 code
//! code    := name:opt_str file:opt_str
//!            max_stack:u32 local_slots:u32 upvalue_slots:u32 imported:u32
//!            n:u32 (opcode:u8 arg:u32)*n
//!            n:u32 (offset:u32 line:u32)*n
//!            n:u32 literal*n
//!            n:u32 (namespace:str name:str)*n
//!            n:u32 code*n
//!            n:u32 (name:str arity:u32)*n
//! ```
//!
//! Vars are stored by qualified name and re-attached through a
//! [`VarResolver`] on load. Decoding validates every operand, so a loaded
//! code object is as safe to execute as a freshly compiled one.

use crate::error::{FormatError, FormatResult};
use crate::inline_cache::MethodSite;
use crate::source_map::LineTable;
use crate::{Code, Instruction, Opcode, Operand};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use kiln_core::{ArrayMap, TypeTag, Value, VarResolver};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Leading bytes of every image
pub const MAGIC: &[u8; 4] = b"KILN";

/// Current format version
pub const FORMAT_VERSION: u16 = 1;

/// Deepest nesting of code objects or literal collections accepted on load
pub const MAX_NESTING: usize = 128;

mod tag {
    pub const NIL: u8 = 0;
    pub const FALSE: u8 = 1;
    pub const TRUE: u8 = 2;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const STRING: u8 = 5;
    pub const KEYWORD: u8 = 6;
    pub const SYMBOL: u8 = 7;
    pub const LIST: u8 = 8;
    pub const VECTOR: u8 = 9;
    pub const ARRAY_MAP: u8 = 10;
    pub const HASH_MAP: u8 = 11;
    pub const SET: u8 = 12;
}

type Reader<'a> = Cursor<&'a [u8]>;

impl Code {
    /// Serialize this code object and everything nested in it
    pub fn to_bytes(&self) -> FormatResult<Vec<u8>> {
        let mut out = Vec::new();
        out.write_all(MAGIC)?;
        out.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        write_code(&mut out, self)?;
        Ok(out)
    }

    /// Load a code image, resolving vars by qualified name
    pub fn from_bytes(bytes: &[u8], vars: &dyn VarResolver) -> FormatResult<Arc<Code>> {
        let mut r = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = r.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let code = read_code(&mut r, vars, 0)?;
        if remaining(&r) != 0 {
            return Err(FormatError::TrailingBytes);
        }
        debug!(
            name = code.display_name(),
            bytes = bytes.len(),
            "Loaded code image"
        );
        Ok(code)
    }
}

fn write_len<W: Write>(w: &mut W, n: usize) -> FormatResult<()> {
    let n = u32::try_from(n).map_err(|_| FormatError::BadShape("length exceeds u32"))?;
    w.write_u32::<LittleEndian>(n)?;
    Ok(())
}

fn write_str<W: Write>(w: &mut W, s: &str) -> FormatResult<()> {
    write_len(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_opt_str<W: Write>(w: &mut W, s: Option<&str>) -> FormatResult<()> {
    match s {
        Some(s) => {
            w.write_u8(1)?;
            write_str(w, s)
        }
        None => {
            w.write_u8(0)?;
            Ok(())
        }
    }
}

fn write_code<W: Write>(w: &mut W, code: &Code) -> FormatResult<()> {
    write_opt_str(w, code.name.as_deref())?;
    write_opt_str(w, code.file.as_deref())?;
    for n in [
        code.max_stack,
        code.local_slots,
        code.upvalue_slots,
        code.imported_upvalues,
    ] {
        write_len(w, n)?;
    }

    write_len(w, code.instructions.len())?;
    for instr in &code.instructions {
        w.write_u8(instr.opcode.as_u8())?;
        w.write_u32::<LittleEndian>(instr.arg)?;
    }

    let runs = code.lines.runs();
    write_len(w, runs.len())?;
    for &(offset, line) in runs {
        w.write_u32::<LittleEndian>(offset)?;
        w.write_u32::<LittleEndian>(line)?;
    }

    write_len(w, code.literals.len())?;
    for literal in &code.literals {
        write_value(w, literal)?;
    }

    write_len(w, code.vars.len())?;
    for var in &code.vars {
        write_str(w, var.namespace())?;
        write_str(w, var.name())?;
    }

    write_len(w, code.codes.len())?;
    for nested in &code.codes {
        write_code(w, nested)?;
    }

    write_len(w, code.methods.len())?;
    for site in &code.methods {
        write_str(w, &site.name)?;
        w.write_u32::<LittleEndian>(site.arity)?;
    }
    Ok(())
}

/// Hashed collections are written in sorted encoded order so that equal
/// values always produce identical bytes.
fn write_unordered<'a, W, I>(w: &mut W, items: I) -> FormatResult<()>
where
    W: Write,
    I: Iterator<Item = Vec<&'a Value>>,
{
    let mut encoded = Vec::new();
    for parts in items {
        let mut buf = Vec::new();
        for part in parts {
            write_value(&mut buf, part)?;
        }
        encoded.push(buf);
    }
    encoded.sort();
    write_len(w, encoded.len())?;
    for buf in encoded {
        w.write_all(&buf)?;
    }
    Ok(())
}

fn write_value<W: Write>(w: &mut W, value: &Value) -> FormatResult<()> {
    match value {
        Value::Nil => w.write_u8(tag::NIL)?,
        Value::Boolean(false) => w.write_u8(tag::FALSE)?,
        Value::Boolean(true) => w.write_u8(tag::TRUE)?,
        Value::Integer(n) => {
            w.write_u8(tag::INTEGER)?;
            w.write_i64::<LittleEndian>(*n)?;
        }
        Value::Float(x) => {
            w.write_u8(tag::FLOAT)?;
            w.write_f64::<LittleEndian>(*x)?;
        }
        Value::String(s) => {
            w.write_u8(tag::STRING)?;
            write_str(w, s)?;
        }
        Value::Keyword(s) => {
            w.write_u8(tag::KEYWORD)?;
            write_str(w, s)?;
        }
        Value::Symbol(s) => {
            w.write_u8(tag::SYMBOL)?;
            write_str(w, s)?;
        }
        Value::List(items) | Value::Vector(items) => {
            let t = if matches!(value, Value::List(_)) {
                tag::LIST
            } else {
                tag::VECTOR
            };
            w.write_u8(t)?;
            write_len(w, items.len())?;
            for item in items {
                write_value(w, item)?;
            }
        }
        Value::ArrayMap(map) => {
            w.write_u8(tag::ARRAY_MAP)?;
            write_len(w, map.len())?;
            for (k, v) in map.iter() {
                write_value(w, k)?;
                write_value(w, v)?;
            }
        }
        Value::HashMap(map) => {
            w.write_u8(tag::HASH_MAP)?;
            write_unordered(w, map.iter().map(|(k, v)| vec![k, v]))?;
        }
        Value::Set(set) => {
            w.write_u8(tag::SET)?;
            write_unordered(w, set.iter().map(|k| vec![k]))?;
        }
        other => return Err(FormatError::UnserializableLiteral(other.type_name())),
    }
    Ok(())
}

fn remaining(r: &Reader<'_>) -> usize {
    r.get_ref().len().saturating_sub(r.position() as usize)
}

/// Read a count, rejecting counts that cannot fit in what is left of the
/// input when each element needs at least `min_size` bytes
fn read_count(r: &mut Reader<'_>, min_size: usize) -> FormatResult<usize> {
    let n = r.read_u32::<LittleEndian>()? as usize;
    if n.saturating_mul(min_size) > remaining(r) {
        return Err(FormatError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(n)
}

fn read_str(r: &mut Reader<'_>) -> FormatResult<Arc<str>> {
    let len = read_count(r, 1)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    let s = String::from_utf8(buf).map_err(|_| FormatError::InvalidUtf8)?;
    Ok(Arc::from(s))
}

fn read_opt_str(r: &mut Reader<'_>) -> FormatResult<Option<Arc<str>>> {
    match r.read_u8()? {
        0 => Ok(None),
        _ => read_str(r).map(Some),
    }
}

fn read_value(r: &mut Reader<'_>, depth: usize) -> FormatResult<Value> {
    if depth > MAX_NESTING {
        return Err(FormatError::TooDeep(MAX_NESTING));
    }
    let value = match r.read_u8()? {
        tag::NIL => Value::Nil,
        tag::FALSE => Value::Boolean(false),
        tag::TRUE => Value::Boolean(true),
        tag::INTEGER => Value::Integer(r.read_i64::<LittleEndian>()?),
        tag::FLOAT => Value::Float(r.read_f64::<LittleEndian>()?),
        tag::STRING => Value::String(read_str(r)?),
        tag::KEYWORD => Value::Keyword(read_str(r)?),
        tag::SYMBOL => Value::Symbol(read_str(r)?),
        t @ (tag::LIST | tag::VECTOR | tag::SET) => {
            let n = read_count(r, 1)?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(read_value(r, depth + 1)?);
            }
            match t {
                tag::LIST => Value::list(items),
                tag::VECTOR => Value::vector(items),
                _ => Value::set(items),
            }
        }
        t @ (tag::ARRAY_MAP | tag::HASH_MAP) => {
            let n = read_count(r, 2)?;
            let mut pairs = Vec::with_capacity(n);
            for _ in 0..n {
                let k = read_value(r, depth + 1)?;
                let v = read_value(r, depth + 1)?;
                pairs.push((k, v));
            }
            if t == tag::ARRAY_MAP {
                Value::ArrayMap(ArrayMap::from_pairs(pairs))
            } else {
                Value::HashMap(pairs.into_iter().collect())
            }
        }
        other => return Err(FormatError::UnknownLiteralTag(other)),
    };
    Ok(value)
}

fn read_code(
    r: &mut Reader<'_>,
    resolver: &dyn VarResolver,
    depth: usize,
) -> FormatResult<Arc<Code>> {
    if depth > MAX_NESTING {
        return Err(FormatError::TooDeep(MAX_NESTING));
    }
    let name = read_opt_str(r)?;
    let file = read_opt_str(r)?;
    let max_stack = r.read_u32::<LittleEndian>()? as usize;
    let local_slots = r.read_u32::<LittleEndian>()? as usize;
    let upvalue_slots = r.read_u32::<LittleEndian>()? as usize;
    let imported_upvalues = r.read_u32::<LittleEndian>()? as usize;
    if imported_upvalues > upvalue_slots {
        return Err(FormatError::BadShape("imported upvalues exceed upvalue slots"));
    }

    let n = read_count(r, 5)?;
    let mut instructions = Vec::with_capacity(n);
    for offset in 0..n {
        let byte = r.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(FormatError::UnknownOpcode { byte, offset })?;
        let arg = r.read_u32::<LittleEndian>()?;
        instructions.push(Instruction { opcode, arg });
    }

    let n = read_count(r, 8)?;
    let mut runs = Vec::with_capacity(n);
    for _ in 0..n {
        let offset = r.read_u32::<LittleEndian>()?;
        let line = r.read_u32::<LittleEndian>()?;
        runs.push((offset, line));
    }
    let lines = LineTable::from_runs(runs).ok_or(FormatError::BadLineTable)?;

    let n = read_count(r, 1)?;
    let mut literals = Vec::with_capacity(n);
    for _ in 0..n {
        literals.push(read_value(r, depth)?);
    }

    let n = read_count(r, 8)?;
    let mut vars = Vec::with_capacity(n);
    for _ in 0..n {
        let namespace = read_str(r)?;
        let var_name = read_str(r)?;
        let var = resolver
            .resolve(&namespace, &var_name)
            .ok_or_else(|| FormatError::UnresolvedVar(format!("{}/{}", namespace, var_name)))?;
        vars.push(var);
    }

    let n = read_count(r, 1)?;
    let mut codes = Vec::with_capacity(n);
    for _ in 0..n {
        codes.push(read_code(r, resolver, depth + 1)?);
    }

    let n = read_count(r, 8)?;
    let mut methods = Vec::with_capacity(n);
    for _ in 0..n {
        let method = read_str(r)?;
        let arity = r.read_u32::<LittleEndian>()?;
        methods.push(MethodSite::new(method, arity));
    }

    let code = Code {
        name,
        file,
        instructions,
        literals,
        vars,
        codes,
        methods,
        max_stack,
        local_slots,
        upvalue_slots,
        imported_upvalues,
        lines,
    };
    validate(&code)?;
    Ok(Arc::new(code))
}

/// Check every operand against the tables and frame shape of `code`
pub fn validate(code: &Code) -> FormatResult<()> {
    let len = code.instructions.len();
    for (offset, instr) in code.instructions.iter().enumerate() {
        let Instruction { opcode, arg } = *instr;
        let out_of_range = || FormatError::OperandOutOfRange {
            opcode,
            arg,
            offset,
        };
        let idx = arg as usize;
        let in_range = match opcode.operand() {
            Operand::None | Operand::Int => true,
            Operand::Literal => idx < code.literals.len(),
            Operand::Local => idx < code.local_slots,
            Operand::Upvalue => idx < code.upvalue_slots,
            Operand::Var => idx < code.vars.len(),
            Operand::Code => idx < code.codes.len(),
            Operand::Method => idx < code.methods.len(),
            Operand::Type => u8::try_from(arg)
                .ok()
                .and_then(TypeTag::from_code)
                .is_some(),
            Operand::Target => idx < len,
            Operand::Count => match opcode {
                Opcode::ArityEq => idx <= code.local_slots,
                Opcode::ArityAtLeast => idx < code.local_slots,
                Opcode::MakeArrayMap | Opcode::MakeHashMap => idx % 2 == 0,
                _ => true,
            },
        };
        if opcode.is_pseudo() {
            return Err(FormatError::PseudoInstruction { opcode, offset });
        }
        if !in_range {
            return Err(out_of_range());
        }
        if matches!(opcode, Opcode::ArityEq | Opcode::ArityAtLeast)
            && code.instructions.get(offset + 1).map(|i| i.opcode) != Some(Opcode::Jump)
        {
            return Err(FormatError::MalformedGuard(offset));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{Var, VarTable};

    fn sample(vars: &VarTable) -> Code {
        let var = vars.intern("user", "x");
        let mut lines = LineTable::new();
        lines.push(0, 3);
        Code {
            name: Some(Arc::from("sample")),
            file: Some(Arc::from("sample.kn")),
            instructions: vec![
                Instruction::with_arg(Opcode::ArityEq, 0),
                Instruction::with_arg(Opcode::Jump, 5),
                Instruction::with_arg(Opcode::PushLiteral, 0),
                Instruction::with_arg(Opcode::SetVar, 0),
                Instruction::new(Opcode::Return),
                Instruction::new(Opcode::ArityFail),
            ],
            literals: vec![Value::HashMap(
                (0..20)
                    .map(|i| (Value::Integer(i), Value::string(i.to_string())))
                    .collect(),
            )],
            vars: vec![var],
            codes: vec![],
            methods: vec![MethodSite::new(Arc::from("length"), 0)],
            max_stack: 1,
            local_slots: 0,
            upvalue_slots: 0,
            imported_upvalues: 0,
            lines,
        }
    }

    #[test]
    fn test_roundtrip_preserves_tables() {
        let vars = VarTable::new();
        let code = sample(&vars);
        let bytes = code.to_bytes().expect("encode");
        let loaded = Code::from_bytes(&bytes, &vars).expect("decode");

        assert_eq!(loaded.instructions, code.instructions);
        assert_eq!(loaded.literals, code.literals);
        assert!(Arc::ptr_eq(&loaded.vars[0], &code.vars[0]));
        assert_eq!(loaded.methods[0].name.as_ref(), "length");
        assert_eq!(loaded.location(2).line, Some(3));
        assert_eq!(loaded.to_bytes().expect("re-encode"), bytes);
    }

    #[test]
    fn test_hash_map_literals_encode_identically() {
        let vars = VarTable::new();
        let a = sample(&vars).to_bytes().expect("encode");
        let b = sample(&vars).to_bytes().expect("encode");
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_unknown_var() {
        let vars = VarTable::new();
        let bytes = sample(&vars).to_bytes().expect("encode");
        let empty = VarTable::new();
        assert!(matches!(
            Code::from_bytes(&bytes, &empty),
            Err(FormatError::UnresolvedVar(name)) if name == "user/x"
        ));
    }

    #[test]
    fn test_rejects_bad_jump() {
        let vars = VarTable::new();
        let mut code = sample(&vars);
        code.instructions[1].arg = 99;
        let bytes = code.to_bytes().expect("encode");
        assert!(matches!(
            Code::from_bytes(&bytes, &vars),
            Err(FormatError::OperandOutOfRange {
                opcode: Opcode::Jump,
                offset: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_truncated_and_trailing_input() {
        let vars = VarTable::new();
        let bytes = sample(&vars).to_bytes().expect("encode");
        assert!(matches!(
            Code::from_bytes(&bytes[..bytes.len() - 3], &vars),
            Err(FormatError::Io(_))
        ));
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(
            Code::from_bytes(&longer, &vars),
            Err(FormatError::TrailingBytes)
        ));
        assert!(matches!(
            Code::from_bytes(b"NOPE\x01\x00", &vars),
            Err(FormatError::BadMagic)
        ));
    }

    #[test]
    fn test_functions_are_not_literals() {
        let vars = VarTable::new();
        let mut code = sample(&vars);
        code.literals.push(Value::Var(Var::new("user", "y")));
        assert!(matches!(
            code.to_bytes(),
            Err(FormatError::UnserializableLiteral("var"))
        ));
    }
}
