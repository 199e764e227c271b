//! On-disk bytecode cache.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic "BRIO" | version u32 | timestamp u64 | sha256(source) [32]
//! instr_len u32 | instruction bytes
//! constant_count u32 | constants…
//! name_count u32 | global slot names…
//! ```
//!
//! Each constant is a 1-byte type tag, a u32 payload length, and a
//! type-specific payload (numbers in fixed-width big-endian forms,
//! strings as raw UTF-8, compiled functions as a nested record). On
//! load the stored source hash is compared against the current source;
//! a mismatch invalidates the cache.

use brio_core::bytecode::Bytecode;
use brio_core::values::{CompiledFunction, HashKey, HashObj, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"BRIO";
pub const FORMAT_VERSION: u32 = 1;

const TAG_INT: u8 = 0;
const TAG_FLOAT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_NULL: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_HASH: u8 = 6;
const TAG_FUNCTION: u8 = 7;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a Brio bytecode file")]
    BadMagic,
    #[error("unsupported bytecode format version {0}")]
    UnsupportedVersion(u32),
    #[error("stale cache: source hash mismatch")]
    StaleHash,
    #[error("corrupt bytecode cache: {0}")]
    Corrupt(String),
    #[error("constant of type {0} cannot be serialized")]
    Unserializable(String),
}

pub fn source_hash(source: &str) -> [u8; 32] {
    Sha256::digest(source.as_bytes()).into()
}

pub fn write_cache(path: &Path, bytecode: &Bytecode, source: &str) -> Result<(), CacheError> {
    let encoded = encode(bytecode, source)?;
    std::fs::write(path, encoded)?;
    Ok(())
}

pub fn load_cache(path: &Path, source: &str) -> Result<Bytecode, CacheError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, &source_hash(source))
}

pub fn encode(bytecode: &Bytecode, source: &str) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&source_hash(source));

    write_bytes(&mut out, &bytecode.instructions);
    out.extend_from_slice(&(bytecode.constants.len() as u32).to_be_bytes());
    for constant in &bytecode.constants {
        write_constant(&mut out, constant)?;
    }
    out.extend_from_slice(&(bytecode.global_names.len() as u32).to_be_bytes());
    for name in &bytecode.global_names {
        write_bytes(&mut out, name.as_bytes());
    }
    Ok(out)
}

pub fn decode(bytes: &[u8], expected_hash: &[u8; 32]) -> Result<Bytecode, CacheError> {
    let mut reader = Reader::new(bytes);
    if reader.take(4)? != MAGIC.as_slice() {
        return Err(CacheError::BadMagic);
    }
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(CacheError::UnsupportedVersion(version));
    }
    let _timestamp = reader.u64()?;
    let stored_hash = reader.take(32)?;
    if stored_hash != expected_hash {
        return Err(CacheError::StaleHash);
    }

    let instructions = reader.sized_bytes()?.to_vec();
    let constant_count = reader.u32()? as usize;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(read_constant(&mut reader)?);
    }
    let name_count = reader.u32()? as usize;
    let mut global_names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        global_names.push(reader.sized_str()?);
    }
    Ok(Bytecode {
        instructions,
        constants,
        global_names,
    })
}

// ── Encoding ──

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn write_constant(out: &mut Vec<u8>, constant: &Value) -> Result<(), CacheError> {
    let (tag, payload) = constant_payload(constant)?;
    out.push(tag);
    write_bytes(out, &payload);
    Ok(())
}

fn constant_payload(constant: &Value) -> Result<(u8, Vec<u8>), CacheError> {
    match constant {
        Value::Int(n) => Ok((TAG_INT, n.to_be_bytes().to_vec())),
        Value::Float(x) => Ok((TAG_FLOAT, x.to_bits().to_be_bytes().to_vec())),
        Value::Str(s) => Ok((TAG_STR, s.as_bytes().to_vec())),
        Value::Bool(b) => Ok((TAG_BOOL, vec![u8::from(*b)])),
        Value::Null => Ok((TAG_NULL, Vec::new())),
        Value::Array(items) => {
            let items = items.borrow();
            let mut payload = Vec::new();
            payload.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items.iter() {
                write_constant(&mut payload, item)?;
            }
            Ok((TAG_ARRAY, payload))
        }
        Value::Hash(hash) => {
            let hash = hash.borrow();
            let mut payload = Vec::new();
            payload.extend_from_slice(&(hash.len() as u32).to_be_bytes());
            for (key, value) in hash.iter() {
                write_constant(&mut payload, &key.to_value())?;
                write_constant(&mut payload, value)?;
            }
            Ok((TAG_HASH, payload))
        }
        Value::CompiledFunction(func) => {
            let mut payload = Vec::new();
            write_bytes(&mut payload, &func.instructions);
            payload.extend_from_slice(&(func.num_params as u32).to_be_bytes());
            payload.extend_from_slice(&(func.num_locals as u32).to_be_bytes());
            match &func.name {
                Some(name) => {
                    payload.push(1);
                    write_bytes(&mut payload, name.as_bytes());
                }
                None => payload.push(0),
            }
            Ok((TAG_FUNCTION, payload))
        }
        // Runtime-only values (closures, classes, imported bindings)
        // have no disk form; callers skip caching such programs.
        other => Err(CacheError::Unserializable(other.type_name().to_string())),
    }
}

// ── Decoding ──

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheError> {
        if self.pos + n > self.bytes.len() {
            return Err(CacheError::Corrupt("unexpected end of file".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CacheError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CacheError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64, CacheError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("8 bytes")))
    }

    fn sized_bytes(&mut self) -> Result<&'a [u8], CacheError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn sized_str(&mut self) -> Result<String, CacheError> {
        let bytes = self.sized_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CacheError::Corrupt("invalid UTF-8 string".to_string()))
    }
}

fn read_constant(reader: &mut Reader<'_>) -> Result<Value, CacheError> {
    let tag = reader.u8()?;
    let payload = reader.sized_bytes()?;
    let mut inner = Reader::new(payload);
    match tag {
        TAG_INT => Ok(Value::Int(i64::from_be_bytes(
            inner.take(8)?.try_into().expect("8 bytes"),
        ))),
        TAG_FLOAT => Ok(Value::Float(f64::from_bits(inner.u64()?))),
        TAG_STR => {
            let text = std::str::from_utf8(payload)
                .map_err(|_| CacheError::Corrupt("invalid UTF-8 constant".to_string()))?;
            Ok(Value::str(text.to_string()))
        }
        TAG_BOOL => Ok(Value::Bool(inner.u8()? != 0)),
        TAG_NULL => Ok(Value::Null),
        TAG_ARRAY => {
            let count = inner.u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_constant(&mut inner)?);
            }
            Ok(Value::array(items))
        }
        TAG_HASH => {
            let count = inner.u32()? as usize;
            let mut hash = HashObj::new();
            for _ in 0..count {
                let key_value = read_constant(&mut inner)?;
                let key = HashKey::from_value(&key_value)
                    .map_err(|_| CacheError::Corrupt("unhashable hash key".to_string()))?;
                let value = read_constant(&mut inner)?;
                hash.insert(key, value);
            }
            Ok(Value::hash(hash))
        }
        TAG_FUNCTION => {
            let instructions = inner.sized_bytes()?.to_vec();
            let num_params = inner.u32()? as usize;
            let num_locals = inner.u32()? as usize;
            let name = if inner.u8()? == 1 {
                Some(inner.sized_str()?)
            } else {
                None
            };
            Ok(Value::CompiledFunction(Rc::new(CompiledFunction {
                instructions,
                num_params,
                num_locals,
                name,
            })))
        }
        other => Err(CacheError::Corrupt(format!("unknown constant tag {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brio_compiler::{parse_source, Compiler};

    fn compile(source: &str) -> Bytecode {
        let program = parse_source(source).expect("parse");
        Compiler::new().compile(&program).expect("compile")
    }

    fn assert_constants_equal(a: &[Value], b: &[Value]) {
        assert_eq!(a.len(), b.len());
        for (left, right) in a.iter().zip(b) {
            match (left, right) {
                (Value::CompiledFunction(f), Value::CompiledFunction(g)) => {
                    assert_eq!(f.instructions, g.instructions);
                    assert_eq!(f.num_params, g.num_params);
                    assert_eq!(f.num_locals, g.num_locals);
                    assert_eq!(f.name, g.name);
                }
                (Value::Str(a), Value::Str(b)) => assert_eq!(a, b),
                (Value::Int(a), Value::Int(b)) => assert_eq!(a, b),
                (Value::Float(a), Value::Float(b)) => assert_eq!(a.to_bits(), b.to_bits()),
                (Value::Null, Value::Null) => {}
                (a, b) => panic!("constant mismatch: {} vs {}", a.inspect(), b.inspect()),
            }
        }
    }

    #[test]
    fn round_trip_preserves_instructions_and_constants() {
        let source =
            "f = fn(n) { if (n <= 1) { 1 } else { n * f(n - 1) } }\nprint(f(5), 2.5, \"done\")";
        let bytecode = compile(source);
        let encoded = encode(&bytecode, source).unwrap();
        let decoded = decode(&encoded, &source_hash(source)).unwrap();
        assert_eq!(decoded.instructions, bytecode.instructions);
        assert_eq!(decoded.global_names, bytecode.global_names);
        assert_constants_equal(&decoded.constants, &bytecode.constants);
    }

    #[test]
    fn decoded_bytecode_still_runs() {
        let source = "square = fn(n) { n * n }\nsquare(7)";
        let bytecode = compile(source);
        let encoded = encode(&bytecode, source).unwrap();
        let decoded = decode(&encoded, &source_hash(source)).unwrap();
        let mut vm = crate::vm::Vm::new(decoded).with_output(crate::output::Output::capture());
        let value = vm.run().unwrap();
        assert!(matches!(value, Value::Int(49)));
    }

    #[test]
    fn stale_source_hash_is_rejected() {
        let source = "x = 1";
        let bytecode = compile(source);
        let encoded = encode(&bytecode, source).unwrap();
        let err = decode(&encoded, &source_hash("x = 2")).unwrap_err();
        assert!(matches!(err, CacheError::StaleHash));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = decode(b"NOPE", &[0; 32]).unwrap_err();
        assert!(matches!(err, CacheError::BadMagic));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let source = "x = 1";
        let bytecode = compile(source);
        let encoded = encode(&bytecode, source).unwrap();
        let err = decode(&encoded[..encoded.len() - 3], &source_hash(source)).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }

    #[test]
    fn cache_file_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.briocache");
        let source = "print(\"cached\")";
        let bytecode = compile(source);
        write_cache(&path, &bytecode, source).unwrap();
        let loaded = load_cache(&path, source).unwrap();
        assert_eq!(loaded.instructions, bytecode.instructions);
        let err = load_cache(&path, "print(\"changed\")").unwrap_err();
        assert!(matches!(err, CacheError::StaleHash));
    }
}
