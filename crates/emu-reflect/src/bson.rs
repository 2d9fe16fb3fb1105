//! BSON-style document serialisation of reflectable objects.
//!
//! A document is an int32 little-endian total length, a sequence of typed
//! elements, and a terminating 0x00. Element types used: double (0x01),
//! string (0x02), document (0x03), array (0x04), binary (0x05), bool
//! (0x08), int64 (0x12). Readers skip unrecognised element types by their
//! encoded lengths, so documents written by later revisions remain loadable.

use log::debug;

use crate::{Reflectable, Value};

const TYPE_DOUBLE: u8 = 0x01;
const TYPE_STRING: u8 = 0x02;
const TYPE_DOCUMENT: u8 = 0x03;
const TYPE_ARRAY: u8 = 0x04;
const TYPE_BINARY: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT64: u8 = 0x12;

/// Serialises all declared fields of `target` that pass its
/// `should_serialise` hook.
#[must_use]
pub fn serialise<T: Reflectable + ?Sized>(target: &T) -> Vec<u8> {
    let mut elements = Vec::new();
    for &name in target.field_names() {
        if !target.should_serialise(name) {
            continue;
        }
        if let Some(value) = target.get(name) {
            append_element(&mut elements, name, &value);
        }
    }
    wrap_document(elements)
}

/// Applies as many declared fields as possible from `bytes`.
///
/// Unrecognised field names and element types are skipped. Returns `false`
/// without touching `target` if the document is structurally malformed.
pub fn deserialise<T: Reflectable + ?Sized>(target: &mut T, bytes: &[u8]) -> bool {
    // Parse completely before applying anything: a malformed snapshot must
    // leave the object exactly as it was.
    let Some(fields) = parse_document(bytes) else {
        return false;
    };

    for (name, value) in fields {
        if !target.set_field(&name, &value) {
            debug!("ignoring unapplicable field {name}");
        }
    }
    true
}

fn wrap_document(elements: Vec<u8>) -> Vec<u8> {
    let total = elements.len() + 5;
    let mut document = Vec::with_capacity(total);
    document.extend_from_slice(&(total as i32).to_le_bytes());
    document.extend_from_slice(&elements);
    document.push(0);
    document
}

fn append_element(out: &mut Vec<u8>, name: &str, value: &Value) {
    let append_header = |out: &mut Vec<u8>, element_type: u8| {
        out.push(element_type);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    };

    match value {
        Value::Bool(b) => {
            append_header(out, TYPE_BOOL);
            out.push(u8::from(*b));
        }
        Value::I64(v) => {
            append_header(out, TYPE_INT64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::F64(v) => {
            append_header(out, TYPE_DOUBLE);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::String(s) => {
            append_header(out, TYPE_STRING);
            out.extend_from_slice(&(s.len() as i32 + 1).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Value::Enum(s) => {
            append_header(out, TYPE_STRING);
            out.extend_from_slice(&(s.len() as i32 + 1).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Value::Bytes(bytes) => {
            append_header(out, TYPE_BINARY);
            out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            out.push(0); // generic binary subtype
            out.extend_from_slice(bytes);
        }
        Value::Array(values) => {
            append_header(out, TYPE_ARRAY);
            let mut elements = Vec::new();
            for (index, item) in values.iter().enumerate() {
                append_element(&mut elements, &index.to_string(), item);
            }
            out.extend_from_slice(&wrap_document(elements));
        }
        Value::Struct(fields) => {
            append_header(out, TYPE_DOCUMENT);
            let mut elements = Vec::new();
            for (field_name, field_value) in fields {
                append_element(&mut elements, field_name, field_value);
            }
            out.extend_from_slice(&wrap_document(elements));
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.offset)?;
        self.offset += 1;
        Some(byte)
    }

    fn i32(&mut self) -> Option<i32> {
        let slice = self.bytes.get(self.offset..self.offset + 4)?;
        self.offset += 4;
        Some(i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn i64(&mut self) -> Option<i64> {
        let slice = self.bytes.get(self.offset..self.offset + 8)?;
        self.offset += 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(slice);
        Some(i64::from_le_bytes(raw))
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.offset..self.offset + count)?;
        self.offset += count;
        Some(slice)
    }

    fn cstring(&mut self) -> Option<String> {
        let start = self.offset;
        let nul = self.bytes[start..].iter().position(|&b| b == 0)?;
        let text = String::from_utf8(self.bytes[start..start + nul].to_vec()).ok()?;
        self.offset = start + nul + 1;
        Some(text)
    }
}

fn parse_document(bytes: &[u8]) -> Option<Vec<(String, Value)>> {
    let mut reader = Reader { bytes, offset: 0 };
    let total = reader.i32()?;
    if total < 5 || total as usize > bytes.len() {
        return None;
    }
    let end = total as usize - 1;

    let mut fields = Vec::new();
    while reader.offset < end {
        let element_type = reader.u8()?;
        if element_type == 0 {
            break;
        }
        let name = reader.cstring()?;

        let value = match element_type {
            TYPE_DOUBLE => Value::F64(f64::from_bits(reader.i64()? as u64)),
            TYPE_BOOL => Value::Bool(reader.u8()? != 0),
            TYPE_INT64 => Value::I64(reader.i64()?),
            // int32 is accepted on read for compatibility though not written.
            0x10 => Value::I64(i64::from(reader.i32()?)),
            TYPE_STRING => {
                let length = reader.i32()?;
                if length < 1 {
                    return None;
                }
                let raw = reader.take(length as usize)?;
                Value::String(String::from_utf8(raw[..raw.len() - 1].to_vec()).ok()?)
            }
            TYPE_BINARY => {
                let length = reader.i32()?;
                if length < 0 {
                    return None;
                }
                let _subtype = reader.u8()?;
                Value::Bytes(reader.take(length as usize)?.to_vec())
            }
            TYPE_DOCUMENT | TYPE_ARRAY => {
                let doc_length = {
                    let slice = reader.bytes.get(reader.offset..reader.offset + 4)?;
                    i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]])
                };
                if doc_length < 5 {
                    return None;
                }
                let raw = reader.take(doc_length as usize)?;
                let inner = parse_document(raw)?;
                if element_type == TYPE_ARRAY {
                    Value::Array(inner.into_iter().map(|(_, value)| value).collect())
                } else {
                    Value::Struct(inner)
                }
            }
            unknown => {
                debug!("cannot skip unknown element type {unknown:#04x}");
                return None;
            }
        };
        fields.push((name, value));
    }

    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{declare_fields, reflectable_enum};

    reflectable_enum! {
        pub enum Region { Pal, Ntsc }
    }

    #[derive(Debug, PartialEq)]
    struct MachineState {
        region: Region,
        fast_tape: bool,
        ram_top: u16,
        rom: Vec<u8>,
        notes: String,
    }

    declare_fields!(MachineState {
        region,
        fast_tape,
        ram_top,
        rom,
        notes,
    });

    fn state() -> MachineState {
        MachineState {
            region: Region::Ntsc,
            fast_tape: true,
            ram_top: 0x7FFF,
            rom: vec![0xDE, 0xAD, 0xBE, 0xEF],
            notes: "boot ok".to_string(),
        }
    }

    #[test]
    fn round_trip_restores_every_field() {
        let original = state();
        let document = serialise(&original);

        let mut copy = MachineState {
            region: Region::Pal,
            fast_tape: false,
            ram_top: 0,
            rom: Vec::new(),
            notes: String::new(),
        };
        assert!(deserialise(&mut copy, &document));
        assert_eq!(copy, original);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        // Serialise a larger struct, deserialise into a smaller one.
        #[derive(Debug, PartialEq)]
        struct Narrow {
            fast_tape: bool,
        }
        declare_fields!(Narrow { fast_tape });

        let document = serialise(&state());
        let mut narrow = Narrow { fast_tape: false };
        assert!(deserialise(&mut narrow, &document));
        assert!(narrow.fast_tape);
    }

    #[test]
    fn malformed_document_leaves_target_untouched() {
        let mut target = state();
        let mut document = serialise(&state());
        // Corrupt the declared length so it overruns the buffer.
        document[0] = 0xFF;
        let before = state();
        assert!(!deserialise(&mut target, &document));
        assert_eq!(target, before);
    }

    #[test]
    fn truncated_document_is_rejected() {
        let document = serialise(&state());
        let mut target = state();
        assert!(!deserialise(&mut target, &document[..document.len() / 2]));
    }

    #[test]
    fn should_serialise_filters_fields() {
        struct Filtered {
            a: u8,
            b: u8,
        }
        impl Reflectable for Filtered {
            fn field_names(&self) -> &'static [&'static str] {
                &["a", "b"]
            }
            fn get(&self, name: &str) -> Option<Value> {
                match name {
                    "a" => Some(Value::I64(i64::from(self.a))),
                    "b" => Some(Value::I64(i64::from(self.b))),
                    _ => None,
                }
            }
            fn set_field(&mut self, name: &str, value: &Value) -> bool {
                match (name, value.as_i64()) {
                    ("a", Some(v)) => {
                        self.a = v as u8;
                        true
                    }
                    ("b", Some(v)) => {
                        self.b = v as u8;
                        true
                    }
                    _ => false,
                }
            }
            fn should_serialise(&self, name: &str) -> bool {
                name != "b"
            }
        }

        let document = serialise(&Filtered { a: 1, b: 2 });
        let mut copy = Filtered { a: 0, b: 0 };
        assert!(deserialise(&mut copy, &document));
        assert_eq!(copy.a, 1);
        assert_eq!(copy.b, 0);
    }
}
