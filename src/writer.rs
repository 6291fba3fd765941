use std::io::{Result, Write};

use super::Object::*;
use super::{Dictionary, Object, StringFormat};

/// Serializer for typed objects. Used for regenerated definitions; bytes
/// the parser does not touch never pass through here.
pub struct Writer;

impl Writer {
    fn need_separator(object: &Object) -> bool {
        matches!(
            *object,
            Null | Boolean(_) | Integer(_) | Real(_) | Reference(_)
        )
    }

    pub fn write_object(file: &mut dyn Write, object: &Object) -> Result<()> {
        match *object {
            Null => file.write_all(b"null"),
            Boolean(ref value) => {
                if *value {
                    file.write_all(b"true")
                } else {
                    file.write_all(b"false")
                }
            }
            Integer(ref value) => {
                let mut buffer = itoa::Buffer::new();
                file.write_all(buffer.format(*value).as_bytes())
            }
            Real(ref value) => write!(file, "{value:.02?}"),
            Name(ref name) => Writer::write_name(file, name),
            String(ref text, ref format) => Writer::write_string(file, text, format),
            Array(ref array) => Writer::write_array(file, array),
            Object::Dictionary(ref dict) => Writer::write_dictionary(file, dict),
            Reference(ref id) => write!(file, "{} {} R", id.0, id.1),
        }
    }

    pub fn write_name(file: &mut dyn Write, name: &[u8]) -> Result<()> {
        file.write_all(b"/")?;
        for &byte in name {
            // white-space and delimiter chars are encoded to # sequences
            // also encode bytes outside of the range 33 (!) to 126 (~)
            if b" \t\n\r\x0C()<>[]{}/%#".contains(&byte) || !(33..=126).contains(&byte) {
                write!(file, "#{byte:02X}")?;
            } else {
                file.write_all(&[byte])?;
            }
        }
        Ok(())
    }

    pub fn write_string(file: &mut dyn Write, text: &[u8], format: &StringFormat) -> Result<()> {
        match *format {
            // Within a Literal string, backslash (\) and unbalanced
            // parentheses should be escaped; \r would otherwise read back
            // as \n.
            StringFormat::Literal => {
                let mut escape_indice = Vec::new();
                let mut parentheses = Vec::new();
                for (index, &byte) in text.iter().enumerate() {
                    match byte {
                        b'(' => parentheses.push(index),
                        b')' => {
                            if !parentheses.is_empty() {
                                parentheses.pop();
                            } else {
                                escape_indice.push(index);
                            }
                        }
                        b'\\' | b'\r' => escape_indice.push(index),
                        _ => continue,
                    }
                }
                escape_indice.append(&mut parentheses);

                file.write_all(b"(")?;
                if !escape_indice.is_empty() {
                    for (index, &byte) in text.iter().enumerate() {
                        if escape_indice.contains(&index) {
                            file.write_all(b"\\")?;
                            file.write_all(&[if byte == b'\r' { b'r' } else { byte }])?;
                        } else {
                            file.write_all(&[byte])?;
                        }
                    }
                } else {
                    file.write_all(text)?;
                }
                file.write_all(b")")?;
            }
            StringFormat::Hexadecimal => {
                file.write_all(b"<")?;
                for &byte in text {
                    write!(file, "{byte:02X}")?;
                }
                file.write_all(b">")?;
            }
        }
        Ok(())
    }

    pub fn write_array(file: &mut dyn Write, array: &[Object]) -> Result<()> {
        file.write_all(b"[")?;
        let mut first = true;
        for object in array {
            if first {
                first = false;
            } else if Writer::need_separator(object) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, object)?;
        }
        file.write_all(b"]")?;
        Ok(())
    }

    pub fn write_dictionary(file: &mut dyn Write, dictionary: &Dictionary) -> Result<()> {
        file.write_all(b"<<")?;
        for (key, value) in dictionary {
            Writer::write_name(file, key)?;
            if Writer::need_separator(value) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, value)?;
        }
        file.write_all(b">>")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    fn serialized(object: &Object) -> Vec<u8> {
        let mut out = Vec::new();
        Writer::write_object(&mut out, object).unwrap();
        out
    }

    #[test]
    fn writes_primitives() {
        assert_eq!(serialized(&Object::Null), b"null");
        assert_eq!(serialized(&Object::Boolean(true)), b"true");
        assert_eq!(serialized(&Object::Integer(-42)), b"-42");
        assert_eq!(serialized(&Object::Reference((3, 0))), b"3 0 R");
    }

    #[test]
    fn escapes_names() {
        assert_eq!(serialized(&Object::Name(b"name \t".to_vec())), b"/name#20#09");
    }

    #[test]
    fn escapes_unbalanced_parentheses() {
        assert_eq!(
            serialized(&Object::string_literal("text((\r)")),
            b"(text\\((\\r))"
        );
    }

    #[test]
    fn writes_hex_strings() {
        assert_eq!(
            serialized(&Object::String(b"\xDE\xAD".to_vec(), StringFormat::Hexadecimal)),
            b"<DEAD>"
        );
    }

    #[test]
    fn writes_dictionaries_in_insertion_order() {
        let dict = dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference((2, 0)),
        };
        assert_eq!(
            serialized(&Object::Dictionary(dict)),
            b"<</Type/Catalog/Pages 2 0 R>>"
        );
    }
}
