//! The PDF grammar and the helpers that interpret its output.
//!
//! This module builds the concrete states driving the scanner over PDF
//! syntax, names the identifier tags that label composite scanner values,
//! and converts those values both back to raw PDF bytes (for pass-through
//! regeneration) and into typed [`Object`]s (for the mutable overlays).

use std::sync::LazyLock;

use log::warn;

use crate::grammar::{Grammar, GrammarBuilder, Operator::*, StateId};
use crate::object::{Dictionary, Object, StringFormat};
use crate::scanner::Node;

/// Identifier tags used by the grammar's composite values.
pub mod tags {
    use crate::grammar::Tag;

    pub const META: Tag = "meta";
    pub const NAME: Tag = "name";
    pub const OBJ: Tag = "obj";
    pub const REF: Tag = "ref";
    pub const HEXSTR: Tag = "hexstr";
    pub const ENTRIES: Tag = "entries";
    pub const DICT: Tag = "dict";
    pub const DE: Tag = "de";
    pub const ARRAY: Tag = "array";
    pub const AE: Tag = "ae";
    pub const XREF: Tag = "xref";
    pub const STARTXREF: Tag = "startxref";
    pub const ENDSTREAM: Tag = "endstream";
}

pub struct PdfGrammar {
    pub grammar: Grammar,
    /// The PDF environment: objects, definitions, streams, xref markers.
    pub root: StateId,
    /// Tiny reversed grammar that locates the trailing `startxref`.
    pub xref_seeker: StateId,
    /// Passes every symbol through as a result.
    #[allow(dead_code)]
    pub string_stream: StateId,
    /// Reads a sequence of arbitrary values (object stream bodies).
    pub arb_stream: StateId,
}

static SHARED: LazyLock<PdfGrammar> = LazyLock::new(build);

/// The compiled PDF grammar. Immutable and shared by every pipe in the
/// process.
pub fn shared() -> &'static PdfGrammar {
    &SHARED
}

fn build() -> PdfGrammar {
    use tags::*;

    let mut b = GrammarBuilder::new();

    let root = b.declare("root", true);
    let xref_seeker = b.declare("xref_seeker", true);
    let string_stream = b.declare("string_stream", true);
    let arb_stream = b.declare("arb_stream", true);

    let comment_or_meta = b.declare("comment_or_meta", false);
    let object_reference = b.declare("object_reference", false);
    let dict_hex = b.declare("dict_hex", false);
    let dict = b.declare("dict", false);
    let name_str = b.declare("name_str", false);
    let dict_hex_term = b.declare("dict_hex_term", false);
    let name = b.declare("name", false);
    let paren = b.declare("paren", false);
    let arb = b.declare("arb", false);
    let number_or_obref = b.declare("number_or_obref", false);
    let number = b.declare("number", false);
    let array = b.declare("array", false);
    let xref = b.declare("xref", false);
    let end_numeric = b.declare("end_numeric", false);

    // root: detects objects, their definitions, their streams, xref
    // markers and trailing metadata
    b.symbol(root, "%", vec![PushState(comment_or_meta)]);
    b.fallback(root, vec![PushbackSymbol, PushState(arb)]);
    b.symbol(root, "stream", vec![PushResult]);
    // endstream, ndstream or dstream, depending on whether the producer
    // counted the newline after the stream keyword into /Length (and on
    // whether it used DOS newlines); never echoed into the output, which
    // either passes the original bytes through or writes its own keyword
    b.symbol(root, "endstream", vec![PushComplex(ENDSTREAM)]);
    b.symbol(root, "ndstream", vec![PushComplex(ENDSTREAM)]);
    b.symbol(root, "dstream", vec![PushComplex(ENDSTREAM)]);
    b.symbol(root, "xref", vec![PushState(xref)]);
    b.symbol(root, "trailer", vec![PushResult]);
    b.symbol(
        root,
        "startxref",
        vec![PushState(number), PopValue, PushComplex(STARTXREF)],
    );
    b.symbol(root, "endobj", vec![PushResult]);

    // %anything (comment) or %%EOF (meta)
    b.symbol(
        comment_or_meta,
        "%",
        vec![PopLine, PushResult, PopValue, PushComplex(META), PopState],
    );
    b.fallback(comment_or_meta, vec![PopLine, PopState]);

    // arb: arbitrary value (number, array, dict, string, ...)
    b.number(
        arb,
        vec![PushResult, PushState(number_or_obref), PopState],
    );
    b.symbol(arb, "true", vec![PushResult, PopState]);
    b.symbol(arb, "false", vec![PushResult, PopState]);
    b.symbol(arb, "null", vec![PushResult, PopState]);
    b.symbol(arb, "(", vec![Mark, PushState(paren), PopState]);
    b.symbol(arb, "[", vec![PushState(array), PopState]);
    b.symbol(
        arb,
        "/",
        vec![PushState(name_str), PushState(name), PopState],
    );
    b.symbol(arb, "<", vec![PushState(dict_hex), PopState]);

    // xref section headers: pairs of numbers until something else appears
    b.number(
        xref,
        vec![
            PushResult,
            PushWeakState(number),
            PopValue,
            PopValue,
            PushComplex(XREF),
        ],
    );
    b.fallback(xref, vec![PushbackSymbol, PopState]);

    b.number(number, vec![PushResult, PopState]);

    // a number, or the first number of an object reference
    b.number(
        number_or_obref,
        vec![PushResult, PushState(object_reference), PopState],
    );
    b.fallback(number_or_obref, vec![PushbackSymbol, PopState]);

    // paren: runs to the matching ")", tolerating nested pairs
    b.symbol(paren, "(", vec![PushWeakState(paren), PopValue]);
    b.symbol(paren, ")", vec![PushMarked, PopState]);
    b.fallback(paren, vec![PushbackSymbol, ReadToDelimiter]);

    b.symbol(
        array,
        "]",
        vec![PullBuildVariable(ENTRIES), PushComplex(ARRAY), PopState],
    );
    b.fallback(
        array,
        vec![
            PushbackSymbol,
            PushWeakState(arb),
            PopValue,
            StoveComplex(AE),
        ],
    );

    // name_str: the symbol following a "/", possibly parenthesized
    b.symbol(name_str, "(", vec![Mark, PushWeakState(paren), PopState]);
    b.fallback(name_str, vec![PushResult, PopState]);

    // name: wraps a lexed name_str into a proper complex
    b.fallback(
        name,
        vec![PushbackSymbol, PopValue, PushComplex(NAME), PopState],
    );

    // dict_hex: "<" either opens a dictionary or a hex string
    b.symbol(dict_hex, "<", vec![PushState(dict), PopState]);
    b.symbol(
        dict_hex,
        ">",
        vec![PushEmptyString, PopValue, PushComplex(HEXSTR), PopState],
    );
    b.fallback(
        dict_hex,
        vec![
            PushbackSymbol,
            ReadToDelimiter,
            PushResult,
            PushState(dict_hex_term),
            PopValue,
            PushComplex(HEXSTR),
            PopState,
        ],
    );

    // object reference: expects two numbers on the results stack and
    // "obj" or "R" as the current symbol
    b.symbol(
        object_reference,
        "obj",
        vec![PopValue, PopValue, PushComplex(OBJ), PopState],
    );
    b.symbol(
        object_reference,
        "R",
        vec![PopValue, PopValue, PushComplex(REF), PopState],
    );
    // not an object reference after all
    b.fallback(
        object_reference,
        vec![PushbackSymbol, PushbackValue, PopState],
    );

    // dict: pairs of /name <arbitrary> until ">>"
    b.symbol(
        dict,
        ">",
        vec![
            PushWeakState(dict_hex_term),
            PullBuildVariable(ENTRIES),
            PushComplex(DICT),
            PopState,
        ],
    );
    b.symbol(
        dict,
        "/",
        vec![
            PushWeakState(name_str),
            PushWeakState(arb),
            PopValue,
            PopValue,
            StoveComplex(DE),
        ],
    );

    b.symbol(dict_hex_term, ">", vec![PopState]);

    b.fallback(string_stream, vec![PushResult]);

    b.fallback(arb_stream, vec![PushbackSymbol, PushState(arb)]);

    // xref seeker: skips arbitrary bytes (reversed) until a number
    // followed by "startxref" appears
    b.fallback(xref_seeker, vec![Nop]);
    b.number(
        xref_seeker,
        vec![PushResult, PushState(end_numeric)],
    );
    b.symbol(xref_seeker, ">", vec![PopState]);

    b.symbol(
        end_numeric,
        "startxref",
        vec![PopValue, PushComplex(STARTXREF), PopState],
    );

    let grammar = b.compile();

    PdfGrammar {
        grammar,
        root,
        xref_seeker,
        string_stream,
        arb_stream,
    }
}

/// Look up a key in a dictionary complex (`[dict, entries, [...]]`).
pub fn dict_get<'a>(stack: &'a [Node], key: &[u8]) -> Option<&'a Node> {
    if stack.first() != Some(&Node::Id(tags::DICT)) {
        return None;
    }
    let entries = stack.get(2)?.as_stack()?;
    for entry in entries {
        let entry = entry.as_stack()?;
        if entry.first() == Some(&Node::Id(tags::DE)) && entry.get(1)?.as_str() == Some(key) {
            return entry.get(2);
        }
    }
    None
}

/// Remove a key from a dictionary complex in place. Returns whether the
/// key was present.
pub fn dict_remove(stack: &mut [Node], key: &[u8]) -> bool {
    if stack.first() != Some(&Node::Id(tags::DICT)) {
        return false;
    }
    let Some(Node::Stack(entries)) = stack.get_mut(2) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|entry| {
        !matches!(entry.as_stack(), Some(e)
            if e.first() == Some(&Node::Id(tags::DE)) && e.get(1).and_then(Node::as_str) == Some(key))
    });
    entries.len() != before
}

/// Interpret a `[ref, id, gen]` complex.
pub fn reference_of(node: &Node) -> Option<(u32, u16)> {
    let stack = node.as_stack()?;
    if stack.first() != Some(&Node::Id(tags::REF)) {
        return None;
    }
    id_pair_of(stack)
}

fn id_pair_of(stack: &[Node]) -> Option<(u32, u16)> {
    let id = stack.get(1)?.as_int()? as u32;
    let generation = stack.get(2)?.as_int()? as u16;
    Some((id, generation))
}

/// Serialize a scanner node back into PDF syntax.
pub fn serialize_node(node: &Node, out: &mut Vec<u8>) {
    match node {
        Node::Id(_) => {}
        Node::Str(bytes) => out.extend_from_slice(bytes),
        Node::Stack(stack) => serialize_stack(stack, out),
    }
}

fn serialize_stack(stack: &[Node], out: &mut Vec<u8>) {
    let Some(Node::Id(tag)) = stack.first() else {
        for node in stack {
            serialize_node(node, out);
        }
        return;
    };
    match *tag {
        t if t == tags::DICT => {
            out.extend_from_slice(b"<< ");
            if let Some(entries) = stack.get(2).and_then(Node::as_stack) {
                for entry in entries {
                    serialize_node(entry, out);
                    out.push(b' ');
                }
            }
            out.extend_from_slice(b">>");
        }
        t if t == tags::DE => {
            out.push(b'/');
            if let Some(key) = stack.get(1).and_then(Node::as_str) {
                out.extend_from_slice(key);
            }
            out.push(b' ');
            if let Some(value) = stack.get(2) {
                serialize_node(value, out);
            }
        }
        t if t == tags::ARRAY => {
            out.extend_from_slice(b"[ ");
            if let Some(entries) = stack.get(2).and_then(Node::as_stack) {
                for entry in entries {
                    serialize_node(entry, out);
                    out.push(b' ');
                }
            }
            out.push(b']');
        }
        t if t == tags::AE => {
            if let Some(value) = stack.get(1) {
                serialize_node(value, out);
            }
        }
        t if t == tags::NAME => {
            out.push(b'/');
            if let Some(name) = stack.get(1).and_then(Node::as_str) {
                out.extend_from_slice(name);
            }
        }
        t if t == tags::HEXSTR => {
            out.push(b'<');
            if let Some(hex) = stack.get(1).and_then(Node::as_str) {
                out.extend_from_slice(hex);
            }
            out.push(b'>');
        }
        t if t == tags::REF => {
            serialize_obref(stack, b" R", out);
        }
        t if t == tags::OBJ => {
            serialize_obref(stack, b" obj", out);
        }
        t if t == tags::META => {}
        other => warn!("cannot serialize composite tagged {other}"),
    }
}

fn serialize_obref(stack: &[Node], suffix: &[u8], out: &mut Vec<u8>) {
    if let Some(id) = stack.get(1).and_then(Node::as_str) {
        out.extend_from_slice(id);
    }
    out.push(b' ');
    if let Some(generation) = stack.get(2).and_then(Node::as_str) {
        out.extend_from_slice(generation);
    }
    out.extend_from_slice(suffix);
}

/// Convert a scanner node into a typed object for the mutable overlays.
pub fn node_to_object(node: &Node) -> Object {
    match node {
        Node::Id(_) => Object::Null,
        Node::Str(bytes) => primitive_to_object(bytes),
        Node::Stack(stack) => stack_to_object(stack),
    }
}

fn primitive_to_object(bytes: &[u8]) -> Object {
    match bytes {
        b"true" => return Object::Boolean(true),
        b"false" => return Object::Boolean(false),
        b"null" => return Object::Null,
        _ => {}
    }
    if bytes.first() == Some(&b'(') {
        let inner = &bytes[1..bytes.len().saturating_sub(1)];
        return Object::String(decode_literal_string(inner), StringFormat::Literal);
    }
    if crate::symbols::is_numeric(bytes, false) {
        if let Ok(value) = std::str::from_utf8(bytes).unwrap_or("").parse::<i64>() {
            return Object::Integer(value);
        }
    }
    if crate::symbols::is_numeric(bytes, true) {
        if let Ok(value) = std::str::from_utf8(bytes).unwrap_or("").parse::<f32>() {
            return Object::Real(value);
        }
    }
    Object::String(bytes.to_vec(), StringFormat::Literal)
}

fn stack_to_object(stack: &[Node]) -> Object {
    let Some(Node::Id(tag)) = stack.first() else {
        return Object::Null;
    };
    match *tag {
        t if t == tags::DICT => {
            let mut dict = Dictionary::new();
            if let Some(entries) = stack.get(2).and_then(Node::as_stack) {
                for entry in entries {
                    if let Some(e) = entry.as_stack() {
                        if let (Some(key), Some(value)) =
                            (e.get(1).and_then(Node::as_str), e.get(2))
                        {
                            dict.set(key.to_vec(), node_to_object(value));
                        }
                    }
                }
            }
            Object::Dictionary(dict)
        }
        t if t == tags::ARRAY => {
            let mut array = Vec::new();
            if let Some(entries) = stack.get(2).and_then(Node::as_stack) {
                for entry in entries {
                    if let Some(e) = entry.as_stack() {
                        if let Some(value) = e.get(1) {
                            array.push(node_to_object(value));
                        }
                    }
                }
            }
            Object::Array(array)
        }
        t if t == tags::NAME => Object::Name(
            stack
                .get(1)
                .and_then(Node::as_str)
                .unwrap_or_default()
                .to_vec(),
        ),
        t if t == tags::HEXSTR => Object::String(
            decode_hex_string(stack.get(1).and_then(Node::as_str).unwrap_or_default()),
            StringFormat::Hexadecimal,
        ),
        t if t == tags::REF || t == tags::OBJ => match id_pair_of(stack) {
            Some(id) => Object::Reference(id),
            None => Object::Null,
        },
        other => {
            warn!("cannot type composite tagged {other}");
            Object::Null
        }
    }
}

/// Decode the escapes of a literal string body (the bytes between the
/// parentheses).
pub fn decode_literal_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied().peekable();
    while let Some(b) = iter.next() {
        if b == b'\r' {
            // bare EOL inside a string reads as \n; swallow a following \n
            if iter.peek() == Some(&b'\n') {
                iter.next();
            }
            out.push(b'\n');
            continue;
        }
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'b') => out.push(0x08),
            Some(b'f') => out.push(0x0C),
            Some(b'(') => out.push(b'('),
            Some(b')') => out.push(b')'),
            Some(b'\\') => out.push(b'\\'),
            Some(b'\r') => {
                // escaped line break: the string continues on the next line
                if iter.peek() == Some(&b'\n') {
                    iter.next();
                }
            }
            Some(b'\n') => {}
            Some(d @ b'0'..=b'7') => {
                let mut value = (d - b'0') as u32;
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            iter.next();
                        }
                        _ => break,
                    }
                }
                out.push(value as u8);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn decode_hex_string(hex: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(hex.len() / 2);
    let mut nibbles = hex.iter().filter_map(|b| (*b as char).to_digit(16));
    while let Some(high) = nibbles.next() {
        let low = nibbles.next().unwrap_or(0);
        out.push((high * 16 + low) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{FixedSource, Scanner};

    fn parse_one(input: &[u8]) -> Node {
        let pdf = shared();
        let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
        let mut src = FixedSource::new(input);
        if let Some(stack) = scanner.pop_stack(&mut src) {
            Node::Stack(stack)
        } else {
            Node::Str(scanner.pop_string(&mut src).expect("no result"))
        }
    }

    fn roundtrip(input: &[u8]) -> Vec<u8> {
        let node = parse_one(input);
        let mut out = Vec::new();
        serialize_node(&node, &mut out);
        out
    }

    #[test]
    fn serializes_dictionaries_in_insertion_order() {
        assert_eq!(
            roundtrip(b"<</Type /Catalog /Pages 2 0 R>>"),
            b"<< /Type /Catalog /Pages 2 0 R >>".to_vec()
        );
    }

    #[test]
    fn serializes_nested_structures() {
        assert_eq!(
            roundtrip(b"<</Kids [3 0 R 4 0 R] /Count 2>>"),
            b"<< /Kids [ 3 0 R 4 0 R ] /Count 2 >>".to_vec()
        );
    }

    #[test]
    fn serializes_hex_strings() {
        assert_eq!(roundtrip(b"<</ID <DEADBEEF>>>"), b"<< /ID <DEADBEEF> >>".to_vec());
    }

    #[test]
    fn dict_get_finds_values() {
        let node = parse_one(b"<</Length 42 /Filter /FlateDecode>>");
        let stack = node.as_stack().unwrap();
        assert_eq!(dict_get(stack, b"Length").unwrap().as_int(), Some(42));
        assert_eq!(
            dict_get(stack, b"Filter").unwrap().tag(),
            Some(tags::NAME)
        );
        assert!(dict_get(stack, b"Missing").is_none());
    }

    #[test]
    fn dict_remove_drops_entries() {
        let node = parse_one(b"<</A 1 /B 2>>");
        let mut stack = node.into_stack().unwrap();
        assert!(dict_remove(&mut stack, b"A"));
        assert!(dict_get(&stack, b"A").is_none());
        assert!(dict_get(&stack, b"B").is_some());
        assert!(!dict_remove(&mut stack, b"A"));
    }

    #[test]
    fn converts_typed_values() {
        let node = parse_one(b"<</N 3 /Sub <</X true>> /S (hi\\)there)>>");
        let Object::Dictionary(dict) = node_to_object(&node) else {
            panic!("expected a dictionary");
        };
        assert_eq!(dict.get(b"N").and_then(|o| o.as_i64()).ok(), Some(3));
        let sub = dict.get(b"Sub").unwrap().as_dict().unwrap();
        assert_eq!(sub.get(b"X").and_then(|o| o.as_bool()).ok(), Some(true));
        assert_eq!(
            dict.get(b"S").unwrap().as_str().unwrap(),
            b"hi)there".as_slice()
        );
    }

    #[test]
    fn literal_string_escapes() {
        assert_eq!(decode_literal_string(br"a\nb"), b"a\nb");
        assert_eq!(decode_literal_string(br"a\101"), b"aA");
        assert_eq!(decode_literal_string(b"a\\\nb"), b"ab");
        assert_eq!(decode_literal_string(b"a\rb"), b"a\nb");
    }

    #[test]
    fn references_resolve() {
        let node = parse_one(b"<</Parent 7 2 R>>");
        let stack = node.as_stack().unwrap();
        let parent = dict_get(stack, b"Parent").unwrap();
        assert_eq!(reference_of(parent), Some((7, 2)));
    }
}
