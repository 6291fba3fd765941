//! Compressed object streams (`/Type /ObjStm`).
//!
//! The stream body is a pair table (`id offset` per embedded object)
//! followed by the serialized definitions. A view parses the decoded body,
//! hands out mutable views of embedded objects, and commits changes by
//! re-serializing the body and re-encoding it with the container's filter
//! chain.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::filters::FilterChain;
use crate::indirect_object::{IndirectObject, ObjectClass};
use crate::pdf_grammar;
use crate::scanner::{FixedSource, Node, Scanner};
use crate::symbols;

struct Element {
    id: u32,
    def: Option<Node>,
}

pub struct ObjectStreamView {
    n: usize,
    chain: Option<FilterChain>,
    elements: Vec<Element>,
    constructs: BTreeMap<u32, Rc<RefCell<IndirectObject>>>,
}

impl ObjectStreamView {
    /// Build a view from the container's dictionary (`/N`, `/First`,
    /// `/Filter`, `/DecodeParms`). The body is supplied to [`parse`]
    /// separately, already decoded.
    ///
    /// [`parse`]: ObjectStreamView::parse
    pub fn from_object(container: &mut IndirectObject) -> Result<ObjectStreamView> {
        let dict = container.dictionary();
        let n = dict
            .get(b"N")
            .and_then(|o| o.as_i64())
            .map_err(|_| Error::Syntax("object stream without /N".into()))?;
        let chain = FilterChain::from_dict(dict)?;
        Ok(ObjectStreamView {
            n: n as usize,
            chain,
            elements: Vec::new(),
            constructs: BTreeMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Parse the decoded stream body: the pair header, then one definition
    /// per embedded object.
    pub fn parse(&mut self, data: &[u8]) -> Result<()> {
        let pdf = pdf_grammar::shared();
        let mut scanner = Scanner::new(&pdf.grammar, pdf.arb_stream);
        let mut src = FixedSource::new(data);

        let mut pairs = Vec::with_capacity(self.n);
        for _ in 0..self.n {
            let id = ascii_int_at(data, scanner.boffset)
                .ok_or_else(|| Error::Syntax("malformed object stream header".into()))?;
            scanner.skip_past_class(&mut src, symbols::WHITESPACE);
            let _offset = ascii_int_at(data, scanner.boffset)
                .ok_or_else(|| Error::Syntax("malformed object stream header".into()))?;
            scanner.skip_past_class(&mut src, symbols::WHITESPACE);
            pairs.push(id as u32);
        }

        for id in pairs {
            let def = if let Some(stack) = scanner.pop_stack(&mut src) {
                Node::Stack(stack)
            } else if let Some(s) = scanner.pop_string(&mut src) {
                Node::Str(s)
            } else {
                return Err(Error::Syntax(format!(
                    "object stream body ended before object {id}"
                )));
            };
            self.elements.push(Element { id, def: Some(def) });
        }
        Ok(())
    }

    /// The embedded object with the given id. Repeated calls return the
    /// same view.
    pub fn object_by_id(&mut self, id: u32) -> Option<Rc<RefCell<IndirectObject>>> {
        if let Some(ob) = self.constructs.get(&id) {
            return Some(ob.clone());
        }
        let element = self.elements.iter_mut().find(|e| e.id == id)?;
        let def = element.def.take()?;
        let mut ob = IndirectObject::with_class(id, 0, ObjectClass::Compressed);
        ob.set_def(def);
        let ob = Rc::new(RefCell::new(ob));
        self.constructs.insert(id, ob.clone());
        Some(ob)
    }

    pub fn object_at_index(&mut self, index: usize) -> Option<Rc<RefCell<IndirectObject>>> {
        let id = self.elements.get(index)?.id;
        self.object_by_id(id)
    }

    /// Take the raw definition at a header index without constructing a
    /// view.
    pub(crate) fn take_def_at(&mut self, index: usize) -> Option<Node> {
        self.elements.get_mut(index)?.def.take()
    }

    /// Re-serialize the stream body and install it as the container's new
    /// stream, re-encoded with the container's filter chain. A no-op when
    /// no embedded object was ever constructed.
    pub fn commit(&mut self, container: &mut IndirectObject) -> Result<()> {
        if self.constructs.is_empty() {
            return Ok(());
        }

        let mut defs: Vec<Vec<u8>> = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            let mut bytes = match (&element.def, self.constructs.get(&element.id)) {
                (_, Some(ob)) => ob.borrow_mut().generate_definition(),
                (Some(def), None) => {
                    let mut out = Vec::new();
                    pdf_grammar::serialize_node(def, &mut out);
                    out
                }
                (None, None) => {
                    return Err(Error::Syntax(format!(
                        "object stream element {} lost its definition",
                        element.id
                    )));
                }
            };
            if bytes.last() != Some(&b'\n') {
                bytes.push(b'\n');
            }
            defs.push(bytes);
        }

        let mut header = Vec::new();
        let mut offset = 0usize;
        for (element, def) in self.elements.iter().zip(&defs) {
            header.extend_from_slice(format!("{} {} ", element.id, offset).as_bytes());
            offset += def.len();
        }
        if let Some(last) = header.last_mut() {
            *last = b'\n';
        }

        let first = header.len();
        let mut content = header;
        for def in defs {
            content.extend_from_slice(&def);
        }

        let content = match &self.chain {
            Some(chain) => chain.encode(&content)?,
            None => content,
        };

        container.set_dictionary_entry("First", first as i64);
        container.set_stream(content, true, false);
        Ok(())
    }
}

fn ascii_int_at(data: &[u8], pos: usize) -> Option<i64> {
    let mut end = pos;
    while end < data.len() && data[end].is_ascii_digit() {
        end += 1;
    }
    if end == pos {
        return None;
    }
    std::str::from_utf8(&data[pos..end]).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::scanner::Node;

    fn container(dict: &[u8]) -> IndirectObject {
        let pdf = pdf_grammar::shared();
        let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
        let mut src = FixedSource::new(dict);
        let stack = scanner.pop_stack(&mut src).unwrap();
        let mut ob = IndirectObject::new(20, 0);
        ob.set_def(Node::Stack(stack));
        ob
    }

    #[test]
    fn parses_embedded_definitions() {
        let mut ob = container(b"<</Type /ObjStm /N 2 /First 10>>");
        let mut view = ObjectStreamView::from_object(&mut ob).unwrap();
        view.parse(b"11 0 12 14\n<</A 1>>\n<</B 2>>\n").unwrap();
        let first = view.object_by_id(11).unwrap();
        assert_eq!(
            first
                .borrow_mut()
                .get_dictionary_entry(b"A")
                .and_then(|o| o.as_i64().ok()),
            Some(1)
        );
        assert!(view.object_by_id(13).is_none());
    }

    #[test]
    fn commit_rebuilds_header_and_offsets() {
        let mut ob = container(b"<</Type /ObjStm /N 2 /First 10>>");
        let mut view = ObjectStreamView::from_object(&mut ob).unwrap();
        view.parse(b"11 0 12 14\n<</A 1>>\n<</B 2>>\n").unwrap();

        let second = view.object_by_id(12).unwrap();
        second.borrow_mut().set_dictionary_entry("Touched", true);
        view.commit(&mut ob).unwrap();

        let content = ob.ovr_stream.clone().unwrap();
        let text = String::from_utf8(content).unwrap();
        let first = ob
            .get_dictionary_entry(b"First")
            .and_then(|o| o.as_i64().ok())
            .unwrap() as usize;
        assert!(text[first..].contains("/Touched true"));
        // header pairs still name both objects
        assert!(text[..first].starts_with("11 0 12 "));
        assert_eq!(
            ob.get_dictionary_entry(b"Length").and_then(|o| o.as_i64().ok()),
            Some(text.len() as i64)
        );
    }

    #[test]
    fn commit_with_filter_chain_is_decodable() {
        let mut ob = container(b"<</Type /ObjStm /N 1 /First 5 /Filter /FlateDecode>>");
        let mut view = ObjectStreamView::from_object(&mut ob).unwrap();
        view.parse(b"30 0\n<</X (y)>>\n").unwrap();
        view.object_by_id(30)
            .unwrap()
            .borrow_mut()
            .set_dictionary_entry("X", Object::string_literal("z"));
        view.commit(&mut ob).unwrap();
        let packed = ob.ovr_stream.clone().unwrap();
        let plain = crate::filters::decode(&packed, b"FlateDecode", None).unwrap();
        assert!(String::from_utf8_lossy(&plain).contains("/X (z)"));
    }
}
