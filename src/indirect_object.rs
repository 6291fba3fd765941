//! Mutable views of indirect objects as they stream past.
//!
//! An object keeps the raw definition the scanner produced; dictionary and
//! array overlays are materialized on first access and, once present, are
//! what gets serialized back out. Stream content can be replaced, skipped,
//! or re-encoded through the object's declared filter chain.

use log::warn;

use crate::filters::FilterChain;
use crate::object::Object;
use crate::pdf_grammar::{self, tags};
use crate::scanner::Node;
use crate::writer::Writer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Regular,
    /// Lives inside an object stream.
    Compressed,
    /// The trailer; serialized with a `trailer` header instead of
    /// `id gen obj`.
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Unknown,
    Boolean,
    Integer,
    Real,
    Name,
    String,
    Array,
    Dictionary,
    Stream,
}

/// Hook run right before the object is serialized to the output.
pub type Synchronizer = Box<dyn FnMut(&mut IndirectObject)>;

pub struct IndirectObject {
    id: u32,
    generation: u16,
    class: ObjectClass,
    otype: ObjectType,
    def: Option<Node>,
    dict: Option<crate::object::Dictionary>,
    array: Option<Vec<Object>>,
    pub(crate) has_stream: bool,
    /// Raw (undecoded) stream length.
    pub(crate) stream_len: u64,
    /// Decoded stream content, once fetched through the parser.
    pub(crate) extracted: Option<Vec<u8>>,
    pub(crate) skip_stream: bool,
    pub(crate) skip_object: bool,
    pub(crate) delete_object: bool,
    pub(crate) ovr_def: Option<Vec<u8>>,
    pub(crate) ovr_stream: Option<Vec<u8>>,
    pub(crate) encrypted_doc: bool,
    ref_string: Option<String>,
    pub(crate) sync: Option<Synchronizer>,
}

impl IndirectObject {
    pub(crate) fn new(id: u32, generation: u16) -> IndirectObject {
        IndirectObject {
            id,
            generation,
            class: ObjectClass::Regular,
            otype: ObjectType::Unknown,
            def: None,
            dict: None,
            array: None,
            has_stream: false,
            stream_len: 0,
            extracted: None,
            skip_stream: false,
            skip_object: false,
            delete_object: false,
            ovr_def: None,
            ovr_stream: None,
            encrypted_doc: false,
            ref_string: None,
            sync: None,
        }
    }

    pub(crate) fn with_class(id: u32, generation: u16, class: ObjectClass) -> IndirectObject {
        let mut ob = IndirectObject::new(id, generation);
        ob.class = class;
        ob
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub(crate) fn set_class(&mut self, class: ObjectClass) {
        self.class = class;
    }

    pub fn object_type(&self) -> ObjectType {
        self.otype
    }

    pub fn has_stream(&self) -> bool {
        self.has_stream
    }

    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    /// Decoded stream content; present once fetched via the parser.
    pub fn stream(&self) -> Option<&[u8]> {
        self.extracted.as_deref()
    }

    /// The `"id gen R"` form of this object.
    pub fn reference_string(&mut self) -> &str {
        if self.ref_string.is_none() {
            self.ref_string = Some(format!("{} {} R", self.id, self.generation));
        }
        self.ref_string.as_deref().unwrap()
    }

    pub(crate) fn set_def(&mut self, def: Node) {
        self.otype = type_of_def(&def);
        self.def = Some(def);
    }

    pub(crate) fn mark_stream(&mut self) {
        self.has_stream = true;
        self.otype = ObjectType::Stream;
    }

    pub(crate) fn take_sync(&mut self) -> Option<Synchronizer> {
        self.sync.take()
    }

    /// Install a hook that runs right before serialization.
    pub fn set_synchronizer(&mut self, hook: Synchronizer) {
        self.sync = Some(hook);
    }

    fn materialize_dict(&mut self) {
        if self.dict.is_none() {
            let dict = match self.def.as_ref().map(pdf_grammar::node_to_object) {
                Some(Object::Dictionary(dict)) => dict,
                _ => crate::object::Dictionary::new(),
            };
            self.dict = Some(dict);
            if self.otype != ObjectType::Stream {
                self.otype = ObjectType::Dictionary;
            }
        }
    }

    /// The editable dictionary overlay. Materialized from the raw
    /// definition on first call; serialization uses the overlay from then
    /// on.
    pub fn dictionary(&mut self) -> &mut crate::object::Dictionary {
        self.materialize_dict();
        self.dict.as_mut().unwrap()
    }

    pub fn get_dictionary_entry(&mut self, key: &[u8]) -> Option<&Object> {
        self.materialize_dict();
        self.dict.as_ref().unwrap().get(key).ok()
    }

    pub fn set_dictionary_entry<V: Into<Object>>(&mut self, key: &str, value: V) {
        self.dictionary().set(key, value.into());
    }

    pub fn remove_dictionary_entry(&mut self, key: &[u8]) {
        self.dictionary().remove(key);
    }

    fn materialize_array(&mut self) {
        if self.array.is_none() {
            let array = match self.def.as_ref().map(pdf_grammar::node_to_object) {
                Some(Object::Array(array)) => array,
                _ => Vec::new(),
            };
            self.array = Some(array);
            self.otype = ObjectType::Array;
        }
    }

    pub fn array(&mut self) -> &mut Vec<Object> {
        self.materialize_array();
        self.array.as_mut().unwrap()
    }

    pub fn array_len(&mut self) -> usize {
        self.array().len()
    }

    pub fn get_array_element(&mut self, index: usize) -> Option<&Object> {
        self.materialize_array();
        self.array.as_ref().unwrap().get(index)
    }

    pub fn append_array_element<V: Into<Object>>(&mut self, value: V) {
        self.array().push(value.into());
    }

    pub fn remove_array_element(&mut self, index: usize) {
        let array = self.array();
        if index < array.len() {
            array.remove(index);
        }
    }

    pub fn set_array_element<V: Into<Object>>(&mut self, index: usize, value: V) {
        let array = self.array();
        if index < array.len() {
            array[index] = value.into();
        }
    }

    /// Replace the object's serialized definition wholesale.
    pub fn replace_with_bytes(&mut self, def: Vec<u8>) {
        self.ovr_def = Some(def);
    }

    /// Omit the stream (and its keywords) from the output.
    pub fn skip_stream(&mut self) {
        self.skip_stream = true;
    }

    /// Install an override stream. With `update_length` the `/Length`
    /// entry follows the new byte count. `pre_encrypted` marks content
    /// already encrypted by the caller; it is recorded but meaningless in
    /// unencrypted documents.
    pub fn set_stream(&mut self, content: Vec<u8>, update_length: bool, pre_encrypted: bool) {
        if pre_encrypted && !self.encrypted_doc {
            warn!("pre-encrypted stream content in an unencrypted document");
        }
        if update_length {
            self.set_dictionary_entry("Length", content.len() as i64);
        }
        self.ovr_stream = Some(content);
    }

    /// Install an override stream, first encoding it through the filter
    /// chain the object's dictionary declares. Returns false when there is
    /// no filter or it is unsupported; the caller decides whether to
    /// change the declared encoding or abort.
    pub fn set_stream_filtered(&mut self, content: Vec<u8>) -> bool {
        let chain = match FilterChain::from_dict(self.dictionary()) {
            Ok(Some(chain)) => chain,
            Ok(None) => return false,
            Err(_) => return false,
        };
        match chain.encode(&content) {
            Ok(encoded) => {
                self.set_stream(encoded, true, false);
                true
            }
            Err(err) => {
                warn!("stream filter failed to apply: {err}");
                false
            }
        }
    }

    /// Mark the object deleted: its cross reference entry becomes free and
    /// no body is written.
    pub fn delete(&mut self) {
        if self.class == ObjectClass::Compressed {
            warn!("objects inside object streams cannot be deleted");
            return;
        }
        self.skip_object = true;
        self.delete_object = true;
    }

    /// Serialize the object header and body (not the stream).
    pub fn generate_definition(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        match self.class {
            ObjectClass::Regular => {
                out.extend_from_slice(format!("{} {} obj\n", self.id, self.generation).as_bytes());
            }
            ObjectClass::Compressed => {}
            ObjectClass::Trailer => out.extend_from_slice(b"trailer\n"),
        }
        if let Some(dict) = &self.dict {
            let _ = Writer::write_dictionary(&mut out, dict);
        } else if let Some(array) = &self.array {
            let _ = Writer::write_array(&mut out, array);
        } else if let Some(def) = &self.def {
            pdf_grammar::serialize_node(def, &mut out);
        } else {
            warn!("object {} has no definition to serialize", self.id);
        }
        out.push(b'\n');
        out
    }
}

fn type_of_def(def: &Node) -> ObjectType {
    match def {
        Node::Id(_) => ObjectType::Unknown,
        Node::Str(bytes) => match bytes.as_slice() {
            b"true" | b"false" => ObjectType::Boolean,
            b"null" => ObjectType::Unknown,
            other if other.first() == Some(&b'(') => ObjectType::String,
            other if crate::symbols::is_numeric(other, false) => ObjectType::Integer,
            other if crate::symbols::is_numeric(other, true) => ObjectType::Real,
            _ => ObjectType::String,
        },
        Node::Stack(stack) => match stack.first() {
            Some(Node::Id(tag)) => match *tag {
                t if t == tags::DICT => ObjectType::Dictionary,
                t if t == tags::ARRAY => ObjectType::Array,
                t if t == tags::NAME => ObjectType::Name,
                t if t == tags::HEXSTR => ObjectType::String,
                t if t == tags::REF => ObjectType::String,
                _ => ObjectType::Unknown,
            },
            _ => ObjectType::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf_grammar;
    use crate::scanner::{FixedSource, Scanner};

    fn object_with_def(input: &[u8]) -> IndirectObject {
        let pdf = pdf_grammar::shared();
        let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
        let mut src = FixedSource::new(input);
        let mut ob = IndirectObject::new(5, 0);
        if let Some(stack) = scanner.pop_stack(&mut src) {
            ob.set_def(Node::Stack(stack));
        } else {
            ob.set_def(Node::Str(scanner.pop_string(&mut src).unwrap()));
        }
        ob
    }

    #[test]
    fn untouched_objects_serialize_their_raw_definition() {
        let mut ob = object_with_def(b"<</Kind /Widget /Rect [0 0 10 10]>>");
        assert_eq!(ob.object_type(), ObjectType::Dictionary);
        assert_eq!(
            ob.generate_definition(),
            b"5 0 obj\n<< /Kind /Widget /Rect [ 0 0 10 10 ] >>\n".to_vec()
        );
    }

    #[test]
    fn overlay_mutations_win_over_the_raw_definition() {
        let mut ob = object_with_def(b"<</A 1>>");
        ob.set_dictionary_entry("B", 2);
        let def = ob.generate_definition();
        assert_eq!(def, b"5 0 obj\n<</A 1/B 2>>\n".to_vec());
    }

    #[test]
    fn set_stream_updates_length() {
        let mut ob = object_with_def(b"<</Length 100>>");
        ob.set_stream(b"abcdef".to_vec(), true, false);
        assert_eq!(
            ob.get_dictionary_entry(b"Length").and_then(|o| o.as_i64().ok()),
            Some(6)
        );
        assert_eq!(ob.ovr_stream.as_deref(), Some(b"abcdef".as_slice()));
    }

    #[test]
    fn set_stream_filtered_respects_declared_chain() {
        let mut ob = object_with_def(b"<</Filter /FlateDecode>>");
        assert!(ob.set_stream_filtered(b"some content worth deflating".to_vec()));
        let packed = ob.ovr_stream.clone().unwrap();
        assert_eq!(
            crate::filters::decode(&packed, b"FlateDecode", None).unwrap(),
            b"some content worth deflating"
        );

        let mut plain = object_with_def(b"<</A 1>>");
        assert!(!plain.set_stream_filtered(b"data".to_vec()));
    }

    #[test]
    fn delete_refuses_compressed_objects() {
        let mut ob = IndirectObject::with_class(9, 0, ObjectClass::Compressed);
        ob.delete();
        assert!(!ob.skip_object);

        let mut ob = IndirectObject::new(9, 0);
        ob.delete();
        assert!(ob.skip_object && ob.delete_object);
    }

    #[test]
    fn reference_string_is_cached() {
        let mut ob = IndirectObject::new(12, 3);
        assert_eq!(ob.reference_string(), "12 3 R");
    }
}
