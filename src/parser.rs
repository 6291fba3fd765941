//! The streaming parser.
//!
//! `iterate` walks the input object by object, deciding for each one
//! whether its bytes pass through verbatim, get discarded (superseded
//! revisions, consumed cross reference tables), or get re-serialized from
//! a constructed, possibly mutated view. When the input ends, appended
//! objects and the rebuilt cross reference table are written out.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use log::{debug, warn};

use crate::error::{Error, Result, XrefError};
use crate::filters;
use crate::indirect_object::{IndirectObject, ObjectClass, ObjectType};
use crate::object::Object;
use crate::object_stream::ObjectStreamView;
use crate::pdf_grammar::{self, dict_get, reference_of, tags};
use crate::scanner::{FixedSource, Node, ScanSource, Scanner};
use crate::symbols;
use crate::twin_stream::TwinStream;
use crate::xref::{self, XrefFormat, XrefKind, XrefSlot, XrefTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Between objects.
    Base,
    /// Right after `id gen obj`, before the body.
    ObjectDefinition,
    /// After the body; `stream` or `endobj` comes next.
    ObjectAppendix,
    /// After the stream content has been fetched; at `endstream`.
    ObjectPostStream,
}

/// First fetch size for out-of-band object definitions, and the single
/// retry size for definitions that do not fit.
const DEF_FETCH_SIZE: usize = 4192;
const DEF_FETCH_RETRY_SIZE: usize = 9288;

pub struct Parser {
    stream: TwinStream,
    scanner: Scanner<'static>,
    state: ParserState,

    /// Remaining per-revision tables, ascending by byte position.
    xstack: VecDeque<XrefTable>,
    /// Master table, used for output.
    mxt: XrefTable,
    /// The revision currently governing input.
    cxt: XrefTable,
    done: bool,
    xref_new_iter: u32,

    appends: Vec<Rc<RefCell<IndirectObject>>>,
    construct: Option<Rc<RefCell<IndirectObject>>>,
    stream_len: u64,
    obid: u32,
    genid: u16,
    oboffset: u64,

    trailer: Rc<RefCell<IndirectObject>>,
    root_ref: Option<(u32, u16)>,
    info_ref: Option<(u32, u16)>,
    encrypt_ref: Option<(u32, u16)>,
    root: Option<Rc<RefCell<IndirectObject>>>,
    info: Option<Rc<RefCell<IndirectObject>>>,

    success: bool,
    /// Ids whose recorded offset disagreed with where they were found;
    /// they must be re-encountered at the right position or the document
    /// lost them.
    skip_tree: BTreeSet<u32>,
}

impl Parser {
    pub fn new(mut stream: TwinStream) -> Result<Parser> {
        let data = xref::collect(&mut stream)?;
        let pdf = pdf_grammar::shared();

        let mut xstack: VecDeque<XrefTable> = data.tables.into();
        let cxt = xstack.pop_front().ok_or(Error::Xref(XrefError::Start))?;

        let mut trailer = IndirectObject::new(data.trailer_id, 0);
        if let Some(def) = data.trailer_def {
            trailer.set_def(def);
        }

        let mut parser = Parser {
            stream,
            scanner: Scanner::new(&pdf.grammar, pdf.root),
            state: ParserState::Base,
            xstack,
            mxt: data.master,
            cxt,
            done: false,
            xref_new_iter: 1,
            appends: Vec::new(),
            construct: None,
            stream_len: 0,
            obid: 0,
            genid: 0,
            oboffset: 0,
            trailer: Rc::new(RefCell::new(trailer)),
            root_ref: data.root_ref,
            info_ref: data.info_ref,
            encrypt_ref: data.encrypt_ref,
            root: None,
            info: None,
            success: true,
            skip_tree: BTreeSet::new(),
        };

        // always grab the first object: it moves us past the header
        // comments, and a linearization dictionary must stop claiming the
        // document is linearized, since it no longer will be
        if parser.iterate()? {
            let prefix = parser.scanner.result_offset();
            parser.scanner.detach(prefix, parser.stream.window());
            parser.stream.pass_through(prefix as u64)?;
            parser.oboffset = parser.stream.output_offset();

            let first = parser.construct_object()?;
            let mut first = first.borrow_mut();
            if first.object_type() == ObjectType::Dictionary
                && first.get_dictionary_entry(b"Linearized").is_some()
            {
                debug!("dropping the linearization dictionary entry");
                first.remove_dictionary_entry(b"Linearized");
            }
        }

        if parser.encrypt_ref.is_some() {
            warn!("encrypted document: objects pass through, streams cannot be decoded");
        }

        Ok(parser)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypt_ref.is_some()
    }

    pub fn root_reference(&self) -> Option<(u32, u16)> {
        self.root_ref
    }

    pub fn info_reference(&self) -> Option<(u32, u16)> {
        self.info_ref
    }

    pub fn trailer(&self) -> Rc<RefCell<IndirectObject>> {
        self.trailer.clone()
    }

    /// Id of the object the parser is currently stopped at.
    pub fn current_object_id(&self) -> u32 {
        self.obid
    }

    /// Whether the parser is stopped at an object that can be constructed.
    pub fn has_current_object(&self) -> bool {
        self.construct.is_some() || self.state == ParserState::ObjectDefinition
    }

    pub fn object_count(&self) -> u32 {
        self.mxt.count()
    }

    /// Whether filters for this object can still take effect.
    pub fn is_object_still_mutable(&self, id: u32) -> bool {
        self.stream.input_offset() <= self.mxt.offset(id)
    }

    /// The id of the object stream containing `id`, when compressed.
    pub fn container_of(&self, id: u32) -> Option<u32> {
        if self.mxt.kind(id) == XrefKind::Compressed {
            Some(self.mxt.offset(id) as u32)
        } else {
            None
        }
    }

    fn discard_consumed(&mut self) -> Result<()> {
        let n = self.scanner.take_consumed(self.stream.window());
        self.stream.discard(n as u64)
    }

    fn passthrough_consumed(&mut self) -> Result<()> {
        let n = self.scanner.take_consumed(self.stream.window());
        self.stream.pass_through(n as u64)
    }

    /// Step to the next live object. Returns false when the input is
    /// exhausted (at which point appended objects have been written).
    pub fn iterate(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }

        // a binary cross reference table has no in-band marker; reaching
        // its position means the current domain is over
        if self.cxt.format == XrefFormat::Binary
            && self.stream.input_offset() >= self.cxt.pos
            && !self.iterate_xref_domain()?
        {
            return Ok(false);
        }

        // move past half-read objects
        if self.state != ParserState::Base || self.construct.is_some() {
            self.passthrough_object()?;
        }

        loop {
            if self.scanner.boffset > 0 {
                self.discard_consumed()?;
            }

            let Some(mut stack) = self.scanner.pop_stack(&mut self.stream) else {
                self.success = false;
                return Err(Error::Syntax(
                    "expected an object, a cross reference table, or end of input".into(),
                ));
            };

            self.oboffset = self.scanner.result_offset() as u64 + self.stream.output_offset();

            let Some(Node::Id(tag)) = stack.first().cloned() else {
                self.success = false;
                return Err(Error::Syntax("untagged entry between objects".into()));
            };
            stack.remove(0);

            if tag == tags::XREF {
                // anything before the table (the file header, when nothing
                // but a trailer precedes it) belongs to the output
                let prefix = self.scanner.result_offset();
                self.scanner.detach(prefix, self.stream.window());
                self.stream.pass_through(prefix as u64)?;

                let running = self.iterate_xref_domain()?;
                let running = self.passover_xref_entry(stack, running)? && running;
                if !running {
                    return Ok(false);
                }
                continue;
            }

            if tag == tags::STARTXREF {
                // a trailing startxref outside a table; consume its %%EOF
                self.scanner.assert_complex(&mut self.stream, tags::META)?;
                self.discard_consumed()?;
                continue;
            }

            if tag == tags::OBJ {
                let obid = stack
                    .first()
                    .and_then(Node::as_int)
                    .ok_or_else(|| Error::Syntax("malformed object header".into()))?
                    as u32;
                let genid = stack
                    .get(1)
                    .and_then(Node::as_int)
                    .ok_or_else(|| Error::Syntax("malformed object header".into()))?
                    as u16;

                self.obid = obid;
                self.genid = genid;
                self.state = ParserState::ObjectDefinition;

                let mut skip = false;
                if genid as u32 != self.mxt.generation(obid) {
                    skip = true;
                } else {
                    let mut offset = self.scanner.result_offset() as i64
                        + self.stream.input_offset() as i64
                        - self.mxt.offset(obid) as i64;
                    if offset < 0 {
                        // some producers count leading whitespace into the
                        // recorded offset
                        let window = self.stream.window();
                        let mut wsi = 0;
                        while offset < 0
                            && wsi < window.len()
                            && symbols::class_of(window[wsi]) == symbols::WHITESPACE
                        {
                            offset += 1;
                            wsi += 1;
                        }
                    }
                    if offset.abs() < 2 {
                        self.skip_tree.remove(&obid);
                    } else {
                        debug!("offset mismatch for object {obid}; deferring");
                        self.skip_tree.insert(obid);
                        skip = true;
                    }
                }

                if skip {
                    self.passover_object()?;
                    continue;
                }
                return Ok(true);
            }

            self.success = false;
            return Err(Error::Syntax(format!("unexpected {tag} between objects")));
        }
    }

    /// Advance to the next cross reference domain. False means the input
    /// is done.
    fn iterate_xref_domain(&mut self) -> Result<bool> {
        // a linearized table governs the whole file; ignore the extra
        // in-band tables it covers
        if self.cxt.linearized && self.cxt.pos > self.stream.input_offset() {
            return Ok(true);
        }

        loop {
            let Some(next) = self.xstack.pop_front() else {
                self.done = true;
                self.append_objects()?;
                if !self.skip_tree.is_empty() {
                    warn!(
                        "{} object(s) were lost to offset disagreements",
                        self.skip_tree.len()
                    );
                    self.success = false;
                }
                return Ok(false);
            };
            let stale = next.pos < self.stream.input_offset();
            self.cxt = next;
            if !stale {
                return Ok(true);
            }
        }
    }

    /// Skip an in-band textual cross reference table (the rebuilt master
    /// replaces it). `include_trailer` also consumes the trailer
    /// dictionary, `startxref` and `%%EOF`.
    fn passover_xref_entry(&mut self, first: Vec<Node>, include_trailer: bool) -> Result<bool> {
        let mut section = first;
        loop {
            // section = first id, count
            let count = section
                .get(1)
                .and_then(Node::as_int)
                .ok_or_else(|| Error::Syntax("malformed cross reference section".into()))?;
            self.scanner.skip(count as usize * 20);
            self.discard_consumed()?;

            match self.scanner.pop_stack(&mut self.stream) {
                Some(mut next) if next.first() == Some(&Node::Id(tags::XREF)) => {
                    next.remove(0);
                    section = next;
                }
                Some(_) => {
                    return Err(Error::Syntax(
                        "unexpected entry inside a cross reference table".into(),
                    ));
                }
                None => break,
            }
        }

        if include_trailer {
            self.scanner.assert_string(&mut self.stream, "trailer")?;
            self.scanner
                .pop_stack(&mut self.stream)
                .ok_or_else(|| Error::Syntax("missing trailer dictionary".into()))?;

            // some producers butt another table right against the trailer
            // instead of a startxref
            match self.scanner.pop_stack(&mut self.stream) {
                Some(mut next) if next.first() == Some(&Node::Id(tags::XREF)) => {
                    if self.iterate_xref_domain()? {
                        next.remove(0);
                        return self.passover_xref_entry(next, true);
                    }
                    return Ok(false);
                }
                Some(next) if next.first() == Some(&Node::Id(tags::STARTXREF)) => {
                    self.scanner.assert_complex(&mut self.stream, tags::META)?;
                    self.discard_consumed()?;
                }
                _ => {
                    return Err(Error::Syntax("expected startxref after the trailer".into()));
                }
            }
        }

        Ok(true)
    }

    /// Resolve a `/Length` value, following one indirect reference if
    /// needed.
    fn resolve_length(&mut self, node: &Node) -> Result<u64> {
        if let Some((refid, _)) = reference_of(node) {
            let def = self.locate_object_definition(refid, false)?;
            return def
                .as_int()
                .map(|v| v as u64)
                .ok_or_else(|| Error::Syntax(format!("object {refid} is not a stream length")));
        }
        node.as_int()
            .map(|v| v as u64)
            .ok_or_else(|| Error::Syntax("stream length is not numeric".into()))
    }

    fn is_encrypt_object(&self, obid: u32) -> bool {
        self.encrypt_ref.map(|(id, _)| id) == Some(obid)
    }

    /// Build a mutable view of the object the parser is stopped at.
    pub fn construct_object(&mut self) -> Result<Rc<RefCell<IndirectObject>>> {
        if let Some(construct) = &self.construct {
            if construct.borrow().id() == self.obid {
                return Ok(construct.clone());
            }
        }
        if self.state != ParserState::ObjectDefinition {
            return Err(Error::Syntax("no object is ready to construct".into()));
        }

        let mut ob = IndirectObject::new(self.obid, self.genid);
        ob.encrypted_doc = self.encrypt_ref.is_some();

        if let Some(stack) = self.scanner.pop_stack(&mut self.stream) {
            if self.is_encrypt_object(self.obid) {
                // the encryption dictionary's Length is a key size, not a
                // stream length
                self.stream_len = 0;
            } else if let Some(length) = dict_get(&stack, b"Length").cloned() {
                self.stream_len = self.resolve_length(&length)?;
            } else {
                self.stream_len = 0;
            }
            ob.set_def(Node::Stack(stack));
        } else if let Some(primitive) = self.scanner.pop_string(&mut self.stream) {
            self.stream_len = 0;
            ob.set_def(Node::Str(primitive));
        } else {
            return Err(Error::Syntax("object with no definition".into()));
        }
        ob.stream_len = self.stream_len;

        match self.scanner.pop_string(&mut self.stream) {
            Some(ref s) if s == b"stream" => {
                ob.mark_stream();
                self.state = ParserState::ObjectAppendix;
            }
            Some(ref s) if s == b"endobj" => {
                self.state = ParserState::Base;
            }
            other => {
                return Err(Error::Syntax(format!(
                    "expected stream or endobj, found {other:?}"
                )));
            }
        }

        let construct = Rc::new(RefCell::new(ob));
        self.construct = Some(construct.clone());
        Ok(construct)
    }

    /// Read and decode the current object's stream content. Leaves the
    /// parser right before `endstream`.
    pub fn fetch_current_object_stream(&mut self) -> Result<Vec<u8>> {
        let construct = self
            .construct
            .clone()
            .ok_or_else(|| Error::Syntax("no constructed object to fetch a stream for".into()))?;
        {
            let ob = construct.borrow();
            if !ob.has_stream {
                return Err(Error::Syntax(format!("object {} has no stream", ob.id())));
            }
            if let Some(extracted) = &ob.extracted {
                return Ok(extracted.clone());
            }
        }
        if self.encrypt_ref.is_some() {
            return Err(Error::Encrypted);
        }
        if self.state != ParserState::ObjectAppendix {
            return Err(Error::Syntax("the stream content has already been passed".into()));
        }

        let raw = self
            .scanner
            .read_stream(&mut self.stream, self.stream_len as usize)?;
        let chain = {
            let mut ob = construct.borrow_mut();
            filters::FilterChain::from_dict(ob.dictionary())?
        };
        let data = match chain {
            Some(chain) => chain.decode(&raw)?,
            None => raw,
        };
        construct.borrow_mut().extracted = Some(data.clone());
        self.state = ParserState::ObjectPostStream;
        Ok(data)
    }

    /// Consume `stream ... endstream endobj` (or a bare `endobj`),
    /// committing the consumed bytes with `pass`.
    fn finish_appendix(&mut self, pass: bool) -> Result<()> {
        let token = self
            .scanner
            .pop_string(&mut self.stream)
            .ok_or_else(|| Error::Syntax("expected stream or endobj".into()))?;

        let token = if token == b"stream" {
            self.scanner.skip(self.stream_len as usize);
            if pass {
                self.passthrough_consumed()?;
            } else {
                self.discard_consumed()?;
            }
            self.scanner.assert_complex(&mut self.stream, tags::ENDSTREAM)?;
            self.scanner
                .pop_string(&mut self.stream)
                .ok_or_else(|| Error::Syntax("expected endobj after endstream".into()))?
        } else {
            token
        };

        if token != b"endobj" {
            return Err(Error::Syntax(format!(
                "expected endobj, found \"{}\"",
                String::from_utf8_lossy(&token)
            )));
        }
        Ok(())
    }

    /// Write the current object to the output: verbatim when untouched,
    /// re-serialized when a construct exists.
    fn passthrough_object(&mut self) -> Result<()> {
        self.mxt.set_offset(self.obid, self.oboffset);

        if self.construct.is_some() {
            self.update_object()?;
            self.oboffset = self.stream.output_offset();
            return Ok(());
        }

        if self.state == ParserState::ObjectDefinition {
            if let Some(stack) = self.scanner.pop_stack(&mut self.stream) {
                if self.is_encrypt_object(self.obid) {
                    self.stream_len = 0;
                } else if let Some(length) = dict_get(&stack, b"Length").cloned() {
                    self.stream_len = self.resolve_length(&length)?;
                } else {
                    self.stream_len = 0;
                }

                // a cross reference stream object; the rebuilt table
                // appended at the end replaces it
                let is_xref_object = dict_get(&stack, b"Type")
                    .map(|t| t.tag() == Some(tags::NAME) && t.as_stack().and_then(|s| s.get(1)) == Some(&Node::Str(b"XRef".to_vec())))
                    .unwrap_or(false);
                if is_xref_object {
                    self.mxt.set_kind(self.obid, XrefKind::Free);
                    self.state = ParserState::ObjectAppendix;
                    return self.passover_object();
                }
            } else if self.scanner.pop_string(&mut self.stream).is_none() {
                return Err(Error::Syntax("object with no definition".into()));
            }
            self.finish_appendix(true)?;
        } else if self.state == ParserState::ObjectAppendix {
            self.finish_appendix(true)?;
        }

        self.passthrough_consumed()?;
        self.state = ParserState::Base;
        self.oboffset = self.stream.output_offset();
        Ok(())
    }

    /// Discard the current object instead of passing it through; used when
    /// it is superseded.
    fn passover_object(&mut self) -> Result<()> {
        if self.state == ParserState::ObjectDefinition {
            if let Some(stack) = self.scanner.pop_stack(&mut self.stream) {
                if self.is_encrypt_object(self.obid) {
                    self.stream_len = 0;
                } else if let Some(length) = dict_get(&stack, b"Length").cloned() {
                    self.stream_len = self.resolve_length(&length)?;
                } else {
                    self.stream_len = 0;
                }
            } else if self.scanner.pop_string(&mut self.stream).is_none() {
                return Err(Error::Syntax("object with no definition".into()));
            }
            self.finish_appendix(false)?;
        } else if self.state == ParserState::ObjectAppendix {
            self.finish_appendix(false)?;
        }

        self.discard_consumed()?;
        self.state = ParserState::Base;
        Ok(())
    }

    /// Serialize the constructed object in place of its original bytes.
    fn update_object(&mut self) -> Result<()> {
        let construct = self.construct.take().expect("checked by the caller");

        // synchronization hook
        if let Some(mut hook) = construct.borrow_mut().take_sync() {
            hook(&mut construct.borrow_mut());
            construct.borrow_mut().sync = Some(hook);
        }

        let (skip_object, skip_stream, has_stream) = {
            let mut ob = construct.borrow_mut();
            if ob.delete_object {
                ob.skip_object = true;
                self.mxt.set_kind(ob.id(), XrefKind::Free);
            }
            // a skipped object always skips its stream too
            ob.skip_stream |= ob.skip_object;
            (ob.skip_object, ob.skip_stream, ob.has_stream)
        };

        if skip_object {
            if has_stream {
                if self.state != ParserState::ObjectPostStream {
                    self.scanner.skip(self.stream_len as usize);
                }
                self.discard_consumed()?;
                self.scanner.assert_complex(&mut self.stream, tags::ENDSTREAM)?;
                self.scanner.assert_string(&mut self.stream, "endobj")?;
            }
            self.discard_consumed()?;
        } else {
            // discard the original definition (and stream keyword)
            self.discard_consumed()?;

            let def = {
                let mut ob = construct.borrow_mut();
                match ob.ovr_def.take() {
                    Some(def) => def,
                    None => ob.generate_definition(),
                }
            };
            self.stream.insert(&def)?;

            let has_override = construct.borrow().ovr_stream.is_some();

            if has_stream {
                if self.state != ParserState::ObjectPostStream {
                    self.scanner.skip(self.stream_len as usize);
                }
                if skip_stream || has_override {
                    self.discard_consumed()?;
                } else {
                    // the keyword was discarded with the definition
                    self.stream.insert(b"stream\n")?;
                    self.passthrough_consumed()?;
                }
                self.scanner.assert_complex(&mut self.stream, tags::ENDSTREAM)?;
                self.scanner.assert_string(&mut self.stream, "endobj")?;
            }

            if (has_stream && !skip_stream) || has_override {
                if has_override {
                    self.discard_consumed()?;
                    self.stream.insert(b"stream\n")?;
                    let content = construct.borrow().ovr_stream.clone().unwrap();
                    self.stream.insert(&content)?;
                    self.stream.insert(b"\nendstream\nendobj\n")?;
                } else {
                    // pass through endstream and endobj
                    self.passthrough_consumed()?;
                }
            } else {
                self.discard_consumed()?;
                self.stream.insert(b"endobj\n")?;
            }
        }

        self.state = ParserState::Base;
        self.stream_len = 0;
        Ok(())
    }

    /// Fetch an object's definition from its recorded position without
    /// moving the main cursor. Compressed entries recurse through their
    /// containing object stream.
    pub fn locate_object_definition(&mut self, obid: u32, master: bool) -> Result<Node> {
        self.locate_with_size(obid, master, DEF_FETCH_SIZE)
            .map(|(node, _)| node)
    }

    fn locate_with_size(
        &mut self,
        obid: u32,
        master: bool,
        bufsize: usize,
    ) -> Result<(Node, u64)> {
        let slot = if master {
            self.mxt.slot(obid)
        } else {
            self.cxt.slot(obid)
        };

        match slot.kind {
            XrefKind::Free => Err(Error::ObjectNotFound(obid)),
            XrefKind::Compressed => {
                if self.encrypt_ref.is_some() {
                    return Err(Error::Encrypted);
                }
                let container = slot.offset as u32;
                let index = slot.generation as usize;

                let (container_def, content_offset) =
                    self.locate_with_size(container, master, bufsize)?;
                let container_stack = container_def
                    .as_stack()
                    .ok_or_else(|| Error::Syntax(format!("object {container} is not an object stream")))?;
                let length = dict_get(container_stack, b"Length")
                    .cloned()
                    .ok_or_else(|| Error::Syntax(format!("object {container} has no stream length")))?;
                let len = self.resolve_length(&length)? as usize;

                // the stream keyword plus its newline precede the content
                let branch = self.stream.fetch_branch(content_offset, len + 20)?;
                let pdf = pdf_grammar::shared();
                let mut src = FixedSource::new(&branch);
                let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
                scanner.assert_string(&mut src, "stream")?;
                let raw = scanner.read_stream(&mut src, len)?;

                let dict = match pdf_grammar::node_to_object(&container_def) {
                    Object::Dictionary(dict) => dict,
                    _ => return Err(Error::Syntax(format!("object {container} is not a dictionary"))),
                };
                let data = match filters::FilterChain::from_dict(&dict)? {
                    Some(chain) => chain.decode(&raw)?,
                    None => raw,
                };

                let mut view = {
                    let mut container_ob = IndirectObject::new(container, 0);
                    container_ob.set_def(container_def.clone());
                    ObjectStreamView::from_object(&mut container_ob)?
                };
                view.parse(&data)?;
                let def = view
                    .take_def_at(index)
                    .ok_or(Error::ObjectNotFound(obid))?;
                Ok((def, 0))
            }
            XrefKind::Used => {
                let offset = slot.offset;
                let branch = self.stream.fetch_branch(offset, bufsize)?;
                let pdf = pdf_grammar::shared();
                let mut src = FixedSource::new(&branch);
                let mut scanner = Scanner::new(&pdf.grammar, pdf.root);

                if let Some(header) = scanner.pop_stack(&mut src) {
                    if !src.outgrown
                        && (header.first() != Some(&Node::Id(tags::OBJ))
                            || header.get(1).and_then(Node::as_int) != Some(obid as i64))
                    {
                        warn!("object {obid} was not at its recorded offset {offset}");
                    }
                }

                let def = if let Some(stack) = scanner.pop_stack(&mut src) {
                    Some(Node::Stack(stack))
                } else {
                    scanner.pop_string(&mut src).map(Node::Str)
                };
                let def_end = offset + scanner.boffset as u64;

                if src.outgrown && bufsize < DEF_FETCH_RETRY_SIZE {
                    // unusually large definition; one bigger attempt
                    return self.locate_with_size(obid, master, DEF_FETCH_RETRY_SIZE);
                }

                def.map(|d| (d, def_end)).ok_or(Error::ObjectNotFound(obid))
            }
        }
    }

    /// A read-only view of the document's Root object.
    pub fn root_object(&mut self) -> Result<Rc<RefCell<IndirectObject>>> {
        if self.root.is_none() {
            let (id, generation) = self.root_ref.ok_or(Error::ObjectNotFound(0))?;
            let def = self.locate_object_definition(id, true)?;
            let mut ob = IndirectObject::new(id, generation);
            ob.set_def(def);
            self.root = Some(Rc::new(RefCell::new(ob)));
        }
        Ok(self.root.clone().unwrap())
    }

    /// A read-only view of the document's Info object.
    pub fn info_object(&mut self) -> Result<Rc<RefCell<IndirectObject>>> {
        if self.info.is_none() {
            let (id, generation) = self.info_ref.ok_or(Error::ObjectNotFound(0))?;
            let def = self.locate_object_definition(id, true)?;
            let mut ob = IndirectObject::new(id, generation);
            ob.set_def(def);
            self.info = Some(Rc::new(RefCell::new(ob)));
        }
        Ok(self.info.clone().unwrap())
    }

    /// Create a fresh object, serialized at the current output position.
    /// The returned view may be mutated freely until the next iteration.
    pub fn create_object(&mut self) -> Result<Rc<RefCell<IndirectObject>>> {
        if self.state != ParserState::Base || self.construct.is_some() {
            self.passthrough_object()?;
        }

        let id = self.mxt.claim_free(self.xref_new_iter);
        self.xref_new_iter = id;

        self.obid = id;
        self.genid = 0;
        self.stream_len = 0;

        let mut ob = IndirectObject::new(id, 0);
        ob.encrypted_doc = self.encrypt_ref.is_some();
        let construct = Rc::new(RefCell::new(ob));
        self.construct = Some(construct.clone());
        Ok(construct)
    }

    /// Create a fresh object serialized after the last input object.
    pub fn create_appended_object(&mut self) -> Result<Rc<RefCell<IndirectObject>>> {
        let ob = self.create_object()?;
        self.appends.push(ob.clone());
        self.construct = None;
        Ok(ob)
    }

    fn append_objects(&mut self) -> Result<()> {
        if self.state != ParserState::Base || self.construct.is_some() {
            self.passthrough_object()?;
        }
        while !self.appends.is_empty() {
            let ob = self.appends.remove(0);
            {
                let object = ob.borrow();
                self.obid = object.id();
                self.genid = object.generation();
                self.stream_len = object.stream_len;
            }
            self.oboffset = self.stream.output_offset();
            self.construct = Some(ob);
            self.passthrough_object()?;
        }
        Ok(())
    }

    /// Iterate out the remaining input, then write the rebuilt cross
    /// reference table, `startxref` and `%%EOF`.
    pub fn finish(&mut self) -> Result<()> {
        while self.iterate()? {}
        if !self.success {
            return Err(Error::Syntax("some objects were lost; output is incomplete".into()));
        }

        let startxref = self.stream.output_offset();

        match self.mxt.format {
            XrefFormat::Text => {
                let mut table = Vec::new();
                self.mxt.write_text_table(&mut table);
                self.stream.insert(&table)?;

                let trailer = self.trailer.clone();
                let def = {
                    let mut t = trailer.borrow_mut();
                    t.set_class(ObjectClass::Trailer);
                    t.set_dictionary_entry("Size", self.mxt.count() as i64);
                    t.remove_dictionary_entry(b"Prev");
                    t.remove_dictionary_entry(b"XRefStm");
                    t.generate_definition()
                };
                self.stream.insert(&def)?;
            }
            XrefFormat::Binary => {
                let trailer = self.trailer.clone();
                let trailer_id = trailer.borrow().id();
                self.mxt.set(
                    trailer_id,
                    XrefSlot {
                        kind: XrefKind::Used,
                        offset: startxref,
                        generation: 0,
                    },
                );

                {
                    let mut t = trailer.borrow_mut();
                    t.set_class(ObjectClass::Regular);
                    t.set_dictionary_entry("Type", Object::Name(b"XRef".to_vec()));
                    t.set_dictionary_entry("Size", self.mxt.count() as i64);
                    t.set_dictionary_entry(
                        "W",
                        Object::Array(
                            xref::W_WIDTHS
                                .iter()
                                .map(|w| Object::Integer(*w as i64))
                                .collect(),
                        ),
                    );
                    t.remove_dictionary_entry(b"Prev");
                    t.remove_dictionary_entry(b"Index");
                    t.remove_dictionary_entry(b"XRefStm");
                    // own the encoding outright rather than risk passing
                    // something through that makes the table unreadable
                    t.set_dictionary_entry("Filter", Object::Name(b"FlateDecode".to_vec()));
                    t.set_dictionary_entry(
                        "DecodeParms",
                        Object::Dictionary(filters::png_up_parms(xref::ROW_WIDTH as i64)),
                    );
                }

                let rows = self.mxt.pack_rows();
                if !trailer.borrow_mut().set_stream_filtered(rows) {
                    return Err(Error::Syntax("could not encode the cross reference stream".into()));
                }

                self.state = ParserState::Base;
                self.obid = trailer_id;
                self.genid = 0;
                self.oboffset = startxref;
                self.construct = Some(trailer);
                self.passthrough_object()?;
            }
        }

        self.stream
            .insert(format!("startxref\n{startxref}\n%%EOF\n").as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }
}
