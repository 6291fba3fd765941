//! The cross reference engine.
//!
//! Discovery runs the stream backwards to find the trailing `startxref`,
//! a header pass walks the revision chain (`/Prev`, `/XRefStm`) to learn
//! every table's position, and a content pass revisits them oldest first,
//! merging each revision's entries into the master table the parser uses
//! for output. Both classical text tables and PDF 1.5 cross reference
//! streams are read; the output reproduces whichever form the master used.

use log::warn;

use crate::error::{Error, Result, XrefError};
use crate::filters::FilterChain;
use crate::object::Object;
use crate::pdf_grammar::{self, dict_get, reference_of, tags};
use crate::scanner::{Node, Scanner};
use crate::twin_stream::{StreamMethod, TwinStream};

/// Field widths written for emitted cross reference streams: type, offset,
/// generation. One generation byte would lose free-list links above 255,
/// so two are used.
pub const W_WIDTHS: [usize; 3] = [1, 4, 2];

/// Packed row width, also the predictor column count.
pub const ROW_WIDTH: usize = W_WIDTHS[0] + W_WIDTHS[1] + W_WIDTHS[2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    Free,
    Used,
    Compressed,
}

impl XrefKind {
    fn from_type_byte(byte: u64) -> XrefKind {
        match byte {
            0 => XrefKind::Free,
            2 => XrefKind::Compressed,
            _ => XrefKind::Used,
        }
    }

    fn type_byte(self) -> u8 {
        match self {
            XrefKind::Free => 0,
            XrefKind::Used => 1,
            XrefKind::Compressed => 2,
        }
    }
}

/// One object's entry: its kind, its byte offset (the containing object
/// stream id when compressed, the next-free link when free), and its
/// generation (the index inside the containing stream when compressed).
#[derive(Debug, Clone, Copy)]
pub struct XrefSlot {
    pub kind: XrefKind,
    pub offset: u64,
    pub generation: u32,
}

impl Default for XrefSlot {
    fn default() -> XrefSlot {
        XrefSlot {
            kind: XrefKind::Free,
            offset: 0,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefFormat {
    Text,
    Binary,
}

/// One revision's cumulative view of the cross reference space.
#[derive(Debug, Clone)]
pub struct XrefTable {
    pub format: XrefFormat,
    /// Byte position of this table in the input.
    pub pos: u64,
    pub linearized: bool,
    slots: Vec<XrefSlot>,
}

impl XrefTable {
    pub fn new() -> XrefTable {
        XrefTable {
            format: XrefFormat::Text,
            pos: 0,
            linearized: false,
            slots: Vec::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn ensure(&mut self, size: u32) {
        if self.slots.len() < size as usize {
            self.slots.resize(size as usize, XrefSlot::default());
        }
    }

    pub fn slot(&self, id: u32) -> XrefSlot {
        self.slots.get(id as usize).copied().unwrap_or_default()
    }

    pub fn kind(&self, id: u32) -> XrefKind {
        self.slot(id).kind
    }

    pub fn offset(&self, id: u32) -> u64 {
        self.slot(id).offset
    }

    pub fn generation(&self, id: u32) -> u32 {
        self.slot(id).generation
    }

    pub fn set(&mut self, id: u32, slot: XrefSlot) {
        self.ensure(id + 1);
        self.slots[id as usize] = slot;
    }

    pub fn set_kind(&mut self, id: u32, kind: XrefKind) {
        self.ensure(id + 1);
        self.slots[id as usize].kind = kind;
    }

    pub fn set_offset(&mut self, id: u32, offset: u64) {
        self.ensure(id + 1);
        self.slots[id as usize].offset = offset;
    }

    pub fn set_generation(&mut self, id: u32, generation: u32) {
        self.ensure(id + 1);
        self.slots[id as usize].generation = generation;
    }

    /// Find a free slot at or after `from`, extending the table by one
    /// when everything is taken. Slot 0 is the free-list head and never
    /// handed out.
    pub fn claim_free(&mut self, from: u32) -> u32 {
        let mut id = from.max(1);
        while (id as usize) < self.slots.len() && self.slots[id as usize].kind != XrefKind::Free {
            id += 1;
        }
        self.set(
            id,
            XrefSlot {
                kind: XrefKind::Used,
                offset: 0,
                generation: 0,
            },
        );
        id
    }

    /// Free entries chain through their offset field: object 0 heads the
    /// list, every free entry names the next free object, and the last one
    /// circles back to 0. Input links go stale once objects are deleted or
    /// appended, so the chain is rebuilt for emission.
    fn free_list_links(&self) -> Vec<u32> {
        let mut links = vec![0u32; self.slots.len()];
        let mut prev = 0usize;
        for (id, slot) in self.slots.iter().enumerate().skip(1) {
            if slot.kind == XrefKind::Free {
                links[prev] = id as u32;
                prev = id;
            }
        }
        links
    }

    /// The classical textual serialization: header, twenty bytes per row,
    /// no trailer.
    pub fn write_text_table(&self, out: &mut Vec<u8>) {
        let links = self.free_list_links();
        out.extend_from_slice(format!("xref\n0 {}\n", self.count()).as_bytes());
        out.extend_from_slice(format!("{:010} 65535 f \n", links.first().copied().unwrap_or(0)).as_bytes());
        for id in 1..self.count() {
            let slot = self.slot(id);
            let row = if slot.kind == XrefKind::Free {
                format!("{:010} {:05} f \n", links[id as usize], slot.generation.min(65535))
            } else {
                format!("{:010} {:05} n \n", slot.offset, slot.generation.min(65535))
            };
            out.extend_from_slice(row.as_bytes());
        }
    }

    /// Pack all rows in the fixed `[1 4 2]` big-endian layout for a cross
    /// reference stream.
    pub fn pack_rows(&self) -> Vec<u8> {
        let links = self.free_list_links();
        let mut out = Vec::with_capacity(self.slots.len() * ROW_WIDTH);
        for (id, slot) in self.slots.iter().enumerate() {
            out.push(slot.kind.type_byte());
            let offset = if slot.kind == XrefKind::Free {
                links[id] as u64
            } else {
                slot.offset
            };
            if offset > u32::MAX as u64 {
                warn!("cross reference offset exceeds four bytes; table will be wrong");
            }
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            let generation = if id == 0 {
                65535
            } else {
                slot.generation.min(u16::MAX as u32)
            };
            out.extend_from_slice(&(generation as u16).to_be_bytes());
        }
        out
    }
}

impl Default for XrefTable {
    fn default() -> XrefTable {
        XrefTable::new()
    }
}

/// Everything the collection passes learned about the input.
pub struct XrefData {
    /// Cumulative per-revision tables, ascending by byte position.
    pub tables: Vec<XrefTable>,
    /// The merged view used for output.
    pub master: XrefTable,
    pub root_ref: Option<(u32, u16)>,
    pub info_ref: Option<(u32, u16)>,
    pub encrypt_ref: Option<(u32, u16)>,
    /// The newest trailer dictionary.
    pub trailer_def: Option<Node>,
    /// Object id of the cross reference stream object, when binary.
    pub trailer_id: u32,
}

struct Collector {
    queue: Vec<u64>,
    visited: Vec<u64>,
    root_ref: Option<(u32, u16)>,
    info_ref: Option<(u32, u16)>,
    encrypt_ref: Option<(u32, u16)>,
    trailer_def: Option<Node>,
    trailer_id: u32,
}

/// Collect every cross reference table of the input. Leaves the stream in
/// read-write mode, rewound to the start of the file.
pub fn collect(stream: &mut TwinStream) -> Result<XrefData> {
    let mut collector = Collector {
        queue: Vec::new(),
        visited: Vec::new(),
        root_ref: None,
        info_ref: None,
        encrypt_ref: None,
        trailer_def: None,
        trailer_id: 0,
    };

    find_startxref(stream, &mut collector)?;
    fetch_headers(stream, &mut collector)?;
    let (tables, master) = fetch_content(stream, &collector)?;

    stream.set_method(StreamMethod::ReadWrite)?;

    Ok(XrefData {
        tables,
        master,
        root_ref: collector.root_ref,
        info_ref: collector.info_ref,
        encrypt_ref: collector.encrypt_ref,
        trailer_def: collector.trailer_def,
        trailer_id: collector.trailer_id,
    })
}

fn find_startxref(stream: &mut TwinStream, collector: &mut Collector) -> Result<()> {
    let pdf = pdf_grammar::shared();
    stream.set_method(StreamMethod::Reversed)?;

    let mut scanner = Scanner::new_reversed(&pdf.grammar, pdf.xref_seeker);
    // a corrupt file could otherwise keep the seeker scanning forever
    scanner.set_loop_cap(100);

    let stack = scanner
        .pop_stack(stream)
        .ok_or(Error::Xref(XrefError::Start))?;
    if stack.first() != Some(&Node::Id(tags::STARTXREF)) {
        return Err(XrefError::Start.into());
    }
    let offset = stack
        .get(1)
        .and_then(Node::as_int)
        .ok_or(Error::Xref(XrefError::Start))?;
    if offset < 0 || offset as u64 >= stream.input_len() {
        return Err(XrefError::Start.into());
    }
    collector.queue.push(offset as u64);

    stream.set_method(StreamMethod::RandomAccess)?;
    Ok(())
}

/// Pass one: jump to each queued offset, newest first, reading table
/// headers and trailers to learn positions and discover older revisions.
fn fetch_headers(stream: &mut TwinStream, collector: &mut Collector) -> Result<()> {
    let pdf = pdf_grammar::shared();

    while let Some(offset) = collector.queue.pop() {
        if collector.visited.contains(&offset) {
            // revision chains must not loop
            continue;
        }
        collector.visited.push(offset);
        stream.seek(offset)?;

        let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
        let stack = scanner
            .pop_stack(stream)
            .ok_or(Error::Xref(XrefError::Parse))?;

        if stack.first() == Some(&Node::Id(tags::OBJ)) {
            // a 1.5 cross reference stream object stands in for the trailer
            let obid = stack.get(1).and_then(Node::as_int).unwrap_or(0) as u32;
            let dict = scanner
                .pop_stack(stream)
                .ok_or(Error::Xref(XrefError::Parse))?;
            scanner.assert_string(stream, "stream")?;
            let len = dict_get(&dict, b"Length")
                .and_then(Node::as_int)
                .ok_or(Error::Xref(XrefError::Parse))?;
            scanner.skip(len as usize);
            stream.advance(scanner.boffset as u64)?;
            scanner.reset();
            scanner.assert_complex(stream, tags::ENDSTREAM)?;
            scanner.assert_string(stream, "endobj")?;
            parse_trailer(collector, &dict, obid);
        } else if stack.first() == Some(&Node::Id(tags::XREF)) {
            let mut section = stack;
            loop {
                let count = section
                    .get(2)
                    .and_then(Node::as_int)
                    .ok_or(Error::Xref(XrefError::Parse))?;
                scanner.skip(count as usize * 20);
                stream.advance(scanner.boffset as u64)?;
                scanner.reset();
                match scanner.pop_stack(stream) {
                    Some(next) if next.first() == Some(&Node::Id(tags::XREF)) => section = next,
                    Some(other) => {
                        return Err(Error::Syntax(format!(
                            "unexpected {:?} inside a cross reference table",
                            other.first()
                        )));
                    }
                    None => break,
                }
            }
            scanner.assert_string(stream, "trailer")?;
            let dict = scanner
                .pop_stack(stream)
                .ok_or(Error::Xref(XrefError::Parse))?;
            parse_trailer(collector, &dict, 0);
        } else {
            return Err(XrefError::Parse.into());
        }
    }
    Ok(())
}

fn parse_trailer(collector: &mut Collector, dict: &[Node], obid: u32) {
    if collector.root_ref.is_none() {
        collector.root_ref = dict_get(dict, b"Root").and_then(reference_of);
    }
    if collector.info_ref.is_none() {
        collector.info_ref = dict_get(dict, b"Info").and_then(reference_of);
    }
    if collector.encrypt_ref.is_none() {
        collector.encrypt_ref = dict_get(dict, b"Encrypt").and_then(reference_of);
    }

    if let Some(prev) = dict_get(dict, b"Prev").and_then(Node::as_int) {
        collector.queue.push(prev as u64);
    }
    // queued after Prev so it pops first: the hybrid stream overlays its
    // plain sibling without skipping it
    if let Some(stm) = dict_get(dict, b"XRefStm").and_then(Node::as_int) {
        collector.queue.push(stm as u64);
    }

    if collector.trailer_def.is_none() {
        collector.trailer_def = Some(Node::Stack(dict.to_vec()));
        collector.trailer_id = obid;
    }
}

/// Pass two: revisit the discovered offsets oldest first, each revision
/// overwriting the accumulating master's entries.
fn fetch_content(stream: &mut TwinStream, collector: &Collector) -> Result<(Vec<XrefTable>, XrefTable)> {
    let pdf = pdf_grammar::shared();
    let mut master: Option<XrefTable> = None;
    let mut tables: Vec<XrefTable> = Vec::new();

    for &offset in collector.visited.iter().rev() {
        let mut pdx = master.take().unwrap_or_default();
        pdx.pos = offset;
        pdx.linearized = false;

        stream.seek(offset)?;
        let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
        let stack = scanner
            .pop_stack(stream)
            .ok_or(Error::Xref(XrefError::Parse))?;

        if stack.first() == Some(&Node::Id(tags::OBJ)) {
            read_stream_content(&mut scanner, stream, &mut pdx)?;
        } else if stack.first() == Some(&Node::Id(tags::XREF)) {
            read_text_content(stack, &mut scanner, stream, &mut pdx)?;
        } else {
            return Err(XrefError::Parse.into());
        }

        tables.push(pdx.clone());
        master = Some(pdx);
    }

    let mut master = master.ok_or(Error::Xref(XrefError::Start))?;
    tables.sort_by_key(|t| t.pos);

    // two sources with the newer one byte-first means a linearized
    // document; flatten to a single conventional layout
    if tables.len() == 2 && master.pos < tables[1].pos {
        master.linearized = true;
        master.pos = tables[1].pos;
        let stack = vec![master.clone()];
        return Ok((stack, master));
    }

    let mut stack = Vec::new();
    for table in &tables {
        if table.pos > master.pos {
            warn!(
                "cross reference table at {} trails the master; position adjusted",
                table.pos
            );
            master.pos = table.pos;
            master.linearized = true;
        } else {
            stack.push(table.clone());
        }
    }

    Ok((stack, master))
}

/// Twenty bytes per row: ten digit offset, space, five digit generation,
/// space, `n` or `f`.
fn read_text_content(
    first_section: Vec<Node>,
    scanner: &mut Scanner<'_>,
    stream: &mut TwinStream,
    pdx: &mut XrefTable,
) -> Result<()> {
    pdx.format = XrefFormat::Text;

    let mut section = first_section;
    loop {
        let first = section
            .get(1)
            .and_then(Node::as_int)
            .ok_or(Error::Xref(XrefError::Parse))? as u32;
        let count = section
            .get(2)
            .and_then(Node::as_int)
            .ok_or(Error::Xref(XrefError::Parse))? as u32;

        pdx.ensure(first + count);

        let rows = scanner.read_stream(stream, count as usize * 20)?;
        if rows.len() != count as usize * 20 {
            return Err(XrefError::Parse.into());
        }

        for (i, row) in rows.chunks(20).enumerate() {
            let id = first + i as u32;
            let offset = ascii_number(&row[0..10]).ok_or(Error::Xref(XrefError::Parse))?;
            let generation = ascii_number(&row[11..16]).ok_or(Error::Xref(XrefError::Parse))? as u32;
            let marked_used = row[17] == b'n';

            // some producers flag rows in use while setting generation
            // 65536 or offset 0 to mean the opposite
            let used = marked_used && generation != 65536 && offset != 0;
            if marked_used && !used {
                warn!("treating object {id} as free (generation {generation}, offset {offset})");
            }

            // for free rows the offset column holds the producer's
            // next-free pointer; emission relinks the chain anyway
            pdx.set(
                id,
                XrefSlot {
                    kind: if used { XrefKind::Used } else { XrefKind::Free },
                    offset,
                    generation: generation.min(65535),
                },
            );
        }

        match scanner.pop_stack(stream) {
            Some(next) if next.first() == Some(&Node::Id(tags::XREF)) => section = next,
            _ => break,
        }
    }
    Ok(())
}

fn read_stream_content(
    scanner: &mut Scanner<'_>,
    stream: &mut TwinStream,
    pdx: &mut XrefTable,
) -> Result<()> {
    pdx.format = XrefFormat::Binary;

    let dict_nodes = scanner
        .pop_stack(stream)
        .ok_or(Error::Xref(XrefError::Parse))?;
    scanner.assert_string(stream, "stream")?;

    let dict = match pdf_grammar::node_to_object(&Node::Stack(dict_nodes)) {
        Object::Dictionary(dict) => dict,
        _ => return Err(XrefError::Parse.into()),
    };

    let len = dict
        .get(b"Length")
        .and_then(Object::as_i64)
        .map_err(|_| Error::Xref(XrefError::Parse))?;
    let size = dict
        .get(b"Size")
        .and_then(Object::as_i64)
        .map_err(|_| Error::Xref(XrefError::Parse))?;

    let widths = integer_array(&dict, b"W").ok_or(Error::Xref(XrefError::Parse))?;
    if widths.len() < 3 || widths.iter().any(|w| *w < 0) {
        return Err(XrefError::Parse.into());
    }

    let index = integer_array(&dict, b"Index").unwrap_or_else(|| vec![0, size]);

    if let Some(chain) = FilterChain::from_dict(&dict)? {
        scanner.attach_filter(chain);
    }
    let data = scanner.read_stream(stream, len as usize)?;
    scanner.detach_filter();

    pdx.ensure(size as u32);

    let mut cursor = 0usize;
    let mut field = |width: usize| -> Result<u64> {
        let bytes = data
            .get(cursor..cursor + width)
            .ok_or(Error::Xref(XrefError::Parse))?;
        cursor += width;
        let mut value = 0u64;
        for &b in bytes {
            value = (value << 8) | b as u64;
        }
        Ok(value)
    };

    for pair in index.chunks(2) {
        let &[start, count] = pair else { break };
        for j in 0..count {
            let kind = if widths[0] == 0 {
                1
            } else {
                field(widths[0] as usize)?
            };
            let offset = field(widths[1] as usize)?;
            let generation = if widths[2] == 0 {
                0
            } else {
                field(widths[2] as usize)?
            };
            pdx.set(
                (start + j) as u32,
                XrefSlot {
                    kind: XrefKind::from_type_byte(kind),
                    offset,
                    generation: generation as u32,
                },
            );
        }
    }

    scanner.assert_complex(stream, tags::ENDSTREAM)?;
    scanner.assert_string(stream, "endobj")?;
    Ok(())
}

fn integer_array(dict: &crate::object::Dictionary, key: &[u8]) -> Option<Vec<i64>> {
    let array = dict.get(key).ok()?.as_array().ok()?;
    array.iter().map(|o| o.as_i64().ok()).collect()
}

/// Parse a space padded decimal field.
fn ascii_number(field: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?.trim();
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_table_rows_are_twenty_bytes() {
        let mut table = XrefTable::new();
        table.set(
            1,
            XrefSlot {
                kind: XrefKind::Used,
                offset: 15,
                generation: 0,
            },
        );
        table.set(
            2,
            XrefSlot {
                kind: XrefKind::Used,
                offset: 12345,
                generation: 7,
            },
        );
        let mut out = Vec::new();
        table.write_text_table(&mut out);
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("xref"));
        assert_eq!(lines.next(), Some("0 3"));
        assert_eq!(lines.next(), Some("0000000000 65535 f "));
        assert_eq!(lines.next(), Some("0000000015 00000 n "));
        assert_eq!(lines.next(), Some("0000012345 00007 n "));
    }

    #[test]
    fn packed_rows_use_declared_widths() {
        let mut table = XrefTable::new();
        table.set(
            1,
            XrefSlot {
                kind: XrefKind::Used,
                offset: 0x01020304,
                generation: 5,
            },
        );
        table.set(
            2,
            XrefSlot {
                kind: XrefKind::Compressed,
                offset: 9,
                generation: 300,
            },
        );
        let rows = table.pack_rows();
        assert_eq!(rows.len(), 3 * ROW_WIDTH);
        assert_eq!(&rows[ROW_WIDTH..2 * ROW_WIDTH], &[1, 1, 2, 3, 4, 0, 5]);
        assert_eq!(&rows[2 * ROW_WIDTH..], &[2, 0, 0, 0, 9, 1, 44]);
    }

    #[test]
    fn emitted_free_entries_chain_through_their_offsets() {
        let mut table = XrefTable::new();
        table.ensure(6);
        for id in [1, 3, 5] {
            table.set(
                id,
                XrefSlot {
                    kind: XrefKind::Used,
                    offset: 100 + id as u64,
                    generation: 0,
                },
            );
        }
        // stale input link; relinking must ignore it
        table.set_offset(2, 999);
        table.set_kind(2, XrefKind::Free);

        let mut out = Vec::new();
        table.write_text_table(&mut out);
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().skip(2).collect();
        assert_eq!(rows[0], "0000000002 65535 f ");
        assert_eq!(rows[2], "0000000004 00000 f ");
        assert_eq!(rows[4], "0000000000 00000 f ");

        let packed = table.pack_rows();
        let row = |id: usize| &packed[id * ROW_WIDTH..(id + 1) * ROW_WIDTH];
        assert_eq!(row(0), &[0, 0, 0, 0, 2, 255, 255]);
        assert_eq!(row(2), &[0, 0, 0, 0, 4, 0, 0]);
        assert_eq!(row(4), &[0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn claim_free_reuses_holes_then_extends() {
        let mut table = XrefTable::new();
        table.ensure(4);
        table.set(
            1,
            XrefSlot {
                kind: XrefKind::Used,
                offset: 10,
                generation: 0,
            },
        );
        table.set(
            3,
            XrefSlot {
                kind: XrefKind::Used,
                offset: 20,
                generation: 0,
            },
        );
        assert_eq!(table.claim_free(1), 2);
        assert_eq!(table.kind(2), XrefKind::Used);
        assert_eq!(table.claim_free(2), 4);
        assert_eq!(table.count(), 5);
    }
}
