//! The state machine scanner.
//!
//! The scanner lexes bytes into symbols and feeds them through the compiled
//! grammar, assembling composite values on its result, build and variable
//! stacks. It does not own the bytes it scans; a [`ScanSource`] hands it a
//! window and grows it on demand, which lets the same scanner run against
//! the twin stream or a fixed in-memory buffer.

use std::mem;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::filters::FilterChain;
use crate::grammar::{self, Chain, Grammar, Operator, StateId, Tag};
use crate::symbols;

/// A value assembled by the scanner.
///
/// Composite values ("complexes") are stacks whose first element is an
/// identifier tag, e.g. `[dict, entries, [...]]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Id(Tag),
    Str(Vec<u8>),
    Stack(Vec<Node>),
}

impl Node {
    pub fn as_str(&self) -> Option<&[u8]> {
        match self {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&[Node]> {
        match self {
            Node::Stack(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_stack(self) -> Option<Vec<Node>> {
        match self {
            Node::Stack(s) => Some(s),
            _ => None,
        }
    }

    /// The identifier tag of a complex, when this node is one.
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Node::Stack(s) => match s.first() {
                Some(Node::Id(tag)) => Some(*tag),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        let s = self.as_str()?;
        std::str::from_utf8(s).ok()?.trim().parse().ok()
    }
}

/// Source of bytes for a scanner.
pub trait ScanSource {
    /// The window of bytes currently available.
    fn window(&self) -> &[u8];

    /// Ask the source to make at least `req` more bytes available (`0`
    /// lets the source pick an amount). Returns how far existing window
    /// content moved to the right, which is non-zero only for reversed
    /// sources that prepend earlier file content.
    fn grow(&mut self, req: usize) -> usize;
}

/// A fixed in-memory scan source. Never grows; records that the scanner
/// wanted more bytes so bounded fetches can be retried larger.
pub struct FixedSource<'a> {
    data: &'a [u8],
    pub outgrown: bool,
}

impl<'a> FixedSource<'a> {
    pub fn new(data: &'a [u8]) -> FixedSource<'a> {
        FixedSource { data, outgrown: false }
    }
}

impl ScanSource for FixedSource<'_> {
    fn window(&self) -> &[u8] {
        self.data
    }

    fn grow(&mut self, _req: usize) -> usize {
        self.outgrown = true;
        0
    }
}

#[derive(Debug, Clone)]
enum SymText {
    /// Borrowed region of the source window.
    Window { start: usize, len: usize },
    /// Owned bytes synthesized from a popped result.
    Fake(Vec<u8>),
}

/// A lexed token. Window symbols are invalidated when the window shifts;
/// [`Scanner::detach`] converts them to owned bytes first.
#[derive(Debug, Clone)]
pub struct Symbol {
    text: SymText,
    pub kind: u8,
    pub hash: u32,
}

impl Symbol {
    fn bytes<'a>(&'a self, window: &'a [u8]) -> &'a [u8] {
        match &self.text {
            SymText::Window { start, len } => window.get(*start..*start + *len).unwrap_or(&[]),
            SymText::Fake(bytes) => bytes,
        }
    }

    fn start(&self) -> Option<usize> {
        match &self.text {
            SymText::Window { start, .. } => Some(*start),
            SymText::Fake(_) => None,
        }
    }

    fn len(&self) -> usize {
        match &self.text {
            SymText::Window { len, .. } => *len,
            SymText::Fake(bytes) => bytes.len(),
        }
    }
}

/// One execution of a state: the state plus its build and variable stacks.
struct Env {
    state: StateId,
    entry: usize,
    build: Vec<Node>,
    vars: Vec<Node>,
}

impl Env {
    fn new(state: StateId, entry: usize) -> Env {
        Env {
            state,
            entry,
            build: Vec::new(),
            vars: Vec::new(),
        }
    }
}

pub struct Scanner<'g> {
    grammar: &'g Grammar,
    env: Env,
    env_stack: Vec<Env>,
    results: Vec<Node>,
    symbol_stack: Vec<Symbol>,
    sym: Option<Symbol>,
    /// Window offset of the next unread byte. In reversed mode this counts
    /// unread bytes at the left end of the window instead.
    pub boffset: usize,
    bres_offset: usize,
    bmark: usize,
    reversed: bool,
    filter: Option<FilterChain>,
    failed: bool,
    alive: bool,
    loop_cap: Option<usize>,
}

fn compose(tag: Tag, vars: Vec<Node>) -> Node {
    let mut stack = Vec::with_capacity(vars.len() + 1);
    stack.push(Node::Id(tag));
    stack.extend(vars.into_iter().rev());
    Node::Stack(stack)
}

impl<'g> Scanner<'g> {
    pub fn new(grammar: &'g Grammar, root: StateId) -> Scanner<'g> {
        Scanner {
            grammar,
            env: Env::new(root, 0),
            env_stack: Vec::new(),
            results: Vec::new(),
            symbol_stack: Vec::new(),
            sym: None,
            boffset: 0,
            bres_offset: 0,
            bmark: 0,
            reversed: false,
            filter: None,
            failed: false,
            alive: true,
            loop_cap: None,
        }
    }

    pub fn new_reversed(grammar: &'g Grammar, root: StateId) -> Scanner<'g> {
        let mut scanner = Scanner::new(grammar, root);
        scanner.reversed = true;
        scanner
    }

    /// Window offset at which the scan producing the most recent result
    /// began.
    pub fn result_offset(&self) -> usize {
        self.bres_offset
    }

    /// Cap the number of scan attempts of the next poll. Used when the
    /// input may not contain what the grammar is looking for at all.
    pub fn set_loop_cap(&mut self, cap: usize) {
        self.loop_cap = Some(cap);
    }

    pub fn attach_filter(&mut self, filter: FilterChain) {
        self.filter = Some(filter);
    }

    pub fn detach_filter(&mut self) {
        self.filter = None;
    }

    /// Drop all window anchoring. The source will feed the scanner from
    /// scratch on the next pop.
    pub fn reset(&mut self) {
        self.boffset = 0;
        self.bres_offset = 0;
        self.bmark = 0;
        self.sym = None;
        self.symbol_stack.clear();
        self.results.clear();
    }

    /// Move past `bytes` bytes without lexing them (stream content).
    pub fn skip(&mut self, bytes: usize) {
        self.boffset += bytes;
    }

    /// Detach the first `n` window bytes: symbols referencing them are
    /// materialized, and all remaining offsets shift down by `n`. Called
    /// right before the stream discards or passes through that region.
    pub fn detach(&mut self, n: usize, window: &[u8]) {
        let materialize = |sym: &mut Symbol| {
            if let SymText::Window { start, len } = sym.text {
                if start < n {
                    let bytes = window.get(start..start + len).unwrap_or(&[]).to_vec();
                    sym.text = SymText::Fake(bytes);
                    sym.kind |= symbols::FAKE;
                } else {
                    sym.text = SymText::Window {
                        start: start - n,
                        len,
                    };
                }
            }
        };
        if let Some(sym) = self.sym.as_mut() {
            materialize(sym);
        }
        for sym in self.symbol_stack.iter_mut() {
            materialize(sym);
        }
        self.boffset = self.boffset.saturating_sub(n);
        self.bres_offset = self.bres_offset.saturating_sub(n);
        self.bmark = self.bmark.saturating_sub(n);
    }

    /// Detach everything consumed so far and report how much that was.
    pub fn take_consumed(&mut self, window: &[u8]) -> usize {
        let n = self.boffset;
        self.detach(n, window);
        n
    }

    fn sym_bytes_vec(&self, window: &[u8]) -> Vec<u8> {
        self.sym
            .as_ref()
            .map(|s| s.bytes(window).to_vec())
            .unwrap_or_default()
    }

    /// The forward lexer: skip whitespace, accumulate one run of same-class
    /// bytes, stop at the first delimiter or class change, then absorb
    /// trailing whitespace up to and including one newline run.
    fn pop_symbol(&mut self, src: &mut dyn ScanSource) {
        if let Some(sym) = self.symbol_stack.pop() {
            self.sym = Some(sym);
            return;
        }

        if src.window().len() < self.boffset {
            // we iterated beyond sight; the source sets us up from scratch
            self.reset();
        }

        let mut i = self.boffset;
        let mut len = 0usize;
        let mut hash: i32 = 0;
        let mut numeric = true;
        let mut real = false;
        let mut escaped = false;
        let mut prevtype = symbols::WHITESPACE;
        let mut consumed_type = symbols::WHITESPACE;

        loop {
            if src.window().len() <= i {
                src.grow(0);
                if src.window().len() <= i {
                    break;
                }
            }
            let c = src.window()[i];
            let ty = if escaped {
                symbols::REGULAR
            } else {
                symbols::class_of(c)
            };
            escaped = !escaped && c == b'\\';

            if prevtype != symbols::DELIMITER && (prevtype == symbols::WHITESPACE || prevtype == ty)
            {
                if ty != symbols::WHITESPACE {
                    len += 1;
                    hash -= (ty as i32 - 1) * c as i32;
                    consumed_type = ty;
                    let still_numeric = c.is_ascii_digit()
                        || (len == 1 && (c == b'-' || c == b'+'))
                        || (!real && c == b'.' && {
                            real = true;
                            true
                        });
                    numeric = numeric && still_numeric;
                }
            } else {
                break;
            }
            prevtype = ty;
            i += 1;
        }

        let run_end = i;

        // bump past whitespace, stopping once a newline run has been
        // crossed (the next line may be byte counted)
        let mut prev_nl = false;
        loop {
            if src.window().len() <= i {
                src.grow(0);
                if src.window().len() <= i {
                    break;
                }
            }
            let b = src.window()[i];
            if symbols::class_of(b) == symbols::WHITESPACE && (!prev_nl || b == b'\r' || b == b'\n')
            {
                prev_nl = b == b'\r' || b == b'\n';
                i += 1;
            } else {
                break;
            }
        }

        let kind = if len == 0 {
            symbols::EOB
        } else if consumed_type == symbols::REGULAR && numeric {
            symbols::NUMERIC
        } else {
            consumed_type
        };

        self.sym = Some(Symbol {
            text: SymText::Window {
                start: run_end - len,
                len,
            },
            kind,
            hash: (10 * hash.abs() + len as i32) as u32,
        });
        self.boffset = i;
    }

    /// The reversed lexer. No escape handling; numeric means digits only.
    fn pop_symbol_rev(&mut self, src: &mut dyn ScanSource) {
        if let Some(sym) = self.symbol_stack.pop() {
            self.sym = Some(sym);
            return;
        }

        let mut i = self.boffset;
        let mut len = 0usize;
        let mut hash: i32 = 0;
        let mut numeric = true;
        let mut prevtype = symbols::WHITESPACE;
        let mut consumed_type = symbols::WHITESPACE;

        loop {
            if i == 0 {
                let delta = src.grow(0);
                if delta == 0 {
                    break;
                }
                self.align(delta);
                i += delta;
            }
            let c = src.window()[i - 1];
            let ty = symbols::class_of(c);

            if prevtype != symbols::DELIMITER && (prevtype == symbols::WHITESPACE || prevtype == ty)
            {
                if ty != symbols::WHITESPACE {
                    len += 1;
                    hash -= (ty as i32 - 1) * c as i32;
                    consumed_type = ty;
                    numeric = numeric && c.is_ascii_digit();
                }
            } else {
                break;
            }
            prevtype = ty;
            i -= 1;
        }

        let kind = if len == 0 {
            symbols::EOB
        } else if consumed_type == symbols::REGULAR && numeric {
            symbols::NUMERIC
        } else {
            consumed_type
        };

        self.sym = Some(Symbol {
            text: SymText::Window { start: i, len },
            kind,
            hash: (10 * hash.abs() + len as i32) as u32,
        });
        self.boffset = i;
    }

    /// Adjust window-relative offsets after the source prepended `delta`
    /// bytes (reversed mode only).
    fn align(&mut self, delta: usize) {
        let shift = |sym: &mut Symbol| {
            if let SymText::Window { start, len } = sym.text {
                sym.text = SymText::Window {
                    start: start + delta,
                    len,
                };
            }
        };
        if let Some(sym) = self.sym.as_mut() {
            shift(sym);
        }
        for sym in self.symbol_stack.iter_mut() {
            shift(sym);
        }
        self.bmark += delta;
    }

    /// Bypass the state machine and consume raw bytes up to the next
    /// newline (`newline`) or delimiter. The consumed region becomes the
    /// current symbol; trailing whitespace is absorbed.
    fn read_until_delimiter(&mut self, src: &mut dyn ScanSource, newline: bool) {
        let mut i = self.boffset;

        // rewind past pushed-back symbols so their content is not skipped;
        // for line reads, rewind behind the current symbol's absorbed
        // whitespace as well, or a line consisting of a single symbol
        // would trample past its newline
        if (newline && self.sym.is_some()) || !self.symbol_stack.is_empty() {
            let had_stack = !self.symbol_stack.is_empty();
            let mut sym = self.sym.take();
            while let Some(older) = self.symbol_stack.pop() {
                sym = Some(older);
            }
            if let Some(s) = sym.as_ref() {
                if let Some(start) = s.start() {
                    let anchor = if had_stack { start } else { start + s.len() };
                    self.boffset = anchor;
                    if newline {
                        i = anchor;
                    }
                }
            }
        }

        let mut escaped = false;
        loop {
            if src.window().len() <= i {
                src.grow(0);
                if src.window().len() <= i {
                    break;
                }
            }
            let b = src.window()[i];
            if !escaped
                && ((newline && (b == b'\n' || b == b'\r'))
                    || (!newline && symbols::class_of(b) == symbols::DELIMITER))
            {
                break;
            }
            escaped = !escaped && b == b'\\';
            i += 1;
        }

        self.sym = Some(Symbol {
            text: SymText::Window {
                start: self.boffset,
                len: i - self.boffset,
            },
            kind: symbols::REGULAR,
            hash: 0,
        });

        // absorb whitespace if any
        loop {
            if src.window().len() <= i {
                src.grow(0);
                if src.window().len() <= i {
                    break;
                }
            }
            if symbols::class_of(src.window()[i]) == symbols::WHITESPACE {
                i += 1;
            } else {
                break;
            }
        }

        self.boffset = i;
    }

    fn operate(&mut self, src: &mut dyn ScanSource, chain: &'g Chain) {
        for op in chain {
            match op {
                Operator::PushState(state) | Operator::PushWeakState(state) => {
                    let entry = self.boffset;
                    let prev = mem::replace(&mut self.env, Env::new(*state, entry));
                    self.env_stack.push(prev);
                    self.scan(src);
                    if self.failed {
                        return;
                    }
                }
                Operator::PopState => match self.env_stack.pop() {
                    Some(prev) => self.env = prev,
                    None => self.alive = false,
                },
                Operator::PushEmptyString => self.results.push(Node::Str(Vec::new())),
                Operator::PushResult => {
                    let bytes = self.sym_bytes_vec(src.window());
                    self.results.push(Node::Str(bytes));
                }
                Operator::AppendResult => {
                    let bytes = self.sym_bytes_vec(src.window());
                    if let Some(Node::Str(s)) = self.results.last_mut() {
                        s.extend_from_slice(&bytes);
                    }
                }
                Operator::PushContent => {
                    let start = self.env.entry.min(self.boffset);
                    let bytes = src
                        .window()
                        .get(start..self.boffset)
                        .unwrap_or(&[])
                        .to_vec();
                    self.results.push(Node::Str(bytes));
                }
                Operator::Mark => {
                    self.bmark = self
                        .sym
                        .as_ref()
                        .and_then(Symbol::start)
                        .unwrap_or(self.boffset);
                }
                Operator::PushMarked => {
                    let end = self
                        .sym
                        .as_ref()
                        .and_then(|s| s.start().map(|start| start + s.len()))
                        .unwrap_or(self.boffset);
                    let bytes = src.window().get(self.bmark..end).unwrap_or(&[]).to_vec();
                    self.results.push(Node::Str(bytes));
                }
                Operator::PopVariable(tag) => {
                    if let Some(value) = self.results.pop() {
                        self.env.vars.push(value);
                        self.env.vars.push(Node::Id(*tag));
                    }
                }
                Operator::PopValue => {
                    if let Some(value) = self.results.pop() {
                        self.env.vars.push(value);
                    }
                }
                Operator::PullBuildVariable(tag) => {
                    let build = mem::take(&mut self.env.build);
                    self.env.vars.push(Node::Stack(build));
                    self.env.vars.push(Node::Id(*tag));
                }
                Operator::PushComplex(tag) => {
                    let vars = mem::take(&mut self.env.vars);
                    self.results.push(compose(*tag, vars));
                }
                Operator::StoveComplex(tag) => {
                    let vars = mem::take(&mut self.env.vars);
                    let node = compose(*tag, vars);
                    self.env.build.push(node);
                }
                Operator::PushbackSymbol => {
                    if let Some(sym) = self.sym.take() {
                        self.symbol_stack.push(sym);
                    }
                }
                Operator::PushbackValue => match self.results.pop() {
                    Some(Node::Str(bytes)) => {
                        let kind = symbols::classify_token(&bytes) | symbols::FAKE;
                        let hash = grammar::symbol_hash(&bytes);
                        self.symbol_stack.push(Symbol {
                            text: SymText::Fake(bytes),
                            kind,
                            hash,
                        });
                    }
                    Some(other) => {
                        warn!("pushback of a non-string result; leaving it in place");
                        self.results.push(other);
                    }
                    None => warn!("pushback requested with no result available"),
                },
                Operator::PopLine => self.read_until_delimiter(src, true),
                Operator::ReadToDelimiter => self.read_until_delimiter(src, false),
                Operator::Nop => {}
                Operator::Break => debug!("break operator hit"),
            }
        }
    }

    /// Drive the state machine until the current environment is left or an
    /// iterating state completes one match.
    fn scan(&mut self, src: &mut dyn ScanSource) {
        let depth = self.env_stack.len();
        let entry_offset = self.boffset;
        let entry_iterates = self.grammar.state(self.env.state).iterates;

        loop {
            if self.reversed {
                self.pop_symbol_rev(src);
            } else {
                self.pop_symbol(src);
            }

            let (hash, kind) = match self.sym.as_ref() {
                Some(sym) => (sym.hash, sym.kind),
                None => (0, symbols::EOB),
            };
            let text = self.sym_bytes_vec(src.window());
            let grammar = self.grammar;
            let state = grammar.state(self.env.state);

            match state.match_symbol(&text, hash, kind) {
                Some(chain) => {
                    self.operate(src, chain);
                    if self.failed {
                        return;
                    }
                }
                None => {
                    if kind & symbols::EOB != 0 {
                        warn!("unexpected end of buffer in state {}", state.name);
                    } else {
                        warn!(
                            "no operator for symbol {:?} in state {}",
                            String::from_utf8_lossy(&text),
                            state.name
                        );
                    }
                    while let Some(prev) = self.env_stack.pop() {
                        self.env = prev;
                    }
                    self.results.clear();
                    self.failed = true;
                    return;
                }
            }

            if self.env_stack.len() != depth || entry_iterates || !self.alive {
                break;
            }
        }

        self.bres_offset = entry_offset;
    }

    /// Scan until a result is available.
    fn poll(&mut self, src: &mut dyn ScanSource) -> bool {
        while !self.failed && self.alive && self.results.is_empty() {
            if let Some(cap) = self.loop_cap.as_mut() {
                if *cap == 0 {
                    self.loop_cap = None;
                    return false;
                }
                *cap -= 1;
            }
            self.scan(src);
        }
        self.loop_cap = None;
        !self.failed && !self.results.is_empty()
    }

    /// Pop the next result when it is a plain string; otherwise leave it.
    pub fn pop_string(&mut self, src: &mut dyn ScanSource) -> Option<Vec<u8>> {
        if self.poll(src) && matches!(self.results.last(), Some(Node::Str(_))) {
            match self.results.pop() {
                Some(Node::Str(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    /// Pop the next result when it is a composite; otherwise leave it.
    pub fn pop_stack(&mut self, src: &mut dyn ScanSource) -> Option<Vec<Node>> {
        if self.poll(src) && matches!(self.results.last(), Some(Node::Stack(_))) {
            match self.results.pop() {
                Some(Node::Stack(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    pub fn assert_string(&mut self, src: &mut dyn ScanSource, expected: &str) -> Result<()> {
        match self.pop_string(src) {
            Some(s) if s == expected.as_bytes() => Ok(()),
            Some(s) => Err(Error::Syntax(format!(
                "expected \"{}\", found \"{}\"",
                expected,
                String::from_utf8_lossy(&s)
            ))),
            None => Err(Error::Syntax(format!(
                "expected \"{expected}\", found a non-string entry"
            ))),
        }
    }

    pub fn assert_complex(&mut self, src: &mut dyn ScanSource, tag: Tag) -> Result<()> {
        match self.pop_stack(src) {
            Some(stack) if stack.first() == Some(&Node::Id(tag)) => Ok(()),
            Some(stack) => Err(Error::Syntax(format!(
                "expected a {tag} entry, found {:?}",
                stack.first()
            ))),
            None => Err(Error::Syntax(format!(
                "expected a {tag} entry, found a non-composite entry"
            ))),
        }
    }

    /// Consume exactly `len` bytes of stream content, skipping the newline
    /// run after the `stream` keyword first. When a filter is attached the
    /// returned bytes are its decoded output.
    pub fn read_stream(&mut self, src: &mut dyn ScanSource, len: usize) -> Result<Vec<u8>> {
        let mut i = self.boffset;
        loop {
            if src.window().len() <= i {
                src.grow(0);
                if src.window().len() <= i {
                    break;
                }
            }
            let b = src.window()[i];
            if b == b'\r' || b == b'\n' {
                i += 1;
            } else {
                break;
            }
        }

        if src.window().len() < i + len {
            src.grow(i + len - src.window().len());
        }
        let avail = src.window().len().saturating_sub(i).min(len);
        let raw = src.window()[i..i + avail].to_vec();
        self.boffset = i + avail;

        match &self.filter {
            Some(chain) => chain.decode(&raw),
            None => Ok(raw),
        }
    }

    /// Advance past bytes until one of class `class` has been consumed.
    pub fn skip_past_class(&mut self, src: &mut dyn ScanSource, class: u8) -> usize {
        let mut skipped = 0;
        let mut i = self.boffset;
        loop {
            if src.window().len() <= i {
                src.grow(0);
                if src.window().len() <= i {
                    break;
                }
            }
            let b = src.window()[i];
            i += 1;
            if symbols::class_of(b) == class {
                break;
            }
            skipped += 1;
        }
        self.boffset = i;
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf_grammar::{self, tags};

    fn scan_all(input: &[u8]) -> Vec<Node> {
        let pdf = pdf_grammar::shared();
        let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
        let mut src = FixedSource::new(input);
        let mut out = Vec::new();
        loop {
            if let Some(stack) = scanner.pop_stack(&mut src) {
                out.push(Node::Stack(stack));
            } else if let Some(s) = scanner.pop_string(&mut src) {
                out.push(Node::Str(s));
            } else {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_object_header() {
        let nodes = scan_all(b"12 0 obj\n");
        assert_eq!(
            nodes[0],
            Node::Stack(vec![
                Node::Id(tags::OBJ),
                Node::Str(b"12".to_vec()),
                Node::Str(b"0".to_vec()),
            ])
        );
    }

    #[test]
    fn lexes_reference_inside_dictionary() {
        let nodes = scan_all(b"<< /Length 8 0 R /Type /Example >>");
        let dict = nodes[0].as_stack().unwrap();
        assert_eq!(dict[0], Node::Id(tags::DICT));
        assert_eq!(dict[1], Node::Id(tags::ENTRIES));
        let entries = dict[2].as_stack().unwrap();
        assert_eq!(entries.len(), 2);
        let first = entries[0].as_stack().unwrap();
        assert_eq!(first[0], Node::Id(tags::DE));
        assert_eq!(first[1], Node::Str(b"Length".to_vec()));
        assert_eq!(
            first[2],
            Node::Stack(vec![
                Node::Id(tags::REF),
                Node::Str(b"8".to_vec()),
                Node::Str(b"0".to_vec()),
            ])
        );
    }

    #[test]
    fn lexes_nested_parenthesis_string() {
        let nodes = scan_all(b"(outer (inner) tail)");
        assert_eq!(nodes[0], Node::Str(b"(outer (inner) tail)".to_vec()));
    }

    #[test]
    fn lexes_escaped_parenthesis() {
        let nodes = scan_all(br"(not closed \) yet)");
        assert_eq!(nodes[0], Node::Str(br"(not closed \) yet)".to_vec()));
    }

    #[test]
    fn lexes_hex_string_and_empty_hex() {
        let nodes = scan_all(b"<48656C6C6F> <>");
        assert_eq!(
            nodes[0],
            Node::Stack(vec![
                Node::Id(tags::HEXSTR),
                Node::Str(b"48656C6C6F".to_vec())
            ])
        );
        assert_eq!(
            nodes[1],
            Node::Stack(vec![Node::Id(tags::HEXSTR), Node::Str(Vec::new())])
        );
    }

    #[test]
    fn lexes_array_of_numbers_and_names() {
        let nodes = scan_all(b"[ 1 2.5 /Name ]");
        let arr = nodes[0].as_stack().unwrap();
        assert_eq!(arr[0], Node::Id(tags::ARRAY));
        let entries = arr[2].as_stack().unwrap();
        assert_eq!(entries.len(), 3);
        let last = entries[2].as_stack().unwrap();
        assert_eq!(last[0], Node::Id(tags::AE));
        assert_eq!(
            last[1],
            Node::Stack(vec![Node::Id(tags::NAME), Node::Str(b"Name".to_vec())])
        );
    }

    #[test]
    fn comments_are_skipped_and_meta_is_reported() {
        let nodes = scan_all(b"%PDF-1.6\n17 0 obj\n");
        assert_eq!(nodes[0].tag(), Some(tags::OBJ));
    }

    #[test]
    fn eof_marker_scans_as_meta() {
        let nodes = scan_all(b"%%EOF\n");
        assert_eq!(
            nodes[0],
            Node::Stack(vec![Node::Id(tags::META), Node::Str(b"EOF".to_vec())])
        );
    }

    #[test]
    fn startxref_scans_as_complex() {
        let nodes = scan_all(b"startxref\n1234\n%%EOF\n");
        assert_eq!(
            nodes[0],
            Node::Stack(vec![Node::Id(tags::STARTXREF), Node::Str(b"1234".to_vec())])
        );
    }

    #[test]
    fn reversed_scan_finds_startxref() {
        let pdf = pdf_grammar::shared();
        let tail = b"startxref\n54321\n%%EOF\n";
        let mut scanner = Scanner::new_reversed(&pdf.grammar, pdf.xref_seeker);
        let mut src = FixedSource::new(tail);
        // reversed sources present their full window immediately here
        scanner.boffset = tail.len();
        scanner.set_loop_cap(100);
        let stack = scanner.pop_stack(&mut src).unwrap();
        assert_eq!(stack[0], Node::Id(tags::STARTXREF));
        assert_eq!(stack[1], Node::Str(b"54321".to_vec()));
    }

    #[test]
    fn read_stream_consumes_exact_length() {
        let pdf = pdf_grammar::shared();
        let data = b"7 0 obj << /Length 5 >> stream\nHELLO\nendstream endobj";
        let mut scanner = Scanner::new(&pdf.grammar, pdf.root);
        let mut src = FixedSource::new(data);
        let header = scanner.pop_stack(&mut src).unwrap();
        assert_eq!(header[0], Node::Id(tags::OBJ));
        let _dict = scanner.pop_stack(&mut src).unwrap();
        assert_eq!(scanner.pop_string(&mut src).unwrap(), b"stream");
        let content = scanner.read_stream(&mut src, 5).unwrap();
        assert_eq!(content, b"HELLO");
        scanner.assert_complex(&mut src, tags::ENDSTREAM).unwrap();
        scanner.assert_string(&mut src, "endobj").unwrap();
    }
}
