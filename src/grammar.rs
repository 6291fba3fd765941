//! Declarative lexer states and their operators.
//!
//! A grammar is a set of named states. Each state maps lexed symbols to
//! operator chains, with dedicated fallbacks for numbers, delimiters and
//! everything else. States reference each other by index into the grammar's
//! arena, so recursive grammars need no ownership cycles.

use crate::symbols;

/// Index of a state inside its [`Grammar`] arena.
pub type StateId = usize;

/// Identifier tag attached to composite scanner values.
pub type Tag = &'static str;

/// A single scanner instruction. Operators execute in chains attached to a
/// state's symbol table or to one of its fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    PushState(StateId),
    /// Same as `PushState`; the variant documents a cyclic edge in the
    /// grammar. Both carry non-owning indices.
    PushWeakState(StateId),
    PopState,
    PushEmptyString,
    /// Copy the current symbol's text onto the results stack.
    PushResult,
    /// Append the current symbol's text to the topmost result string.
    AppendResult,
    /// Push the region from state entry to the current position.
    PushContent,
    /// Push the region from the recorded mark through the current symbol.
    PushMarked,
    /// Record the current symbol's start offset.
    Mark,
    /// Move the top result into the variable stack, tagged.
    PopVariable(Tag),
    /// Move the top result into the variable stack, untagged.
    PopValue,
    /// Move the entire build stack into the variable stack as one tagged
    /// entry.
    PullBuildVariable(Tag),
    /// Wrap the variable stack as `[tag, ...]` and push it to the results.
    PushComplex(Tag),
    /// Wrap the variable stack as `[tag, ...]` and append it to the build
    /// stack.
    StoveComplex(Tag),
    /// Re-seed the symbol stack with the current symbol.
    PushbackSymbol,
    /// Pop a result and re-seed the symbol stack with a synthesized symbol.
    PushbackValue,
    /// Consume the remainder of the line.
    PopLine,
    /// Consume raw bytes up to the next delimiter.
    ReadToDelimiter,
    Nop,
    /// Debugging aid; logs and continues.
    Break,
}

/// Operator chains are short; a plain vector stands in for the original
/// linked chain.
pub type Chain = Vec<Operator>;

pub struct State {
    pub name: &'static str,
    /// When set, the scanner stops after a single match in this state so
    /// the caller can drive iteration.
    pub iterates: bool,
    symbols: Vec<&'static [u8]>,
    symbol_ops: Vec<Chain>,
    pub number_op: Option<Chain>,
    pub delimiter_op: Option<Chain>,
    pub fallback_op: Option<Chain>,
    /// Perfect-hash slot table; `0` marks an empty slot, any other value is
    /// a symbol index plus one.
    index: Vec<usize>,
}

impl State {
    fn new(name: &'static str, iterates: bool) -> State {
        State {
            name,
            iterates,
            symbols: Vec::new(),
            symbol_ops: Vec::new(),
            number_op: None,
            delimiter_op: None,
            fallback_op: None,
            index: Vec::new(),
        }
    }

    /// Look up the operator chain for a lexed symbol, falling through to
    /// the number, delimiter and fallback operators in that order.
    pub fn match_symbol(&self, text: &[u8], hash: u32, kind: u8) -> Option<&Chain> {
        if !self.index.is_empty() {
            let mask = self.index.len() - 1;
            let mut slot = hash as usize & mask;
            while slot < self.index.len() && self.index[slot] != 0 {
                let sym = self.index[slot] - 1;
                if self.symbols[sym] == text {
                    return Some(&self.symbol_ops[sym]);
                }
                slot += 1;
            }
        }
        if kind & symbols::NUMERIC != 0 {
            if let Some(ref op) = self.number_op {
                return Some(op);
            }
        }
        if kind & symbols::DELIMITER != 0 {
            if let Some(ref op) = self.delimiter_op {
                return Some(op);
            }
        }
        self.fallback_op.as_ref()
    }

    /// Build the perfect-hash index over the state's symbols: the smallest
    /// power-of-two table into which every symbol linear-probes without
    /// probing past the end, and with collisions bounded by the free space.
    fn compile(&mut self) {
        if !self.index.is_empty() || self.symbols.is_empty() {
            return;
        }

        let hashes: Vec<u32> = self.symbols.iter().map(|s| symbol_hash(s)).collect();

        let mut n = 2usize;
        while n < self.symbols.len() {
            n <<= 1;
        }

        loop {
            let mask = n - 1;
            let mut index = vec![0usize; n];
            let mut collisions = 0usize;
            let mut fits = true;

            'insert: for (i, &hash) in hashes.iter().enumerate() {
                let mut slot = hash as usize & mask;
                if index[slot] != 0 {
                    collisions += 1;
                    while slot < n && index[slot] != 0 {
                        slot += 1;
                    }
                    if slot == n {
                        fits = false;
                        break 'insert;
                    }
                }
                index[slot] = i + 1;
            }

            if fits && collisions + self.symbols.len() <= n {
                self.index = index;
                return;
            }
            n <<= 1;
        }
    }
}

/// Hash a symbol the way the compiled index expects: XOR-style accumulation
/// of `(class − 1) × byte`, then `10·|sum| + length`.
pub fn symbol_hash(sym: &[u8]) -> u32 {
    let mut hash: i32 = 0;
    for &c in sym {
        hash -= (symbols::class_of(c) as i32 - 1) * c as i32;
    }
    (10 * hash.abs() + sym.len() as i32) as u32
}

/// An immutable, compiled set of states.
pub struct Grammar {
    states: Vec<State>,
}

impl Grammar {
    #[inline]
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id]
    }
}

/// Builder for a grammar arena. States are declared first (so they can
/// reference each other), then given operators, then compiled.
pub struct GrammarBuilder {
    states: Vec<State>,
}

impl Default for GrammarBuilder {
    fn default() -> GrammarBuilder {
        GrammarBuilder::new()
    }
}

impl GrammarBuilder {
    pub fn new() -> GrammarBuilder {
        GrammarBuilder { states: Vec::new() }
    }

    pub fn declare(&mut self, name: &'static str, iterates: bool) -> StateId {
        self.states.push(State::new(name, iterates));
        self.states.len() - 1
    }

    pub fn symbol(&mut self, state: StateId, sym: &'static str, chain: Chain) -> &mut Self {
        let state = &mut self.states[state];
        state.symbols.push(sym.as_bytes());
        state.symbol_ops.push(chain);
        self
    }

    pub fn number(&mut self, state: StateId, chain: Chain) -> &mut Self {
        self.states[state].number_op = Some(chain);
        self
    }

    pub fn delimiter(&mut self, state: StateId, chain: Chain) -> &mut Self {
        self.states[state].delimiter_op = Some(chain);
        self
    }

    pub fn fallback(&mut self, state: StateId, chain: Chain) -> &mut Self {
        self.states[state].fallback_op = Some(chain);
        self
    }

    pub fn compile(mut self) -> Grammar {
        for state in &mut self.states {
            state.compile();
        }
        Grammar { states: self.states }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols;

    fn lex_kind(text: &[u8]) -> u8 {
        symbols::classify_token(text)
    }

    #[test]
    fn compiled_state_matches_symbols() {
        let mut builder = GrammarBuilder::new();
        let s = builder.declare("test", false);
        builder.symbol(s, "obj", vec![Operator::PushResult]);
        builder.symbol(s, "endobj", vec![Operator::PopState]);
        builder.symbol(s, "stream", vec![Operator::Nop]);
        builder.number(s, vec![Operator::PushResult, Operator::PopState]);
        builder.fallback(s, vec![Operator::PopState]);
        let grammar = builder.compile();
        let state = grammar.state(s);

        let chain = state
            .match_symbol(b"endobj", symbol_hash(b"endobj"), lex_kind(b"endobj"))
            .unwrap();
        assert_eq!(chain, &vec![Operator::PopState]);

        let chain = state
            .match_symbol(b"stream", symbol_hash(b"stream"), lex_kind(b"stream"))
            .unwrap();
        assert_eq!(chain, &vec![Operator::Nop]);
    }

    #[test]
    fn unmatched_numeric_falls_to_number_operator() {
        let mut builder = GrammarBuilder::new();
        let s = builder.declare("test", false);
        builder.symbol(s, "obj", vec![Operator::Nop]);
        builder.number(s, vec![Operator::PushResult]);
        builder.fallback(s, vec![Operator::PopState]);
        let grammar = builder.compile();
        let state = grammar.state(s);

        let chain = state
            .match_symbol(b"42", symbol_hash(b"42"), lex_kind(b"42"))
            .unwrap();
        assert_eq!(chain, &vec![Operator::PushResult]);

        let chain = state
            .match_symbol(b"word", symbol_hash(b"word"), lex_kind(b"word"))
            .unwrap();
        assert_eq!(chain, &vec![Operator::PopState]);
    }

    #[test]
    fn index_size_is_a_power_of_two() {
        let mut builder = GrammarBuilder::new();
        let s = builder.declare("test", false);
        for sym in ["a", "b", "c", "d", "e", "f", "g"] {
            builder.symbol(s, sym, vec![Operator::Nop]);
        }
        let grammar = builder.compile();
        assert!(grammar.state(s).index.len().is_power_of_two());
        assert!(grammar.state(s).index.len() >= 7);
    }
}
