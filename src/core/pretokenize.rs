//! Text → pretoken splitting.
//!
//! Special tokens are located first with an Aho-Corasick automaton using
//! leftmost-longest semantics, so when one special token is a prefix of
//! another the longer literal wins. The text between special tokens is cut
//! into pretokens by the general pattern. Merges never cross a pretoken.
//!
//! Patterns ending in the GPT-2 whitespace alternatives `\s+(?!\S)|\s+` are
//! split in two: the leading alternatives run on the regex engine and the
//! whitespace runs are measured by a linear scan. The backtracking engine
//! keeps one stack entry per repeated character, so matching
//! `\s+(?!\S)` directly fails on whitespace runs of about a million
//! characters.

use aho_corasick::{AhoCorasick, FindIter, MatchKind};
use fancy_regex::{Matches, Regex};

use super::tokenizer::TokenizerError;

/// Trailing alternatives that are matched without the regex engine.
const WHITESPACE_ALTERNATIVES: &str = r"|\s+(?!\S)|\s+";

/// One unit of merge work produced by the [`Pretokenizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pretoken<'t> {
    /// A special-token literal, by index into the configured special tokens.
    Special(usize),
    /// A match of the general pattern, merged from its individual bytes.
    Piece(&'t str),
}

/// Splits text on special tokens and the general pretokenization pattern.
#[derive(Debug, Clone)]
pub struct Pretokenizer {
    regex: Regex,
    /// The pattern without its whitespace alternatives, when it has them.
    leading: Option<Regex>,
    special_tokens: Vec<String>,
    special_matcher: Option<AhoCorasick>,
}

impl Pretokenizer {
    /// Compile the pretokenizer.
    ///
    /// `special_tokens` must be non-empty strings; the caller validates this.
    pub fn new(pattern: &str, special_tokens: &[String]) -> Result<Self, TokenizerError> {
        let regex = Regex::new(pattern)?;
        let leading = leading_alternatives(pattern).and_then(|leading| Regex::new(leading).ok());
        let special_matcher = if special_tokens.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(special_tokens)?,
            )
        };

        Ok(Self {
            regex,
            leading,
            special_tokens: special_tokens.to_vec(),
            special_matcher,
        })
    }

    /// The special tokens, in the order pattern indices refer to.
    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    /// The general pattern source.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Lazily split `text` into pretokens.
    pub fn split<'r, 't>(&'r self, text: &'t str) -> Pretokens<'r, 't> {
        Pretokens {
            pretokenizer: self,
            text,
            specials: self
                .special_matcher
                .as_ref()
                .map(|matcher| matcher.find_iter(text)),
            pending_special: None,
            chunk: None,
            cursor: 0,
        }
    }

    fn split_chunk<'r, 't>(&'r self, chunk: &'t str) -> Chunk<'r, 't> {
        match &self.leading {
            Some(leading) => Chunk::Scan(WhitespaceScan {
                leading,
                text: chunk,
                pos: 0,
                next_leading: None,
            }),
            None => Chunk::Regex(self.regex.find_iter(chunk)),
        }
    }
}

/// Strip the top-level `\s+(?!\S)|\s+` tail from `pattern`, if present.
fn leading_alternatives(pattern: &str) -> Option<&str> {
    let leading = pattern.strip_suffix(WHITESPACE_ALTERNATIVES)?;
    // An odd run of backslashes escapes the `|`
    let escapes = leading.bytes().rev().take_while(|&b| b == b'\\').count();
    (!leading.is_empty() && escapes % 2 == 0).then_some(leading)
}

/// Iterator returned by [`Pretokenizer::split`].
///
/// Yields `Err` if the regex engine fails on a chunk (for instance when a
/// backtracking limit is hit); iteration stops after the error.
pub struct Pretokens<'r, 't> {
    pretokenizer: &'r Pretokenizer,
    text: &'t str,
    specials: Option<FindIter<'r, 't>>,
    /// Special token ending the current chunk, emitted once the chunk is drained.
    pending_special: Option<usize>,
    chunk: Option<Chunk<'r, 't>>,
    /// Start of the text not yet assigned to a chunk.
    cursor: usize,
}

impl<'r, 't> Pretokens<'r, 't> {
    /// Open the next chunk: the ordinary text up to the next special token.
    /// Returns false once the text is exhausted.
    fn next_chunk(&mut self) -> bool {
        if self.cursor > self.text.len() {
            return false;
        }

        let next_special = self.specials.as_mut().and_then(Iterator::next);
        let (end, resume) = match next_special {
            Some(m) => {
                self.pending_special = Some(m.pattern().as_usize());
                (m.start(), m.end())
            }
            // Past the end, so the next call reports exhaustion
            None => (self.text.len(), self.text.len() + 1),
        };

        let text: &'t str = self.text;
        self.chunk = Some(self.pretokenizer.split_chunk(&text[self.cursor..end]));
        self.cursor = resume;
        true
    }
}

impl<'r, 't> Iterator for Pretokens<'r, 't> {
    type Item = Result<Pretoken<'t>, fancy_regex::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.chunk.as_mut() {
                match chunk.next() {
                    Some(Ok(piece)) => return Some(Ok(Pretoken::Piece(piece))),
                    Some(Err(err)) => {
                        self.chunk = None;
                        self.pending_special = None;
                        self.cursor = self.text.len() + 1;
                        return Some(Err(err));
                    }
                    None => {
                        self.chunk = None;
                        if let Some(index) = self.pending_special.take() {
                            return Some(Ok(Pretoken::Special(index)));
                        }
                    }
                }
            }

            if !self.next_chunk() {
                return None;
            }
        }
    }
}

/// Pattern matches within one chunk.
enum Chunk<'r, 't> {
    Regex(Matches<'r, 't>),
    Scan(WhitespaceScan<'r, 't>),
}

impl<'r, 't> Iterator for Chunk<'r, 't> {
    type Item = Result<&'t str, fancy_regex::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Chunk::Regex(matches) => matches.next().map(|m| m.map(|m| m.as_str())),
            Chunk::Scan(scan) => scan.next(),
        }
    }
}

/// Leftmost-first matching of `leading|\s+(?!\S)|\s+`.
///
/// At any position the leading alternatives take precedence; a whitespace
/// character where they do not match starts a whitespace run.
struct WhitespaceScan<'r, 't> {
    leading: &'r Regex,
    text: &'t str,
    pos: usize,
    /// First match of `leading` at or after some earlier `pos`, once searched.
    next_leading: Option<Option<(usize, usize)>>,
}

impl<'r, 't> Iterator for WhitespaceScan<'r, 't> {
    type Item = Result<&'t str, fancy_regex::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.text;

        while self.pos < text.len() {
            let stale = match self.next_leading {
                None => true,
                Some(Some((start, _))) => start < self.pos,
                Some(None) => false,
            };
            if stale {
                match self.leading.find_from_pos(text, self.pos) {
                    Ok(m) => self.next_leading = Some(m.map(|m| (m.start(), m.end()))),
                    Err(err) => {
                        self.pos = text.len();
                        return Some(Err(err));
                    }
                }
            }
            let leading = self.next_leading.flatten();

            // Whitespace only wins where the leading alternatives do not match
            let limit = leading.map_or(text.len(), |(start, _)| start);
            let space = text[self.pos..limit]
                .char_indices()
                .find(|&(_, c)| c.is_whitespace())
                .map(|(i, _)| self.pos + i);

            match (space, leading) {
                (Some(start), _) => {
                    let end = whitespace_end(text, start);
                    self.pos = end;
                    return Some(Ok(&text[start..end]));
                }
                (None, Some((start, end))) if start == end => {
                    // Empty matches carry no bytes
                    self.pos = text[start..]
                        .chars()
                        .next()
                        .map_or(text.len(), |c| start + c.len_utf8());
                }
                (None, Some((start, end))) => {
                    self.pos = end;
                    return Some(Ok(&text[start..end]));
                }
                (None, None) => self.pos = text.len(),
            }
        }

        None
    }
}

/// End of the `\s+(?!\S)|\s+` match starting at `start`.
///
/// A run followed by a non-space character leaves its last character to
/// the next match, unless the run is a single character.
fn whitespace_end(text: &str, start: usize) -> usize {
    let mut last = start;
    let mut end = start;
    for (i, c) in text[start..].char_indices() {
        if !c.is_whitespace() {
            break;
        }
        last = start + i;
        end = last + c.len_utf8();
    }

    if end < text.len() && last > start {
        last
    } else {
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tokenizer::GPT2_PATTERN;

    fn pieces(pretokenizer: &Pretokenizer, text: &str) -> Vec<String> {
        pretokenizer
            .split(text)
            .map(|p| match p.unwrap() {
                Pretoken::Special(i) => format!("[{}]", pretokenizer.special_tokens()[i]),
                Pretoken::Piece(s) => s.to_string(),
            })
            .collect()
    }

    fn specials(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_gpt2_pattern_pieces() {
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &[]).unwrap();
        assert_eq!(
            pieces(&pretokenizer, "Hello, world! It's 2024  ok"),
            vec!["Hello", ",", " world", "!", " It", "'s", " 2024", " ", " ok"]
        );
    }

    #[test]
    fn test_trailing_whitespace() {
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &[]).unwrap();
        assert_eq!(pieces(&pretokenizer, "hi \n"), vec!["hi", " \n"]);
    }

    #[test]
    fn test_empty_text() {
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &specials(&["<|eot|>"])).unwrap();
        assert!(pieces(&pretokenizer, "").is_empty());
    }

    #[test]
    fn test_special_tokens_split() {
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &specials(&["<|eot|>"])).unwrap();
        assert_eq!(
            pieces(&pretokenizer, "abc<|eot|> def"),
            vec!["abc", "[<|eot|>]", " def"]
        );
    }

    #[test]
    fn test_adjacent_special_tokens() {
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &specials(&["<|eot|>"])).unwrap();
        assert_eq!(
            pieces(&pretokenizer, "<|eot|><|eot|>"),
            vec!["[<|eot|>]", "[<|eot|>]"]
        );
    }

    #[test]
    fn test_longest_special_token_wins() {
        let tokens = specials(&["<|endoftext|>", "<|endoftext|><|pad|>"]);
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &tokens).unwrap();
        assert_eq!(
            pieces(&pretokenizer, "a<|endoftext|><|pad|>b<|endoftext|>"),
            vec!["a", "[<|endoftext|><|pad|>]", "b", "[<|endoftext|>]"]
        );
    }

    #[test]
    fn test_special_token_is_literal() {
        // Regex metacharacters in special tokens match literally
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &specials(&["a.b"])).unwrap();
        assert_eq!(pieces(&pretokenizer, "axb a.b"), vec!["axb", " ", "[a.b]"]);
    }

    #[test]
    fn test_whitespace_scan_agrees_with_regex() {
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &[]).unwrap();
        assert!(pretokenizer.leading.is_some());

        let regex = Regex::new(GPT2_PATTERN).unwrap();
        let texts = [
            "Hello, world! It's 2024  ok",
            "  leading and trailing  ",
            "tabs\t\tand\n\nnewlines \n\tx",
            "\u{3000}ideographic\u{3000}\u{3000}space",
            "punct   !!  ?? 12  34",
            "we'll they've I'd ' s",
            " ",
            "x",
        ];
        for text in texts {
            let expected: Vec<String> = regex
                .find_iter(text)
                .map(|m| m.unwrap().as_str().to_string())
                .collect();
            assert_eq!(pieces(&pretokenizer, text), expected, "text: {:?}", text);
        }
    }

    #[test]
    fn test_long_whitespace_run() {
        let pretokenizer = Pretokenizer::new(GPT2_PATTERN, &[]).unwrap();
        let n = 1_500_000;

        let text = format!("{}x", " ".repeat(n));
        assert_eq!(
            pieces(&pretokenizer, &text),
            vec![" ".repeat(n - 1), " x".to_string()]
        );

        let text = "\n".repeat(n);
        assert_eq!(pieces(&pretokenizer, &text), vec![text.clone()]);
    }

    #[test]
    fn test_leading_alternatives() {
        assert_eq!(
            leading_alternatives(GPT2_PATTERN),
            Some(r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+")
        );
        assert_eq!(leading_alternatives(r"\w+"), None);
        // The first `|` is escaped, so the tail is not a top-level alternation
        assert_eq!(leading_alternatives(r"a\|\s+(?!\S)|\s+"), None);
        assert_eq!(leading_alternatives(r"\|\s+(?!\S)|\s+"), None);
        assert_eq!(leading_alternatives(r"a\\|\s+(?!\S)|\s+"), Some(r"a\\"));
    }

    #[test]
    fn test_regex_runtime_error_stops_iteration() {
        // Whitespace alternatives that do not close the pattern run on the
        // backtracking engine, which overflows its stack on this run
        let tokens = specials(&["<|eot|>"]);
        let pretokenizer = Pretokenizer::new(r"\s+(?!\S)|\S+", &tokens).unwrap();
        assert!(pretokenizer.leading.is_none());

        let text = format!("{}x<|eot|>tail", " ".repeat(2_000_000));
        let mut pretokens = pretokenizer.split(&text);
        assert!(matches!(pretokens.next(), Some(Err(_))));
        assert!(pretokens.next().is_none());
        assert!(pretokens.next().is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Pretokenizer::new("(unclosed", &[]).unwrap_err();
        assert!(matches!(err, TokenizerError::Regex(_)));
    }
}
