/*!
 * Wildcard Pattern Matching
 *
 * DOS-style wildcard matching used by SCAN's MATCH option: `?` matches
 * any single byte, `*` matches any run of bytes, `;` separates
 * alternative sub-patterns, and every other byte (including `.`) matches
 * itself. Patterns are anchored at both ends.
 */

/// A compiled wildcard pattern
///
/// Compiling splits the pattern on `;` into alternatives and records
/// whether any wildcard byte is present at all; a pattern with no
/// wildcards short-circuits to an exact byte compare.
#[derive(Debug, Clone)]
pub struct WildCard {
    raw: Vec<u8>,
    is_wild: bool,
    alternatives: Vec<Vec<u8>>,
}

impl WildCard {
    /// Compile a pattern
    pub fn compile(pattern: &[u8]) -> Self {
        let is_wild = pattern.iter().any(|b| matches!(b, b'?' | b'*' | b';'));
        let alternatives = if is_wild {
            pattern
                .split(|b| *b == b';')
                .map(|alt| alt.to_vec())
                .collect()
        } else {
            Vec::new()
        };
        Self {
            raw: pattern.to_vec(),
            is_wild,
            alternatives,
        }
    }

    /// Whether the pattern contains any wildcard notation
    #[inline]
    pub fn is_wild(&self) -> bool {
        self.is_wild
    }

    /// Test a byte string against the pattern
    pub fn is_match(&self, text: &[u8]) -> bool {
        if !self.is_wild {
            return self.raw == text;
        }
        self.alternatives.iter().any(|alt| glob_match(alt, text))
    }
}

/// Anchored glob match of one alternative against `text`.
///
/// Classic two-pointer scan with single-star backtracking: on mismatch,
/// retry from one byte past the position the last `*` matched to.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0; // position in pattern
    let mut t = 0; // position in text
    let mut star: Option<usize> = None; // pattern index after last '*'
    let mut mark = 0; // text index the last '*' matched up to

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                // Star provisionally matches the empty run.
                p += 1;
                star = Some(p);
                mark = t;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                // Widen the last star by one byte and retry.
                Some(sp) => {
                    mark += 1;
                    p = sp;
                    t = mark;
                }
                None => return false,
            },
        }
    }

    // Text exhausted; only trailing stars may remain.
    while pattern.get(p) == Some(&b'*') {
        p += 1;
    }
    p == pattern.len()
}
