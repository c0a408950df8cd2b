use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::fmt;

// Exports
pub(crate) mod graph;
pub(crate) use graph::DependencyGraph;

pub(crate) mod sync;
pub(crate) use sync::WaitGroup;

/// Most tasks have a handful of dependencies, keep them inline.
pub(crate) const INLINE_TOKENS: usize = 4;

pub(crate) type TokenList = SmallVec<[Token; INLINE_TOKENS]>;

/// Opaque identifier linking producer and consumer tasks.
///
/// Tokens carry no data. The dependency graph only compares them, and a token
/// value is never handed out twice in the lifetime of the process, so a stale
/// token can never alias a newer producer.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Token(NonZeroU64);

impl Token {
    pub fn new() -> Token {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Token(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique dependency token: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::new()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tok-{}", self.0)
    }
}

/// Sorts and dedups a caller-provided token list.
pub(crate) fn normalize(tokens: &[Token]) -> TokenList {
    let mut list = TokenList::from_slice(tokens);
    list.sort_unstable();
    list.dedup();
    list
}

/// Rejects dependency lists a task could never be scheduled with.
pub(crate) fn validate(ins: &TokenList, outs: &TokenList) -> Result<()> {
    // Both lists are sorted.
    let (mut i, mut o) = (0, 0);
    while i < ins.len() && o < outs.len() {
        match ins[i].cmp(&outs[o]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => o += 1,
            std::cmp::Ordering::Equal => {
                return Err(Error::InvalidArgument(
                    "token listed as both input and output of the same task",
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_never_reused() {
        let tokens = (0..64).map(|_| Token::new()).collect::<Vec<_>>();
        let unique = normalize(&tokens);

        assert_eq!(unique.len(), tokens.len());
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_normalize_dedups() {
        let (a, b) = (Token::new(), Token::new());
        let list = normalize(&[b, a, b, a]);
        assert_eq!(list.as_slice(), &[a, b]);
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let (a, b, c) = (Token::new(), Token::new(), Token::new());

        assert!(validate(&normalize(&[a, b]), &normalize(&[c])).is_ok());
        assert!(validate(&normalize(&[]), &normalize(&[a])).is_ok());
        assert!(matches!(
            validate(&normalize(&[a, c]), &normalize(&[b, c])),
            Err(Error::InvalidArgument(_))
        ));
    }
}
