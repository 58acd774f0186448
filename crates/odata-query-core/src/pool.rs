//! Reusable token buffers for the parsers.
//!
//! A [`ParserPool`] hands out cleared `Vec<Token>` buffers through an RAII
//! guard. A buffer is used by one parse at a time and returns to the pool
//! empty when the guard drops. Thread-safe: the free list sits behind a
//! `parking_lot::Mutex` held only while pushing or popping.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use crate::expression::Token;

/// Free list of token buffers.
#[derive(Debug)]
pub struct ParserPool {
    idle: Mutex<Vec<Vec<Token>>>,
    capacity: usize,
}

impl ParserPool {
    /// Create a pool that retains at most `capacity` idle buffers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take an empty buffer, allocating one if none is idle.
    #[must_use]
    pub fn acquire(&self) -> PooledTokens<'_> {
        let mut buffer = self.idle.lock().pop().unwrap_or_default();
        buffer.clear();
        PooledTokens {
            pool: self,
            buffer: Some(buffer),
        }
    }

    /// Number of idle buffers.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, mut buffer: Vec<Token>) {
        buffer.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(buffer);
        }
    }
}

impl Default for ParserPool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_POOL_CAPACITY)
    }
}

/// A buffer on loan from a [`ParserPool`]; returned on drop.
#[derive(Debug)]
pub struct PooledTokens<'p> {
    pool: &'p ParserPool,
    buffer: Option<Vec<Token>>,
}

impl Deref for PooledTokens<'_> {
    type Target = Vec<Token>;

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref().unwrap_or(&EMPTY)
    }
}

impl DerefMut for PooledTokens<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.get_or_insert_with(Vec::new)
    }
}

impl Drop for PooledTokens<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

static EMPTY: Vec<Token> = Vec::new();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_expression_with;

    #[test]
    fn test_should_return_cleared_buffer_on_drop() {
        let pool = ParserPool::new(2);
        {
            let mut tokens = pool.acquire();
            parse_expression_with("Price gt 5", &mut tokens).unwrap();
            assert_eq!(tokens.len(), 4);
        }
        assert_eq!(pool.idle_count(), 1);
        let tokens = pool.acquire();
        assert!(tokens.is_empty());
        assert!(tokens.capacity() >= 4);
    }

    #[test]
    fn test_should_return_buffer_after_failed_parse() {
        let pool = ParserPool::new(2);
        {
            let mut tokens = pool.acquire();
            assert!(parse_expression_with("Name eq 'abc", &mut tokens).is_err());
        }
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn test_should_cap_idle_buffers() {
        let pool = ParserPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_should_serve_concurrent_parsers() {
        let pool = ParserPool::new(4);
        std::thread::scope(|s| {
            for i in 0..8 {
                let pool = &pool;
                s.spawn(move || {
                    for _ in 0..50 {
                        let mut tokens = pool.acquire();
                        let input = format!("Price gt {i}");
                        let expr = parse_expression_with(&input, &mut tokens).unwrap();
                        assert_eq!(expr.to_string(), format!("(Price gt {i})"));
                    }
                });
            }
        });
        assert!(pool.idle_count() <= 4);
    }
}
