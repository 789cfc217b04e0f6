//! `SKIP` and `LIMIT`.

use super::{BoxedOperator, Operator, OperatorResult};

pub struct SkipLimitOperator {
    input: BoxedOperator,
    skip: usize,
    limit: Option<usize>,
    skipped: usize,
    emitted: usize,
}

impl SkipLimitOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, skip: usize, limit: Option<usize>) -> Self {
        Self {
            input,
            skip,
            limit,
            skipped: 0,
            emitted: 0,
        }
    }
}

impl Operator for SkipLimitOperator {
    fn next(&mut self) -> OperatorResult {
        // Stop pulling once the limit is reached so upstream work ends too.
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }
        while self.skipped < self.skip {
            if self.input.next()?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        let row = self.input.next()?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }

    fn reset(&mut self) {
        self.input.reset();
        self.skipped = 0;
        self.emitted = 0;
    }

    fn name(&self) -> &'static str {
        "SkipLimit"
    }
}
