//! Page-number pagination over a counted result set.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("That page number is not an integer")]
    NotAnInteger,
    #[error("That page contains no results")]
    EmptyPage,
}

/// Splits `count` items into pages of `per_page`.
///
/// With `orphans > 0`, a last page holding that many items or fewer is
/// folded into the page before it.
#[derive(Debug, Clone)]
pub struct Paginator {
    count: usize,
    per_page: usize,
    orphans: usize,
    allow_empty_first_page: bool,
}

/// The slice of the result set that makes up one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }
}

impl Paginator {
    /// `per_page` of zero is treated as one.
    pub fn new(count: usize, per_page: usize) -> Self {
        Paginator {
            count,
            per_page: per_page.max(1),
            orphans: 0,
            allow_empty_first_page: true,
        }
    }

    pub fn orphans(mut self, orphans: usize) -> Self {
        self.orphans = orphans;
        self
    }

    pub fn allow_empty_first_page(mut self, allow: bool) -> Self {
        self.allow_empty_first_page = allow;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn num_pages(&self) -> usize {
        if self.count == 0 && !self.allow_empty_first_page {
            return 0;
        }
        let hits = self.count.saturating_sub(self.orphans).max(1);
        hits.div_ceil(self.per_page)
    }

    /// Parse and range-check a page number taken from a query string.
    ///
    /// Surrounding whitespace is ignored and `"2.0"` style floats are
    /// rejected, matching integer parsing of the raw parameter.
    pub fn validate_number(&self, raw: &str) -> Result<usize, PageError> {
        let number: i64 = raw.trim().parse().map_err(|_| PageError::NotAnInteger)?;
        if number < 1 {
            return Err(PageError::EmptyPage);
        }
        let number = usize::try_from(number).map_err(|_| PageError::EmptyPage)?;
        if number > self.num_pages() && !(number == 1 && self.allow_empty_first_page) {
            return Err(PageError::EmptyPage);
        }
        Ok(number)
    }

    pub fn page(&self, raw: &str) -> Result<Page, PageError> {
        let number = self.validate_number(raw)?;
        let offset = (number - 1) * self.per_page;
        let mut top = offset + self.per_page;
        if top + self.orphans >= self.count {
            top = self.count;
        }
        Ok(Page {
            number,
            num_pages: self.num_pages(),
            count: self.count,
            offset,
            limit: top.saturating_sub(offset),
        })
    }
}
