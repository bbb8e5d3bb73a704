use std::num::NonZeroUsize;

/// A page of results expressed as a 1-based ordinal range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page: NonZeroUsize,
    page_size: NonZeroUsize,
}

impl PageCursor {
    pub fn new(page: NonZeroUsize, page_size: NonZeroUsize) -> Self {
        Self { page, page_size }
    }

    /// First ordinal on the page, saturating at `usize::MAX`
    pub fn page_start(&self) -> usize {
        (self.page.get() - 1)
            .saturating_mul(self.page_size.get())
            .saturating_add(1)
    }

    /// Last ordinal on the page, saturating at `usize::MAX`
    pub fn page_end(&self) -> usize {
        self.page.get().saturating_mul(self.page_size.get())
    }

    pub fn contains(&self, ordinal: usize) -> bool {
        (self.page_start()..=self.page_end()).contains(&ordinal)
    }

    /// Nothing past `ordinal` can land on this page
    pub fn is_exhausted(&self, ordinal: usize) -> bool {
        ordinal >= self.page_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(page: usize, size: usize) -> PageCursor {
        PageCursor::new(NonZeroUsize::new(page).unwrap(), NonZeroUsize::new(size).unwrap())
    }

    #[test]
    fn test_bounds() {
        let first = cursor(1, 10);
        assert_eq!((first.page_start(), first.page_end()), (1, 10));

        let second = cursor(2, 10);
        assert_eq!((second.page_start(), second.page_end()), (11, 20));
        assert!(!second.contains(10));
        assert!(second.contains(11));
        assert!(second.contains(20));
        assert!(!second.contains(21));
        assert!(!second.is_exhausted(19));
        assert!(second.is_exhausted(20));
    }

    #[test]
    fn test_huge_page_saturates() {
        let far = cursor(usize::MAX / 2, 4);
        assert_eq!(far.page_end(), usize::MAX);
        assert_eq!(far.page_start(), usize::MAX);
        assert!(!far.contains(1));
        assert!(!far.is_exhausted(1_000_000));

        let wide = cursor(1, usize::MAX);
        assert_eq!((wide.page_start(), wide.page_end()), (1, usize::MAX));
        assert!(wide.contains(1));
    }
}
