//! Host page size helpers. File offsets passed to `mmap` must be multiples of the page size.

use std::sync::OnceLock;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Returns the host memory page size.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(query_page_size)
}

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

/// Rounds `size` up to the next page boundary.
pub fn round_up_to_page(size: u64) -> u64 {
    let page = page_size() as u64;
    size.div_ceil(page) * page
}

/// Rounds `offset` down to the page boundary it lies in.
pub fn align_down_to_page(offset: u64) -> u64 {
    let page = page_size() as u64;
    offset - offset % page
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{align_down_to_page, page_size, round_up_to_page};

    #[test]
    fn test_page_size() {
        let page = page_size();
        assert!(page > 0);
        assert!(page.is_power_of_two());
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(1, 1, 0)]
    #[case(1024, 1, 0)]
    #[case(4096, 1, 1)]
    #[case(4097, 2, 1)]
    fn test_rounding(#[case] value: u64, #[case] up_pages: u64, #[case] down_pages: u64) {
        // cases assume 4 KiB pages
        let page = page_size() as u64;
        if page != 4096 {
            return;
        }
        assert_eq!(round_up_to_page(value), up_pages * page);
        assert_eq!(align_down_to_page(value), down_pages * page);
    }
}
