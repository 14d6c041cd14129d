use backbone::paginator::{Page, PageError, Paginator};

#[test]
fn test_num_pages() {
    assert_eq!(Paginator::new(10, 3).num_pages(), 4);
    assert_eq!(Paginator::new(9, 3).num_pages(), 3);
    assert_eq!(Paginator::new(1, 10).num_pages(), 1);
    // An empty first page still counts as a page by default
    assert_eq!(Paginator::new(0, 10).num_pages(), 1);
    assert_eq!(Paginator::new(0, 10).allow_empty_first_page(false).num_pages(), 0);
    // Zero per page is treated as one
    assert_eq!(Paginator::new(3, 0).num_pages(), 3);
}

#[test]
fn test_orphans_are_folded_into_the_previous_page() {
    let paginator = Paginator::new(11, 5).orphans(1);
    assert_eq!(paginator.num_pages(), 2);
    let last = paginator.page("2").unwrap();
    assert_eq!((last.offset, last.limit), (5, 6));

    let paginator = Paginator::new(12, 5).orphans(1);
    assert_eq!(paginator.num_pages(), 3);
}

#[test]
fn test_validate_number() {
    let paginator = Paginator::new(10, 3);
    assert_eq!(paginator.validate_number("1"), Ok(1));
    assert_eq!(paginator.validate_number(" 4 "), Ok(4));
    assert_eq!(paginator.validate_number("5"), Err(PageError::EmptyPage));
    assert_eq!(paginator.validate_number("0"), Err(PageError::EmptyPage));
    assert_eq!(paginator.validate_number("-1"), Err(PageError::EmptyPage));
    assert_eq!(paginator.validate_number("abc"), Err(PageError::NotAnInteger));
    assert_eq!(paginator.validate_number("2.0"), Err(PageError::NotAnInteger));
    assert_eq!(paginator.validate_number(""), Err(PageError::NotAnInteger));
}

#[test]
fn test_first_page_of_empty_result() {
    let page = Paginator::new(0, 10).page("1").unwrap();
    assert_eq!(
        page,
        Page {
            number: 1,
            num_pages: 1,
            count: 0,
            offset: 0,
            limit: 0,
        }
    );
    assert!(!page.has_next());
    assert!(!page.has_previous());

    let strict = Paginator::new(0, 10).allow_empty_first_page(false);
    assert_eq!(strict.page("1"), Err(PageError::EmptyPage));
}

#[test]
fn test_page_slices() {
    let paginator = Paginator::new(10, 3);
    assert_eq!(paginator.count(), 10);

    let first = paginator.page("1").unwrap();
    assert_eq!((first.offset, first.limit), (0, 3));
    assert!(first.has_next());
    assert!(!first.has_previous());

    let last = paginator.page("4").unwrap();
    assert_eq!((last.offset, last.limit), (9, 1));
    assert!(!last.has_next());
    assert!(last.has_previous());
}
